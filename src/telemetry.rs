//! Telemetry and structured logging for the thumbnail worker.

use crate::worker::{JobContext, JobError};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

/// Records telemetry for one processed (or failed) job.
///
/// Emits a span plus structured logs for monitoring pipeline health:
/// duration, strategy, produced-file count, and the failing stage when the
/// job did not complete.
pub fn record_job_telemetry(ctx: &JobContext, result: &Result<Vec<String>, JobError>) {
    let tracer = global::tracer("thumbnail-worker");
    let mut span = tracer.start("thumbnail_job");

    let duration_ms = ctx.elapsed_ms();
    span.set_attribute(KeyValue::new("correlation_id", ctx.correlation_id.to_string()));
    span.set_attribute(KeyValue::new("job_id", ctx.job.id.clone()));
    span.set_attribute(KeyValue::new("original", ctx.job.original.clone()));
    span.set_attribute(KeyValue::new("strategy", ctx.job.strategy.clone()));
    span.set_attribute(KeyValue::new("duration_ms", duration_ms));

    match result {
        Ok(files) => {
            span.set_attribute(KeyValue::new("status", "complete"));
            span.set_attribute(KeyValue::new("files", files.len() as i64));

            info!(
                correlation_id = %ctx.correlation_id,
                job_id = %ctx.job.id,
                duration_ms = duration_ms,
                files = files.len(),
                "thumbnail job completed"
            );

            // Conversion is expected to be quick; flag slow jobs.
            if duration_ms > 30_000 {
                warn!(
                    correlation_id = %ctx.correlation_id,
                    duration_ms = duration_ms,
                    "thumbnail job exceeded performance threshold (30000ms)"
                );
            }
        }
        Err(e) => {
            span.set_attribute(KeyValue::new("status", "failed"));
            span.set_attribute(KeyValue::new("stage", e.stage()));
            span.set_attribute(KeyValue::new("error", e.to_string()));

            warn!(
                correlation_id = %ctx.correlation_id,
                job_id = %ctx.job.id,
                stage = e.stage(),
                error = %e,
                "thumbnail job failed"
            );
        }
    }

    span.end();
}

/// Records a worker heartbeat so dashboards can tell a quiet worker from a
/// dead one.
pub fn record_worker_heartbeat(jobs_processed: u64) {
    let tracer = global::tracer("thumbnail-worker");
    let mut span = tracer.start("worker_heartbeat");

    span.set_attribute(KeyValue::new("jobs_processed", jobs_processed as i64));
    span.end();

    info!(jobs_processed = jobs_processed, "worker heartbeat");
}

/// Initializes OpenTelemetry with an OTLP exporter.
///
/// Called once at worker startup. Reads configuration from environment
/// variables:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - service name (default: thumbnail-worker)
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name = std::env::var("OTEL_SERVICE_NAME")
        .unwrap_or_else(|_| "thumbnail-worker".to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    global::set_tracer_provider(tracer.provider().unwrap());

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConvertError;
    use crate::job::Job;

    fn context() -> JobContext {
        JobContext::new(Job::decode(r#"{"id": "job-1", "original": "img/cat.jpg"}"#).unwrap())
    }

    #[test]
    fn record_completed_job_does_not_panic() {
        let ctx = context();
        record_job_telemetry(&ctx, &Ok(vec!["0.png".to_string()]));
    }

    #[test]
    fn record_failed_job_does_not_panic() {
        let ctx = context();
        record_job_telemetry(
            &ctx,
            &Err(JobError::Convert(ConvertError::NoOutput)),
        );
    }

    #[test]
    fn heartbeat_does_not_panic() {
        record_worker_heartbeat(10);
    }
}
