//! Thumbnail conversion by shelling out to an ImageMagick-style tool.

use crate::job::ConversionRequest;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// The closed set of sizing/cropping strategies.
///
/// Strategy names arrive as free-form strings on the wire and are resolved
/// here once per conversion; an unregistered name is a checked error before
/// any subprocess is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Multi-page document: transparency fuzz, trim, one numbered file per page.
    Pdf,
    /// First frame scaled to the pixel budget, centered on a padded canvas.
    Matted,
    /// First frame scaled to fit within the box, no padding or cropping.
    Bounded,
    /// First frame scaled to cover the box, then center-cropped to it.
    Fill,
}

impl FromStr for Strategy {
    type Err = ConvertError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "pdf" => Ok(Strategy::Pdf),
            "matted" => Ok(Strategy::Matted),
            "bounded" => Ok(Strategy::Bounded),
            "fill" => Ok(Strategy::Fill),
            other => Err(ConvertError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Conversion failure taxonomy.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("could not find strategy {0}")]
    UnknownStrategy(String),
    #[error("failed to allocate scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),
    #[error("conversion exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("no files created")]
    NoOutput,
    #[error("failed to read scratch directory: {0}")]
    ListOutput(#[source] std::io::Error),
}

/// Result of one successful conversion: the scratch directory (removed on
/// drop) and the names of the files the tool wrote into it.
#[derive(Debug)]
pub struct ConversionOutput {
    pub dir: TempDir,
    pub files: Vec<String>,
}

/// Builds and runs one external conversion command per request.
///
/// Holds no per-job state; every execution is parameterized by one request
/// and one source path.
pub struct Thumbnailer {
    convert_command: String,
    tmp_prefix: String,
    timeout: Option<Duration>,
}

impl Thumbnailer {
    pub fn new(convert_command: String, tmp_prefix: String, timeout: Option<Duration>) -> Self {
        Self {
            convert_command,
            tmp_prefix,
            timeout,
        }
    }

    /// Runs the requested strategy against `source`.
    ///
    /// Allocates a fresh scratch directory, resolves the strategy, executes
    /// the tool, and enumerates the produced files. A subprocess that exits
    /// cleanly but writes nothing is a failure: it would otherwise look like
    /// a successful no-op conversion.
    pub async fn execute(
        &self,
        request: &ConversionRequest,
        source: &Path,
    ) -> Result<ConversionOutput, ConvertError> {
        let dir = tempfile::Builder::new()
            .prefix(&self.tmp_prefix)
            .tempdir()
            .map_err(ConvertError::Scratch)?;

        let strategy = Strategy::from_str(&request.strategy)?;
        let args = build_command(strategy, request, source, dir.path());

        debug!(command = %self.convert_command, ?args, "running conversion command");
        self.run_command(&args).await?;

        let files = list_output(dir.path())?;
        info!(?files, scratch = %dir.path().display(), "conversion produced output");
        Ok(ConversionOutput { dir, files })
    }

    async fn run_command(&self, args: &[String]) -> Result<(), ConvertError> {
        let mut command = Command::new(&self.convert_command);
        command.args(args).kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| ConvertError::Timeout(limit))?,
            None => command.output().await,
        }
        .map_err(|source| ConvertError::Spawn {
            command: self.convert_command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ConvertError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Constructs the argument list for a strategy.
///
/// Pure function of its inputs so that command construction stays
/// deterministic and testable. Quality is appended only when nonzero; zero
/// means "use the tool default".
pub fn build_command(
    strategy: Strategy,
    request: &ConversionRequest,
    source: &Path,
    scratch_dir: &Path,
) -> Vec<String> {
    let mut args = Vec::new();
    let dimensions = format!("{}X{}", request.width, request.height);
    // "[0]" selects the first frame or page of the source.
    let first_frame = format!("{}[0]", source.display());

    match strategy {
        Strategy::Pdf => {
            args.extend(
                ["-fuzz", "10%", "-transparent", "none", "-density", "200", "-trim"]
                    .map(String::from),
            );
            args.push(source.display().to_string());
            push_quality(&mut args, request.quality);
            args.push(scratch_dir.join("%d.png").display().to_string());
        }
        Strategy::Matted => {
            args.push(first_frame);
            args.push("-thumbnail".to_string());
            args.push(format!("{}@", u64::from(request.width) * u64::from(request.height)));
            args.extend(["-gravity", "center", "-background"].map(String::from));
            args.push(request.background.clone());
            args.push("-extent".to_string());
            args.push(dimensions);
            push_quality(&mut args, request.quality);
            args.push(output_file(scratch_dir, &request.format));
        }
        Strategy::Bounded => {
            args.push(first_frame);
            args.push("-thumbnail".to_string());
            args.push(dimensions);
            push_quality(&mut args, request.quality);
            args.push(output_file(scratch_dir, &request.format));
        }
        Strategy::Fill => {
            args.push(first_frame);
            args.push("-resize".to_string());
            args.push(format!("{}^", dimensions));
            args.extend(["-gravity", "center", "-extent"].map(String::from));
            args.push(dimensions);
            push_quality(&mut args, request.quality);
            args.push(output_file(scratch_dir, &request.format));
        }
    }
    args
}

fn push_quality(args: &mut Vec<String>, quality: u32) {
    if quality > 0 {
        args.push("-quality".to_string());
        args.push(quality.to_string());
    }
}

fn output_file(scratch_dir: &Path, format: &str) -> String {
    scratch_dir.join(format!("0.{}", format)).display().to_string()
}

fn list_output(dir: &Path) -> Result<Vec<String>, ConvertError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(ConvertError::ListOutput)? {
        let entry = entry.map_err(ConvertError::ListOutput)?;
        files.push(entry.file_name().to_string_lossy().into_owned());
    }
    if files.is_empty() {
        return Err(ConvertError::NoOutput);
    }
    files.sort();
    Ok(files)
}
