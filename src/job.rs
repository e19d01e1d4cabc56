//! Job models and message decoding for the thumbnail queue.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of work pulled off the queue.
///
/// The wire format is a JSON object, optionally wrapped in base64. The
/// strategy fields live both at the top level and inside `descriptions`;
/// conversion consumes the top-level set (one tool invocation per job),
/// while the description list is carried for logging.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: String,
    pub original: String,
    #[serde(default)]
    pub descriptions: Vec<ThumbnailDescription>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default)]
    pub quality: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// A single requested thumbnail variant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThumbnailDescription {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default)]
    pub quality: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Parameters for one converter invocation, resolved from a job's
/// top-level strategy fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub strategy: String,
    pub format: String,
    pub background: String,
    pub quality: u32,
    pub width: u32,
    pub height: u32,
}

/// Completion notification sent to the reply queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub files: Vec<String>,
}

fn default_format() -> String {
    "png".to_string()
}

fn default_strategy() -> String {
    "pdf".to_string()
}

fn default_background() -> String {
    "black".to_string()
}

/// A message body that is neither raw JSON nor base64-wrapped JSON.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message body is not JSON ({json}) nor base64 ({base64})")]
    NotJsonOrBase64 {
        json: serde_json::Error,
        base64: base64::DecodeError,
    },
    #[error("base64-decoded message body is not JSON: {0}")]
    Base64NotJson(#[source] serde_json::Error),
}

impl Job {
    /// Decodes a queue message body into a job.
    ///
    /// A plain JSON body is accepted first; on a parse failure the body is
    /// base64-decoded and parsed again. Both failing is a hard decode error
    /// for that message.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        match serde_json::from_str(body) {
            Ok(job) => Ok(job),
            Err(json) => {
                let bytes = BASE64
                    .decode(body.trim())
                    .map_err(|base64| DecodeError::NotJsonOrBase64 { json, base64 })?;
                serde_json::from_slice(&bytes).map_err(DecodeError::Base64NotJson)
            }
        }
    }

    /// The converter parameters for this job.
    pub fn conversion_request(&self) -> ConversionRequest {
        ConversionRequest {
            strategy: self.strategy.clone(),
            format: self.format.clone(),
            background: self.background.clone(),
            quality: self.quality,
            width: self.width,
            height: self.height,
        }
    }
}

/// Derives the remote key for a produced file.
///
/// The stem before the first `.` of the original key is joined with the
/// produced file name: `a/b/name.ext` + `12.png` -> `a/b/name.12.png`.
pub fn thumbnail_key(original: &str, produced_file: &str) -> String {
    match original.split_once('.') {
        Some((stem, _)) => format!("{}.{}", stem, produced_file),
        None => format!("{}.{}", original, produced_file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BODY: &str = r#"{
        "id": "job-1",
        "original": "img/cat.jpg",
        "strategy": "bounded",
        "width": 64,
        "height": 64,
        "descriptions": [{"strategy": "bounded", "width": 64, "height": 64}]
    }"#;

    #[test]
    fn decodes_raw_json() {
        let job = Job::decode(BODY).unwrap();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.original, "img/cat.jpg");
        assert_eq!(job.strategy, "bounded");
        assert_eq!(job.descriptions.len(), 1);
    }

    #[test]
    fn decodes_base64_wrapped_json_to_same_job() {
        let wrapped = BASE64.encode(BODY);
        let raw = Job::decode(BODY).unwrap();
        let from_base64 = Job::decode(&wrapped).unwrap();
        assert_eq!(raw, from_base64);
    }

    #[test]
    fn applies_field_defaults() {
        let job = Job::decode(r#"{"original": "a.png"}"#).unwrap();
        assert_eq!(job.format, "png");
        assert_eq!(job.strategy, "pdf");
        assert_eq!(job.background, "black");
        assert_eq!(job.quality, 0);
        assert!(job.descriptions.is_empty());
        assert!(job.id.is_empty());
    }

    #[test]
    fn rejects_garbage_body() {
        let err = Job::decode("{malformed json").unwrap_err();
        assert!(matches!(err, DecodeError::NotJsonOrBase64 { .. }));
    }

    #[test]
    fn rejects_base64_of_garbage() {
        let wrapped = BASE64.encode("{malformed json");
        let err = Job::decode(&wrapped).unwrap_err();
        assert!(matches!(err, DecodeError::Base64NotJson(_)));
    }

    #[test]
    fn thumbnail_key_replaces_extension_with_file_name() {
        assert_eq!(thumbnail_key("a/b/name.ext", "0.png"), "a/b/name.0.png");
        assert_eq!(thumbnail_key("img/cat.jpg", "3.png"), "img/cat.3.png");
    }

    #[test]
    fn thumbnail_key_without_extension_appends() {
        assert_eq!(thumbnail_key("img/cat", "0.png"), "img/cat.0.png");
    }
}
