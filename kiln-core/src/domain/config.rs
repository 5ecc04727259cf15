//! Job submission configs
//!
//! The body of a submission is tagged by `kind`. Each kind validates its own
//! constraints before a job is created.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::job::JobKind;

pub const MAX_PROMPT_CHARS: usize = 2000;
pub const MAX_VARIATIONS: u32 = 8;
pub const MAX_CLIPS: u32 = 10;
pub const MIN_CLIP_SECS: u32 = 5;
pub const MAX_CLIP_SECS: u32 = 180;
pub const ASPECT_RATIOS: &[&str] = &["1:1", "4:5", "9:16", "16:9"];

/// A job config failed validation; no job was created
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Kind-tagged job config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobConfig {
    ImageGeneration(ImageGenerationConfig),
    VideoClipping(VideoClippingConfig),
}

impl JobConfig {
    pub fn kind(&self) -> JobKind {
        match self {
            JobConfig::ImageGeneration(_) => JobKind::ImageGeneration,
            JobConfig::VideoClipping(_) => JobKind::VideoClipping,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            JobConfig::ImageGeneration(config) => config.validate(),
            JobConfig::VideoClipping(config) => config.validate(),
        }
    }
}

/// Image variant generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationConfig {
    pub prompt: String,
    #[serde(default = "default_variations")]
    pub variations: u32,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub reference_image_url: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

fn default_variations() -> u32 {
    4
}

impl ImageGenerationConfig {
    pub fn new(prompt: impl Into<String>, variations: u32) -> Self {
        Self {
            prompt: prompt.into(),
            variations,
            negative_prompt: None,
            aspect_ratio: None,
            reference_image_url: None,
            style: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(ValidationError::new("prompt", "must not be empty"));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(ValidationError::new(
                "prompt",
                format!("must be at most {} characters", MAX_PROMPT_CHARS),
            ));
        }
        if self.variations == 0 || self.variations > MAX_VARIATIONS {
            return Err(ValidationError::new(
                "variations",
                format!("must be between 1 and {}", MAX_VARIATIONS),
            ));
        }
        if let Some(ratio) = &self.aspect_ratio {
            if !ASPECT_RATIOS.contains(&ratio.as_str()) {
                return Err(ValidationError::new(
                    "aspectRatio",
                    format!("must be one of {}", ASPECT_RATIOS.join(", ")),
                ));
            }
        }
        if let Some(url) = &self.reference_image_url {
            check_http_url("referenceImageUrl", url)?;
        }
        Ok(())
    }
}

/// Clip extraction from a source video, with optional caption burn-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoClippingConfig {
    pub source_url: String,
    #[serde(default = "default_clip_count")]
    pub clip_count: u32,
    #[serde(default = "default_clip_duration")]
    pub clip_duration_secs: u32,
    #[serde(default = "default_captions")]
    pub captions: bool,
    #[serde(default)]
    pub caption_style: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_clip_count() -> u32 {
    3
}

fn default_clip_duration() -> u32 {
    30
}

fn default_captions() -> bool {
    true
}

impl VideoClippingConfig {
    pub fn new(source_url: impl Into<String>, clip_count: u32) -> Self {
        Self {
            source_url: source_url.into(),
            clip_count,
            clip_duration_secs: default_clip_duration(),
            captions: default_captions(),
            caption_style: None,
            language: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_http_url("sourceUrl", &self.source_url)?;
        if self.clip_count == 0 || self.clip_count > MAX_CLIPS {
            return Err(ValidationError::new(
                "clipCount",
                format!("must be between 1 and {}", MAX_CLIPS),
            ));
        }
        if self.clip_duration_secs < MIN_CLIP_SECS || self.clip_duration_secs > MAX_CLIP_SECS {
            return Err(ValidationError::new(
                "clipDurationSecs",
                format!("must be between {} and {}", MIN_CLIP_SECS, MAX_CLIP_SECS),
            ));
        }
        Ok(())
    }
}

fn check_http_url(field: &str, url: &str) -> Result<(), ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ValidationError::new(
            field,
            "must start with http:// or https://",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_config_with_defaults() {
        let config: JobConfig = serde_json::from_str(
            r#"{"kind": "image-generation", "prompt": "neon city skyline"}"#,
        )
        .unwrap();
        assert_eq!(config.kind(), JobKind::ImageGeneration);
        match config {
            JobConfig::ImageGeneration(c) => {
                assert_eq!(c.variations, 4);
                assert!(c.aspect_ratio.is_none());
            }
            _ => panic!("expected image config"),
        }
    }

    #[test]
    fn test_parse_video_config() {
        let config: JobConfig = serde_json::from_str(
            r#"{"kind": "video-clipping", "sourceUrl": "https://cdn.example.com/talk.mp4", "clipCount": 5, "captions": false}"#,
        )
        .unwrap();
        match &config {
            JobConfig::VideoClipping(c) => {
                assert_eq!(c.clip_count, 5);
                assert_eq!(c.clip_duration_secs, 30);
                assert!(!c.captions);
            }
            _ => panic!("expected video config"),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<JobConfig, _> =
            serde_json::from_str(r#"{"kind": "audio-mixing", "prompt": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_image_validation() {
        assert!(ImageGenerationConfig::new("a red fox", 4).validate().is_ok());

        let err = ImageGenerationConfig::new("   ", 4).validate().unwrap_err();
        assert_eq!(err.field, "prompt");

        let err = ImageGenerationConfig::new("a red fox", 0)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "variations");

        let err = ImageGenerationConfig::new("a red fox", MAX_VARIATIONS + 1)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "variations");

        let mut config = ImageGenerationConfig::new("a red fox", 2);
        config.aspect_ratio = Some("3:7".to_string());
        assert_eq!(config.validate().unwrap_err().field, "aspectRatio");

        config.aspect_ratio = Some("9:16".to_string());
        config.reference_image_url = Some("ftp://example.com/ref.png".to_string());
        assert_eq!(config.validate().unwrap_err().field, "referenceImageUrl");
    }

    #[test]
    fn test_video_validation() {
        let err = VideoClippingConfig::new("not-a-url", 2)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "sourceUrl");

        let err = VideoClippingConfig::new("https://example.com/a.mp4", MAX_CLIPS + 1)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "clipCount");

        let mut config = VideoClippingConfig::new("https://example.com/a.mp4", 2);
        config.clip_duration_secs = 2;
        assert_eq!(config.validate().unwrap_err().field, "clipDurationSecs");
    }

    #[test]
    fn test_validation_error_message() {
        let err = ValidationError::new("variations", "must be between 1 and 8");
        assert_eq!(err.to_string(), "variations: must be between 1 and 8");
    }
}
