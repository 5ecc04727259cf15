//! Stage collaborators
//!
//! The coordinator delegates the domain work of a stage to these traits:
//! [`Analyzer`] turns a job into generation units, [`Compositor`] post-processes
//! artifacts and [`ArtifactStore`] keeps the bytes rescued from expiring URLs.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use kiln_core::domain::config::JobConfig;
use kiln_core::domain::job::{Job, JobId};
use kiln_core::domain::subtask::{Subtask, SubtaskStatus};
use kiln_predict::config::{MODEL_CAPTION, MODEL_CLIP, MODEL_IMAGE};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::RwLock;

/// Failure reported by a stage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StageError(pub String);

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

/// One generation unit decided by analysis
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPlan {
    pub index: usize,
    /// Logical model key resolved through the model catalog
    pub model_key: String,
    pub input: Value,
    pub score: Option<f64>,
    pub metadata: Value,
}

impl UnitPlan {
    /// Builds the subtask record this plan fans out into
    pub fn to_subtask(&self, job_id: JobId) -> Subtask {
        Subtask::new(job_id, self.index)
            .with_score(self.score)
            .with_metadata(self.metadata.clone())
    }
}

// =============================================================================
// Analyzer
// =============================================================================

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Plans the generation units of a job. `source` is the stored location of
    /// downloaded source media, when the kind has a download stage.
    async fn plan(&self, job: &Job, source: Option<&str>) -> Result<Vec<UnitPlan>, StageError>;

    /// Plans the caption pass for a subtask parked in `CAPTIONING`
    async fn caption_plan(&self, job: &Job, subtask: &Subtask) -> Result<UnitPlan, StageError>;
}

/// Builds prompts and clip windows straight from the submitted config
#[derive(Debug, Clone, Default)]
pub struct TemplateAnalyzer;

impl TemplateAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for TemplateAnalyzer {
    async fn plan(&self, job: &Job, _source: Option<&str>) -> Result<Vec<UnitPlan>, StageError> {
        match &job.config {
            JobConfig::ImageGeneration(config) => {
                let prompt = match &config.style {
                    Some(style) => format!("{}, {} style", config.prompt.trim(), style),
                    None => config.prompt.trim().to_string(),
                };

                Ok((0..config.variations as usize)
                    .map(|index| {
                        let mut input = json!({
                            "prompt": prompt,
                            "seed": index as u64,
                            "num_outputs": 1,
                        });
                        if let Some(negative) = &config.negative_prompt {
                            input["negative_prompt"] = json!(negative);
                        }
                        if let Some(ratio) = &config.aspect_ratio {
                            input["aspect_ratio"] = json!(ratio);
                        }
                        if let Some(reference) = &config.reference_image_url {
                            input["image"] = json!(reference);
                        }
                        UnitPlan {
                            index,
                            model_key: MODEL_IMAGE.to_string(),
                            input,
                            score: None,
                            metadata: json!({ "variation": index }),
                        }
                    })
                    .collect())
            }
            JobConfig::VideoClipping(config) => {
                let duration = config.clip_duration_secs;
                Ok((0..config.clip_count as usize)
                    .map(|index| {
                        let start = index as u32 * duration;
                        UnitPlan {
                            index,
                            model_key: MODEL_CLIP.to_string(),
                            input: json!({
                                "video": config.source_url,
                                "start_time": start,
                                "end_time": start + duration,
                            }),
                            // Earlier windows rank first
                            score: Some(1.0 - index as f64 / f64::from(config.clip_count)),
                            metadata: json!({ "startSecs": start, "durationSecs": duration }),
                        }
                    })
                    .collect())
            }
        }
    }

    async fn caption_plan(&self, job: &Job, subtask: &Subtask) -> Result<UnitPlan, StageError> {
        let JobConfig::VideoClipping(config) = &job.config else {
            return Err(StageError::new("captions are only produced for video clips"));
        };
        let clip_url = subtask
            .result_url
            .as_deref()
            .ok_or_else(|| StageError::new(format!("clip {} has no artifact", subtask.index)))?;

        let mut input = json!({ "video_file_input": clip_url });
        if let Some(style) = &config.caption_style {
            input["style"] = json!(style);
        }
        if let Some(language) = &config.language {
            input["language"] = json!(language);
        }

        Ok(UnitPlan {
            index: subtask.index,
            model_key: MODEL_CAPTION.to_string(),
            input,
            score: subtask.score,
            metadata: subtask.metadata.clone(),
        })
    }
}

// =============================================================================
// Compositor
// =============================================================================

#[async_trait]
pub trait Compositor: Send + Sync {
    /// Post-processes one unit's artifact before it is stored
    async fn compose(&self, job_id: JobId, index: usize, bytes: Vec<u8>)
    -> Result<Vec<u8>, StageError>;

    /// Job-level finishing pass over the completed subtasks
    async fn finalize(&self, job: &Job) -> Result<(), StageError>;
}

/// Stores artifacts exactly as generated
#[derive(Debug, Clone, Default)]
pub struct PassthroughCompositor;

impl PassthroughCompositor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Compositor for PassthroughCompositor {
    async fn compose(
        &self,
        _job_id: JobId,
        _index: usize,
        bytes: Vec<u8>,
    ) -> Result<Vec<u8>, StageError> {
        Ok(bytes)
    }

    async fn finalize(&self, job: &Job) -> Result<(), StageError> {
        let completed = job.count_subtasks(SubtaskStatus::Completed);
        tracing::debug!(job_id = %job.id, completed, "Nothing to composite");
        Ok(())
    }
}

// =============================================================================
// Artifact store
// =============================================================================

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persists an artifact and returns its durable location
    async fn put(&self, job_id: JobId, name: &str, bytes: Vec<u8>) -> Result<String, StageError>;
}

/// Writes artifacts under `{root}/{job_id}/{name}`
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, job_id: JobId, name: &str, bytes: Vec<u8>) -> Result<String, StageError> {
        let dir = self.root.join(job_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(name);
        tokio::fs::write(&path, &bytes).await?;

        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        Ok(format!("file://{}", path.display()))
    }
}

/// Keeps artifacts in memory; locations use the `memory://` scheme
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self, location: &str) -> Option<Vec<u8>> {
        self.artifacts.read().await.get(location).cloned()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, job_id: JobId, name: &str, bytes: Vec<u8>) -> Result<String, StageError> {
        let location = format!("memory://{}/{}", job_id, name);
        self.artifacts.write().await.insert(location.clone(), bytes);
        Ok(location)
    }
}

/// Artifact file name for unit `index`, keeping the extension of the
/// remote URL when it has a short one
pub fn artifact_name(prefix: &str, index: usize, url: &str) -> String {
    format!("{}-{}.{}", prefix, index, extension_of(url))
}

pub fn extension_of(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::domain::config::{ImageGenerationConfig, VideoClippingConfig};
    use kiln_core::domain::job::JobStatus;

    #[tokio::test]
    async fn test_image_plans() {
        let mut config = ImageGenerationConfig::new("glazed teapot", 3);
        config.style = Some("watercolor".to_string());
        config.aspect_ratio = Some("4:5".to_string());
        let job = Job::new(JobConfig::ImageGeneration(config));

        let plans = TemplateAnalyzer::new().plan(&job, None).await.unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[2].index, 2);
        assert_eq!(plans[2].model_key, MODEL_IMAGE);
        assert_eq!(plans[0].input["prompt"], "glazed teapot, watercolor style");
        assert_eq!(plans[1].input["seed"], 1);
        assert_eq!(plans[0].input["aspect_ratio"], "4:5");
        assert!(plans[0].input.get("negative_prompt").is_none());
    }

    #[tokio::test]
    async fn test_video_plans_and_caption_plan() {
        let mut config = VideoClippingConfig::new("https://cdn.example.com/talk.mp4", 2);
        config.clip_duration_secs = 20;
        config.language = Some("es".to_string());
        let mut job = Job::new(JobConfig::VideoClipping(config));

        let plans = TemplateAnalyzer::new()
            .plan(&job, Some("file:///tmp/source.mp4"))
            .await
            .unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].input["start_time"], 20);
        assert_eq!(plans[1].input["end_time"], 40);
        assert_eq!(plans[0].score, Some(1.0));

        job.enter_stage(JobStatus::Downloading).unwrap();
        let mut subtask = plans[1].to_subtask(job.id);
        assert_eq!(subtask.score, Some(0.5));
        subtask.transition(SubtaskStatus::Processing).unwrap();

        let analyzer = TemplateAnalyzer::new();
        assert!(analyzer.caption_plan(&job, &subtask).await.is_err());

        subtask
            .succeed("memory://clip-1.mp4", SubtaskStatus::Captioning)
            .unwrap();
        let caption = analyzer.caption_plan(&job, &subtask).await.unwrap();
        assert_eq!(caption.model_key, MODEL_CAPTION);
        assert_eq!(caption.index, 1);
        assert_eq!(caption.input["video_file_input"], "memory://clip-1.mp4");
        assert_eq!(caption.input["language"], "es");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("https://cdn.x/a/out-0.png"), "png");
        assert_eq!(extension_of("https://cdn.x/clip.mp4?sig=abc.def"), "mp4");
        assert_eq!(extension_of("https://cdn.x/download"), "bin");
        assert_eq!(extension_of("https://cdn.x/.hidden"), "bin");
        assert_eq!(artifact_name("clip", 3, "https://cdn.x/c.webm"), "clip-3.webm");
    }

    #[tokio::test]
    async fn test_local_store_writes_under_job_dir() {
        let root = std::env::temp_dir().join(format!("kiln-artifacts-{}", uuid::Uuid::new_v4()));
        let store = LocalArtifactStore::new(&root);
        let job_id = uuid::Uuid::new_v4();

        let location = store.put(job_id, "image-0.png", b"png".to_vec()).await.unwrap();
        assert!(location.starts_with("file://"));
        assert!(location.ends_with("image-0.png"));

        let written = tokio::fs::read(root.join(job_id.to_string()).join("image-0.png"))
            .await
            .unwrap();
        assert_eq!(written, b"png");
        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
