//! Persistence facade: generation history, analyses, audio and spend tracking.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::video::pricing::round_cents;
use crate::video::{GenerationMode, ProviderId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Number of entries [`UsageSummary::recent`] keeps.
pub const RECENT_OPERATIONS: usize = 10;

/// Errors raised by a [`GenerationStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query or connection failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// No record with that id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be converted back into its type.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lifecycle of a video generation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Accepted, not yet dispatched.
    Pending,
    /// Dispatched, no outcome yet.
    Processing,
    /// Finished with a video.
    Completed,
    /// Finished with an error.
    Failed,
}

impl VideoStatus {
    /// Stable token used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VideoStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Serialization(format!(
                "unknown video status: {other}"
            ))),
        }
    }
}

/// One video generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoGenerationRecord {
    /// Record id.
    pub id: Uuid,
    /// Source image as displayed (URL, path, or an inline summary).
    pub image_ref: String,
    /// Driving audio for lip-sync, as displayed.
    pub audio_ref: Option<String>,
    /// Prompt as the caller sent it.
    pub prompt: String,
    /// Prompt as it was dispatched.
    pub sanitized_prompt: String,
    /// Target provider.
    pub provider: ProviderId,
    /// Upstream model identifier.
    pub model: String,
    /// Pricing tier.
    pub mode: GenerationMode,
    /// Requested duration.
    pub duration_secs: u32,
    /// Whether audio was requested.
    pub with_audio: bool,
    /// Current status.
    pub status: VideoStatus,
    /// Locator of the finished video.
    pub video_url: Option<String>,
    /// Cost charged, once completed.
    pub cost: Option<f64>,
    /// Error text, once failed.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl VideoGenerationRecord {
    /// A fresh `processing` record. Model and mode come from the provider catalog.
    pub fn processing(
        image_ref: impl Into<String>,
        prompt: impl Into<String>,
        sanitized_prompt: impl Into<String>,
        provider: ProviderId,
        duration_secs: u32,
        with_audio: bool,
    ) -> Self {
        let now = Utc::now();
        let spec = provider.spec();
        Self {
            id: Uuid::new_v4(),
            image_ref: image_ref.into(),
            audio_ref: None,
            prompt: prompt.into(),
            sanitized_prompt: sanitized_prompt.into(),
            provider,
            model: spec.model.to_string(),
            mode: spec.mode,
            duration_secs,
            with_audio,
            status: VideoStatus::Processing,
            video_url: None,
            cost: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attaches the driving audio reference.
    pub fn with_audio_ref(mut self, audio_ref: Option<String>) -> Self {
        self.audio_ref = audio_ref;
        self
    }
}

/// A stored image analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysisRecord {
    /// Record id.
    pub id: Uuid,
    /// Analyzed image as displayed.
    pub image_ref: String,
    /// Scene description.
    pub description: String,
    /// Subject category, e.g. `person`.
    pub subject_type: String,
    /// Model the analyzer recommended, as it named it.
    pub recommended_model: String,
    /// Why that model.
    pub reason: String,
    /// Prompting tips.
    pub tips: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A stored text-to-speech result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioGenerationRecord {
    /// Record id.
    pub id: Uuid,
    /// Spoken text.
    pub text: String,
    /// Voice used.
    pub voice_id: String,
    /// Audio locator (`data:` URL).
    pub audio_url: String,
    /// Estimated duration in seconds.
    pub duration_secs: f64,
    /// Cost charged.
    pub cost: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// One billable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Record id.
    pub id: Uuid,
    /// Billing service (`fal_ai`, `google`, `huggingface`, `elevenlabs`).
    pub service: String,
    /// What was done, e.g. `video_generation`.
    pub operation: String,
    /// Amount in USD.
    pub cost: f64,
    /// Free-form context (provider id, duration).
    pub details: Option<String>,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

impl TokenUsage {
    /// A usage entry stamped now.
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        cost: f64,
        details: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            operation: operation.into(),
            cost,
            details,
            created_at: Utc::now(),
        }
    }
}

/// Prepaid balance for one billing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiBalance {
    /// Billing service.
    pub service: String,
    /// Amount loaded, in USD.
    pub initial_balance: f64,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// Spend against one service's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBalance {
    /// Billing service.
    pub service: String,
    /// Amount loaded.
    pub initial: f64,
    /// Amount spent so far.
    pub spent: f64,
    /// `initial - spent`.
    pub remaining: f64,
}

/// Aggregated spend, rounded to cents for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Total across every service.
    pub total_spent: f64,
    /// Spend per billing service.
    pub by_service: BTreeMap<String, f64>,
    /// Most recent operations, newest first.
    pub recent: Vec<TokenUsage>,
    /// One entry per service with a configured balance.
    pub balances: Vec<ServiceBalance>,
}

impl UsageSummary {
    /// Aggregates usage entries against configured balances.
    ///
    /// Sums are taken at full precision and rounded once at the end.
    pub fn compute(usage: &[TokenUsage], balances: &[ApiBalance]) -> Self {
        let mut by_service: BTreeMap<String, f64> = BTreeMap::new();
        for entry in usage {
            *by_service.entry(entry.service.clone()).or_default() += entry.cost;
        }
        let total: f64 = by_service.values().sum();

        let mut recent: Vec<TokenUsage> = usage.to_vec();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(RECENT_OPERATIONS);

        let balances = balances
            .iter()
            .map(|b| {
                let spent = by_service.get(&b.service).copied().unwrap_or(0.0);
                ServiceBalance {
                    service: b.service.clone(),
                    initial: round_cents(b.initial_balance),
                    spent: round_cents(spent),
                    remaining: round_cents(b.initial_balance - spent),
                }
            })
            .collect();

        Self {
            total_spent: round_cents(total),
            by_service: by_service
                .into_iter()
                .map(|(service, spent)| (service, round_cents(spent)))
                .collect(),
            recent,
            balances,
        }
    }
}

/// Storage for generation history and spend.
///
/// Implementations must be safe to share across tasks. Callers around a
/// generation treat every write as best-effort.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Inserts a new video record.
    async fn insert_video(&self, record: &VideoGenerationRecord) -> StoreResult<()>;

    /// Marks a video record completed with the duration actually generated.
    async fn complete_video(
        &self,
        id: Uuid,
        video_url: &str,
        duration_secs: u32,
        cost: f64,
    ) -> StoreResult<()>;

    /// Marks a video record failed.
    async fn fail_video(&self, id: Uuid, error: &str) -> StoreResult<()>;

    /// Fetches one video record.
    async fn get_video(&self, id: Uuid) -> StoreResult<Option<VideoGenerationRecord>>;

    /// Lists video records, newest first.
    async fn list_videos(
        &self,
        status: Option<VideoStatus>,
        limit: usize,
    ) -> StoreResult<Vec<VideoGenerationRecord>>;

    /// Deletes a video record. Returns whether it existed.
    async fn delete_video(&self, id: Uuid) -> StoreResult<bool>;

    /// Inserts an image analysis.
    async fn insert_analysis(&self, record: &ImageAnalysisRecord) -> StoreResult<()>;

    /// Lists image analyses, newest first.
    async fn list_analyses(&self, limit: usize) -> StoreResult<Vec<ImageAnalysisRecord>>;

    /// Deletes an image analysis. Returns whether it existed.
    async fn delete_analysis(&self, id: Uuid) -> StoreResult<bool>;

    /// Inserts an audio generation.
    async fn insert_audio(&self, record: &AudioGenerationRecord) -> StoreResult<()>;

    /// Lists audio generations, newest first.
    async fn list_audio(&self, limit: usize) -> StoreResult<Vec<AudioGenerationRecord>>;

    /// Deletes an audio generation. Returns whether it existed.
    async fn delete_audio(&self, id: Uuid) -> StoreResult<bool>;

    /// Appends a usage entry.
    async fn record_usage(&self, usage: &TokenUsage) -> StoreResult<()>;

    /// Lists usage entries, newest first.
    async fn list_usage(&self, limit: usize) -> StoreResult<Vec<TokenUsage>>;

    /// Sets a service's initial balance.
    async fn upsert_balance(&self, service: &str, initial_balance: f64) -> StoreResult<()>;

    /// Lists configured balances by service name.
    async fn list_balances(&self) -> StoreResult<Vec<ApiBalance>>;

    /// Aggregated spend over every usage entry.
    async fn usage_summary(&self) -> StoreResult<UsageSummary> {
        let usage = self.list_usage(usize::MAX).await?;
        let balances = self.list_balances().await?;
        Ok(UsageSummary::compute(&usage, &balances))
    }

    /// Releases resources. Further calls may fail.
    async fn close(&self) {}
}
