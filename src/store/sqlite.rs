//! SQLite-backed store.

use super::{
    ApiBalance, AudioGenerationRecord, GenerationStore, ImageAnalysisRecord, StoreError,
    StoreResult, TokenUsage, VideoGenerationRecord, VideoStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Column list for `video_generations` queries.
const VIDEO_COLUMNS: &str = "\
    id, image_ref, audio_ref, prompt, sanitized_prompt, provider, model, mode, \
    duration_secs, with_audio, status, video_url, cost, error, created_at, updated_at";

/// Column list for `image_analyses` queries.
const ANALYSIS_COLUMNS: &str = "\
    id, image_ref, description, subject_type, recommended_model, reason, tips_json, created_at";

/// Column list for `audio_generations` queries.
const AUDIO_COLUMNS: &str = "id, text, voice_id, audio_url, duration_secs, cost, created_at";

/// Column list for `token_usage` queries.
const USAGE_COLUMNS: &str = "id, service, operation, cost, details, created_at";

/// Store persisted in a SQLite database. Schema migrations run on connect.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to a database URL such as `sqlite://./database/video_gen.db?mode=rwc`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Opens (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database on a single connection.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("sqlite store ready");
        Ok(Self { pool })
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_id(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Serialization(format!("bad id {raw}: {e}")))
}

// Row types

#[derive(sqlx::FromRow)]
struct VideoRow {
    id: String,
    image_ref: String,
    audio_ref: Option<String>,
    prompt: String,
    sanitized_prompt: String,
    provider: String,
    model: String,
    mode: String,
    duration_secs: i64,
    with_audio: bool,
    status: String,
    video_url: Option<String>,
    cost: Option<f64>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<VideoRow> for VideoGenerationRecord {
    type Error = StoreError;

    fn try_from(row: VideoRow) -> StoreResult<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            image_ref: row.image_ref,
            audio_ref: row.audio_ref,
            prompt: row.prompt,
            sanitized_prompt: row.sanitized_prompt,
            provider: row
                .provider
                .parse()
                .map_err(|e| StoreError::Serialization(format!("{e}")))?,
            model: row.model,
            mode: row
                .mode
                .parse()
                .map_err(|e| StoreError::Serialization(format!("{e}")))?,
            duration_secs: u32::try_from(row.duration_secs)
                .map_err(|e| StoreError::Serialization(format!("bad duration: {e}")))?,
            with_audio: row.with_audio,
            status: row.status.parse()?,
            video_url: row.video_url,
            cost: row.cost,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AnalysisRow {
    id: String,
    image_ref: String,
    description: String,
    subject_type: String,
    recommended_model: String,
    reason: String,
    tips_json: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AnalysisRow> for ImageAnalysisRecord {
    type Error = StoreError;

    fn try_from(row: AnalysisRow) -> StoreResult<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            image_ref: row.image_ref,
            description: row.description,
            subject_type: row.subject_type,
            recommended_model: row.recommended_model,
            reason: row.reason,
            tips: serde_json::from_str(&row.tips_json)
                .map_err(|e| StoreError::Serialization(format!("bad tips: {e}")))?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AudioRow {
    id: String,
    text: String,
    voice_id: String,
    audio_url: String,
    duration_secs: f64,
    cost: f64,
    created_at: DateTime<Utc>,
}

impl TryFrom<AudioRow> for AudioGenerationRecord {
    type Error = StoreError;

    fn try_from(row: AudioRow) -> StoreResult<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            text: row.text,
            voice_id: row.voice_id,
            audio_url: row.audio_url,
            duration_secs: row.duration_secs,
            cost: row.cost,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    id: String,
    service: String,
    operation: String,
    cost: f64,
    details: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UsageRow> for TokenUsage {
    type Error = StoreError;

    fn try_from(row: UsageRow) -> StoreResult<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            service: row.service,
            operation: row.operation,
            cost: row.cost,
            details: row.details,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BalanceRow {
    service: String,
    initial_balance: f64,
    updated_at: DateTime<Utc>,
}

impl From<BalanceRow> for ApiBalance {
    fn from(row: BalanceRow) -> Self {
        Self {
            service: row.service,
            initial_balance: row.initial_balance,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl GenerationStore for SqliteStore {
    async fn insert_video(&self, record: &VideoGenerationRecord) -> StoreResult<()> {
        let query = format!(
            "INSERT INTO video_generations ({VIDEO_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&query)
            .bind(record.id.to_string())
            .bind(&record.image_ref)
            .bind(&record.audio_ref)
            .bind(&record.prompt)
            .bind(&record.sanitized_prompt)
            .bind(record.provider.as_str())
            .bind(&record.model)
            .bind(record.mode.as_str())
            .bind(i64::from(record.duration_secs))
            .bind(record.with_audio)
            .bind(record.status.as_str())
            .bind(&record.video_url)
            .bind(record.cost)
            .bind(&record.error)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_video(
        &self,
        id: Uuid,
        video_url: &str,
        duration_secs: u32,
        cost: f64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE video_generations \
             SET status = ?, video_url = ?, duration_secs = ?, cost = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(VideoStatus::Completed.as_str())
        .bind(video_url)
        .bind(i64::from(duration_secs))
        .bind(cost)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("video generation {id}")));
        }
        Ok(())
    }

    async fn fail_video(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE video_generations SET status = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(VideoStatus::Failed.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("video generation {id}")));
        }
        Ok(())
    }

    async fn get_video(&self, id: Uuid) -> StoreResult<Option<VideoGenerationRecord>> {
        let query = format!("SELECT {VIDEO_COLUMNS} FROM video_generations WHERE id = ?");
        sqlx::query_as::<_, VideoRow>(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(VideoGenerationRecord::try_from)
            .transpose()
    }

    async fn list_videos(
        &self,
        status: Option<VideoStatus>,
        limit: usize,
    ) -> StoreResult<Vec<VideoGenerationRecord>> {
        let where_clause = if status.is_some() {
            "WHERE status = ?"
        } else {
            ""
        };
        let query = format!(
            "SELECT {VIDEO_COLUMNS} FROM video_generations {where_clause} \
             ORDER BY created_at DESC, rowid DESC LIMIT ?"
        );

        let mut q = sqlx::query_as::<_, VideoRow>(&query);
        if let Some(s) = status {
            q = q.bind(s.as_str());
        }
        q.bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(VideoGenerationRecord::try_from)
            .collect()
    }

    async fn delete_video(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM video_generations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_analysis(&self, record: &ImageAnalysisRecord) -> StoreResult<()> {
        let tips = serde_json::to_string(&record.tips)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let query = format!(
            "INSERT INTO image_analyses ({ANALYSIS_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&query)
            .bind(record.id.to_string())
            .bind(&record.image_ref)
            .bind(&record.description)
            .bind(&record.subject_type)
            .bind(&record.recommended_model)
            .bind(&record.reason)
            .bind(tips)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_analyses(&self, limit: usize) -> StoreResult<Vec<ImageAnalysisRecord>> {
        let query = format!(
            "SELECT {ANALYSIS_COLUMNS} FROM image_analyses \
             ORDER BY created_at DESC, rowid DESC LIMIT ?"
        );
        sqlx::query_as::<_, AnalysisRow>(&query)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ImageAnalysisRecord::try_from)
            .collect()
    }

    async fn delete_analysis(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM image_analyses WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_audio(&self, record: &AudioGenerationRecord) -> StoreResult<()> {
        let query = format!("INSERT INTO audio_generations ({AUDIO_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&query)
            .bind(record.id.to_string())
            .bind(&record.text)
            .bind(&record.voice_id)
            .bind(&record.audio_url)
            .bind(record.duration_secs)
            .bind(record.cost)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_audio(&self, limit: usize) -> StoreResult<Vec<AudioGenerationRecord>> {
        let query = format!(
            "SELECT {AUDIO_COLUMNS} FROM audio_generations \
             ORDER BY created_at DESC, rowid DESC LIMIT ?"
        );
        sqlx::query_as::<_, AudioRow>(&query)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(AudioGenerationRecord::try_from)
            .collect()
    }

    async fn delete_audio(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM audio_generations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_usage(&self, usage: &TokenUsage) -> StoreResult<()> {
        let query = format!("INSERT INTO token_usage ({USAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)");
        sqlx::query(&query)
            .bind(usage.id.to_string())
            .bind(&usage.service)
            .bind(&usage.operation)
            .bind(usage.cost)
            .bind(&usage.details)
            .bind(usage.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_usage(&self, limit: usize) -> StoreResult<Vec<TokenUsage>> {
        let query = format!(
            "SELECT {USAGE_COLUMNS} FROM token_usage ORDER BY created_at DESC, rowid DESC LIMIT ?"
        );
        sqlx::query_as::<_, UsageRow>(&query)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TokenUsage::try_from)
            .collect()
    }

    async fn upsert_balance(&self, service: &str, initial_balance: f64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO api_balances (service, initial_balance, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(service) DO UPDATE SET \
                initial_balance = excluded.initial_balance, \
                updated_at = excluded.updated_at",
        )
        .bind(service)
        .bind(initial_balance)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_balances(&self) -> StoreResult<Vec<ApiBalance>> {
        let rows = sqlx::query_as::<_, BalanceRow>(
            "SELECT service, initial_balance, updated_at FROM api_balances ORDER BY service",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ApiBalance::from).collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
