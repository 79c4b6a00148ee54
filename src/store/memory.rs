//! In-process store.

use super::{
    ApiBalance, AudioGenerationRecord, GenerationStore, ImageAnalysisRecord, StoreError,
    StoreResult, TokenUsage, VideoGenerationRecord, VideoStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Store backed by in-memory vectors. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    videos: RwLock<Vec<VideoGenerationRecord>>,
    analyses: RwLock<Vec<ImageAnalysisRecord>>,
    audio: RwLock<Vec<AudioGenerationRecord>>,
    usage: RwLock<Vec<TokenUsage>>,
    balances: RwLock<BTreeMap<String, ApiBalance>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first; later insertions win ties.
fn newest_first<T: Clone>(items: &[T], created: impl Fn(&T) -> chrono::DateTime<Utc>, limit: usize) -> Vec<T> {
    let mut out: Vec<T> = items.iter().rev().cloned().collect();
    out.sort_by(|a, b| created(b).cmp(&created(a)));
    out.truncate(limit);
    out
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn insert_video(&self, record: &VideoGenerationRecord) -> StoreResult<()> {
        self.videos.write().await.push(record.clone());
        Ok(())
    }

    async fn complete_video(
        &self,
        id: Uuid,
        video_url: &str,
        duration_secs: u32,
        cost: f64,
    ) -> StoreResult<()> {
        let mut videos = self.videos.write().await;
        let record = videos
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("video generation {id}")))?;
        record.status = VideoStatus::Completed;
        record.video_url = Some(video_url.to_string());
        record.duration_secs = duration_secs;
        record.cost = Some(cost);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_video(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let mut videos = self.videos.write().await;
        let record = videos
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("video generation {id}")))?;
        record.status = VideoStatus::Failed;
        record.error = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get_video(&self, id: Uuid) -> StoreResult<Option<VideoGenerationRecord>> {
        Ok(self.videos.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn list_videos(
        &self,
        status: Option<VideoStatus>,
        limit: usize,
    ) -> StoreResult<Vec<VideoGenerationRecord>> {
        let videos = self.videos.read().await;
        let matching: Vec<VideoGenerationRecord> = videos
            .iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        Ok(newest_first(&matching, |r| r.created_at, limit))
    }

    async fn delete_video(&self, id: Uuid) -> StoreResult<bool> {
        let mut videos = self.videos.write().await;
        let before = videos.len();
        videos.retain(|r| r.id != id);
        Ok(videos.len() != before)
    }

    async fn insert_analysis(&self, record: &ImageAnalysisRecord) -> StoreResult<()> {
        self.analyses.write().await.push(record.clone());
        Ok(())
    }

    async fn list_analyses(&self, limit: usize) -> StoreResult<Vec<ImageAnalysisRecord>> {
        Ok(newest_first(&self.analyses.read().await[..], |r| r.created_at, limit))
    }

    async fn delete_analysis(&self, id: Uuid) -> StoreResult<bool> {
        let mut analyses = self.analyses.write().await;
        let before = analyses.len();
        analyses.retain(|r| r.id != id);
        Ok(analyses.len() != before)
    }

    async fn insert_audio(&self, record: &AudioGenerationRecord) -> StoreResult<()> {
        self.audio.write().await.push(record.clone());
        Ok(())
    }

    async fn list_audio(&self, limit: usize) -> StoreResult<Vec<AudioGenerationRecord>> {
        Ok(newest_first(&self.audio.read().await[..], |r| r.created_at, limit))
    }

    async fn delete_audio(&self, id: Uuid) -> StoreResult<bool> {
        let mut audio = self.audio.write().await;
        let before = audio.len();
        audio.retain(|r| r.id != id);
        Ok(audio.len() != before)
    }

    async fn record_usage(&self, usage: &TokenUsage) -> StoreResult<()> {
        self.usage.write().await.push(usage.clone());
        Ok(())
    }

    async fn list_usage(&self, limit: usize) -> StoreResult<Vec<TokenUsage>> {
        Ok(newest_first(&self.usage.read().await[..], |u| u.created_at, limit))
    }

    async fn upsert_balance(&self, service: &str, initial_balance: f64) -> StoreResult<()> {
        self.balances.write().await.insert(
            service.to_string(),
            ApiBalance {
                service: service.to_string(),
                initial_balance,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_balances(&self) -> StoreResult<Vec<ApiBalance>> {
        Ok(self.balances.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::ProviderId;

    fn record(provider: ProviderId) -> VideoGenerationRecord {
        VideoGenerationRecord::processing("https://x/y.jpg", "p", "p", provider, 8, false)
    }

    #[tokio::test]
    async fn test_video_lifecycle() {
        let store = MemoryStore::new();
        let ok = record(ProviderId::FalVeo3);
        let bad = record(ProviderId::FalSora2);
        store.insert_video(&ok).await.unwrap();
        store.insert_video(&bad).await.unwrap();

        store.complete_video(ok.id, "https://v/1.mp4", 8, 1.6).await.unwrap();
        store.fail_video(bad.id, "HTTP 503").await.unwrap();

        let done = store.get_video(ok.id).await.unwrap().unwrap();
        assert_eq!(done.status, VideoStatus::Completed);
        assert_eq!(done.video_url.as_deref(), Some("https://v/1.mp4"));
        assert_eq!(done.cost, Some(1.6));

        let failed = store.list_videos(Some(VideoStatus::Failed), 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("HTTP 503"));

        let all = store.list_videos(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.list_videos(None, 1).await.unwrap().len(), 1);

        assert!(store.delete_video(ok.id).await.unwrap());
        assert!(!store.delete_video(ok.id).await.unwrap());
        assert!(store.get_video(ok.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .complete_video(Uuid::new_v4(), "https://v/1.mp4", 8, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_newest_first() {
        let store = MemoryStore::new();
        let first = record(ProviderId::FalVeo3);
        let mut second = record(ProviderId::OpenSora);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        store.insert_video(&first).await.unwrap();
        store.insert_video(&second).await.unwrap();

        let listed = store.list_videos(None, 10).await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn test_usage_summary_via_trait() {
        let store = MemoryStore::new();
        store.upsert_balance("fal_ai", 10.0).await.unwrap();
        store.upsert_balance("fal_ai", 25.0).await.unwrap();
        store
            .record_usage(&TokenUsage::new("fal_ai", "video_generation", 3.2, None))
            .await
            .unwrap();

        let summary = store.usage_summary().await.unwrap();
        assert_eq!(summary.total_spent, 3.2);
        assert_eq!(summary.balances.len(), 1);
        assert_eq!(summary.balances[0].initial, 25.0);
        assert_eq!(summary.balances[0].remaining, 21.8);
    }
}
