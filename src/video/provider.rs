//! Video provider trait.

use crate::error::Result;
use crate::video::pricing;
use crate::video::types::{ProviderId, VideoGenerationRequest, VideoGenerationResult, VideoMetadata};
use async_trait::async_trait;

/// One external image-to-video service.
///
/// An adapter translates a [`VideoGenerationRequest`] into its service's call
/// convention, waits for the job and normalizes the reply. It owns duration
/// translation, authentication and cost attribution; the dispatcher does none
/// of these.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Generates a video. The prompt has already been sanitized.
    async fn generate(&self, request: &VideoGenerationRequest) -> Result<VideoGenerationResult>;

    /// Provider this adapter serves.
    fn id(&self) -> ProviderId;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str {
        self.id().spec().name
    }

    /// Checks that credentials are present and, where cheap, accepted.
    async fn health_check(&self) -> Result<()>;
}

/// Builds the result for a finished job, billing the duration that was
/// actually submitted at the provider's own rate.
pub(crate) fn billed_result(
    provider: ProviderId,
    video_url: impl Into<String>,
    submitted_secs: u32,
    requested_audio: bool,
    metadata: VideoMetadata,
) -> Result<VideoGenerationResult> {
    let with_audio = provider.spec().audio.effective(requested_audio);
    let cost = pricing::cost_for(provider, submitted_secs, with_audio);
    VideoGenerationResult::success(video_url, provider, submitted_secs, cost, with_audio, metadata)
}
