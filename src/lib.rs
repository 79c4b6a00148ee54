#![warn(missing_docs)]
//! vidgen - multi-provider image-to-video generation.
//!
//! This crate animates a still image into a short video through one of several
//! hosted providers (fal.ai, Google Veo on the Gemini API or Vertex AI, an
//! Open-Sora Hugging Face Space) behind a single [`Dispatcher`]. Prompts are
//! sanitized before dispatch, costs come from a static per-second price table
//! and every attempt is recorded in a [`GenerationStore`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vidgen::{Config, Dispatcher, ImageRef, ProviderId, SqliteStore, VideoGenerationRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let store = Arc::new(SqliteStore::open(&config.db_path).await?);
//!     let dispatcher = Dispatcher::from_config(&config, store);
//!
//!     let request = VideoGenerationRequest::new(
//!         ProviderId::FalVeo3,
//!         ImageRef::parse("https://example.com/puppet.jpg")?,
//!         "The puppet waves at the camera",
//!     )
//!     .with_duration(8);
//!
//!     let video = dispatcher.generate_video(request).await?;
//!     println!("{} (${:.2})", video.video_url(), video.cost());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`video`]: dispatcher, provider adapters, cost model, availability and
//!   error classification
//! - [`sanitize`]: prompt rewriting ahead of dispatch
//! - [`image`]: source image analysis with Gemini
//! - [`speech`]: ElevenLabs text-to-speech
//! - [`store`]: generation history and spend tracking (memory or SQLite)
//! - [`config`]: environment-driven configuration

pub mod config;
mod error;
pub mod image;
pub mod sanitize;
pub mod speech;
pub mod store;
pub mod video;

pub use config::Config;
pub use error::{redact_secrets, sanitize_error_message, ProviderError, Result};
pub use image::{ImageAnalysis, ImageAnalyzer};
pub use sanitize::{SanitizedPrompt, Sanitizer};
pub use speech::{SpeechClient, SpeechResult, Voice, VoiceSettings};
pub use store::{GenerationStore, MemoryStore, SqliteStore, StoreError, UsageSummary};
pub use video::{
    AspectRatio, Dispatcher, ErrorKind, ErrorResponse, GenerationError, ImageRef, ProviderId,
    ProviderInfo, VideoGenerationRequest, VideoGenerationResult, VideoProvider,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ProviderError, Result};
    pub use crate::store::GenerationStore;
    pub use crate::video::{
        Dispatcher, GenerationError, ImageRef, ProviderId, VideoGenerationRequest, VideoProvider,
    };
}
