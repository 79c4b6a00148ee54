//! Image-to-video generation.
//!
//! [`Dispatcher`] is the entry point: it checks [`ProviderAvailability`],
//! sanitizes the prompt, calls one [`VideoProvider`] adapter and classifies
//! failures into [`GenerationError`].

mod availability;
mod catalog;
mod classify;
mod dispatcher;
pub mod pricing;
mod provider;
pub mod providers;
mod types;

pub use availability::ProviderAvailability;
pub use catalog::{AudioSupport, DurationPolicy, ProviderFamily, ProviderSpec};
pub use classify::{classify, ErrorKind, ErrorResponse, GenerationError};
pub use dispatcher::{Dispatcher, ProviderInfo};
pub use pricing::PriceEntry;
pub use provider::VideoProvider;
pub use types::{
    AspectRatio, GenerationMode, GenerationStatus, ImageRef, ProviderId, VideoGenerationRequest,
    VideoGenerationResult, VideoMetadata,
};
