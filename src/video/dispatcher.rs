//! Request orchestration.
//!
//! A request moves through `validating → sanitizing → dispatching` and ends
//! either `succeeded` or `failed`. The adapter is called exactly once; there is
//! no fallback to another provider and no automatic retry.

use crate::config::Config;
use crate::error::ProviderError;
use crate::sanitize::Sanitizer;
use crate::store::{GenerationStore, TokenUsage, VideoGenerationRecord};
use crate::video::availability::ProviderAvailability;
use crate::video::catalog::ProviderFamily;
use crate::video::classify::{classify, GenerationError};
use crate::video::pricing;
use crate::video::provider::VideoProvider;
use crate::video::providers::{
    FalProvider, OpenSoraProvider, ServiceAccountKey, ServiceAccountTokenSource, VeoProvider,
};
use crate::video::types::{
    GenerationMode, ProviderId, VideoGenerationRequest, VideoGenerationResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Provider entry for a selection UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    /// Whether the provider can be invoked right now.
    pub available: bool,
    /// Display name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// USD per second without audio.
    pub cost_per_second: f64,
    /// USD per second with audio.
    pub cost_per_second_with_audio: f64,
    /// Longest video the provider produces, in seconds.
    pub max_duration: u32,
    /// Whether an audio track can be produced.
    pub supports_audio: bool,
    /// Free-tier providers never cost anything.
    pub free_tier: bool,
    /// Pricing tier.
    pub mode: GenerationMode,
}

/// Routes generation requests to provider adapters.
///
/// Holds the read-only availability map, one adapter per usable provider, the
/// sanitizer and the store. Share it behind an `Arc`; every method takes
/// `&self`.
pub struct Dispatcher {
    availability: ProviderAvailability,
    providers: BTreeMap<ProviderId, Arc<dyn VideoProvider>>,
    sanitizer: Arc<Sanitizer>,
    store: Arc<dyn GenerationStore>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("availability", &self.availability)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("sanitizer", &self.sanitizer.version())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dispatcher {
    /// A dispatcher with no adapters registered. Use
    /// [`with_provider`](Self::with_provider) to add them.
    pub fn new(availability: ProviderAvailability, store: Arc<dyn GenerationStore>) -> Self {
        Self {
            availability,
            providers: BTreeMap::new(),
            sanitizer: Arc::new(Sanitizer::default()),
            store,
            timeout: None,
        }
    }

    /// Detects availability and builds an adapter for every provider that has
    /// credentials.
    ///
    /// Never fails. A provider whose adapter cannot be built (an unreadable
    /// service-account file, say) is logged and marked unavailable.
    pub fn from_config(config: &Config, store: Arc<dyn GenerationStore>) -> Self {
        let detected = ProviderAvailability::detect(config);
        let mut service_account = None;
        let mut providers: BTreeMap<ProviderId, Arc<dyn VideoProvider>> = BTreeMap::new();

        for id in detected.enabled() {
            match build_adapter(id, config, &mut service_account) {
                Ok(adapter) => {
                    providers.insert(id, adapter);
                }
                Err(err) => {
                    tracing::warn!(provider = %id, error = %err, "could not build adapter; provider disabled");
                }
            }
        }

        let availability = ProviderAvailability::from_map(
            detected
                .all_available()
                .iter()
                .map(|(id, ok)| (*id, *ok && providers.contains_key(id))),
        );

        Self {
            availability,
            providers,
            sanitizer: Arc::new(Sanitizer::default()),
            store,
            timeout: config.timeout_override,
        }
    }

    /// Registers an adapter under its own id.
    pub fn with_provider(mut self, provider: Arc<dyn VideoProvider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    /// Replaces the built-in sanitizer.
    pub fn with_sanitizer(mut self, sanitizer: Arc<Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Bounds every adapter call by `timeout` instead of the provider default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Availability as computed at startup.
    pub fn availability(&self) -> &ProviderAvailability {
        &self.availability
    }

    /// Whether `provider` would pass validation.
    pub fn is_available(&self, provider: ProviderId) -> bool {
        self.availability.is_available(provider) && self.providers.contains_key(&provider)
    }

    /// Store records are written to.
    pub fn store(&self) -> &Arc<dyn GenerationStore> {
        &self.store
    }

    /// Every known provider with its availability and prices. No side effects.
    pub fn list_available_providers(&self) -> BTreeMap<ProviderId, ProviderInfo> {
        ProviderId::ALL
            .into_iter()
            .map(|id| {
                let spec = id.spec();
                let price = id.price();
                let info = ProviderInfo {
                    available: self.is_available(id),
                    name: spec.name,
                    description: spec.description,
                    cost_per_second: price.rate(false),
                    cost_per_second_with_audio: price.rate(true),
                    max_duration: spec.duration.max(),
                    supports_audio: spec.audio.supported(),
                    free_tier: price.free_tier,
                    mode: spec.mode,
                };
                (id, info)
            })
            .collect()
    }

    /// Cost of a request before it is made. Pure.
    pub fn estimate_cost(&self, provider: ProviderId, duration_secs: u32, with_audio: bool) -> f64 {
        pricing::estimate(provider, duration_secs, with_audio)
    }

    /// Runs one generation request.
    ///
    /// The returned result is the adapter's, unchanged. On failure the error is
    /// classified; the stored record, if one was created, is marked failed.
    pub async fn generate_video(
        &self,
        request: VideoGenerationRequest,
    ) -> Result<VideoGenerationResult, GenerationError> {
        self.generate_video_with_record(request)
            .await
            .map(|(_, result)| result)
    }

    /// Like [`generate_video`](Self::generate_video), also returning the id of
    /// the stored record when the store accepted it.
    pub async fn generate_video_with_record(
        &self,
        mut request: VideoGenerationRequest,
    ) -> Result<(Option<Uuid>, VideoGenerationResult), GenerationError> {
        let provider = request.provider;
        let adapter = self.validate(provider)?;

        let sanitized = self.sanitizer.clean(&request.prompt);
        if sanitized.altered {
            tracing::info!(
                provider = %provider,
                original_len = request.prompt.chars().count(),
                sanitized_len = sanitized.text.chars().count(),
                removed_phrases = sanitized.removed_phrases,
                softened_terms = sanitized.softened_terms,
                "prompt sanitized"
            );
        } else {
            tracing::debug!(provider = %provider, "prompt unchanged by sanitizer");
        }

        let record = VideoGenerationRecord::processing(
            request.image.to_string(),
            request.prompt.as_str(),
            sanitized.text.as_str(),
            provider,
            request.duration_secs,
            request.with_audio,
        )
        .with_audio_ref(request.audio_url.as_deref().map(describe_audio_ref));
        let record_id = match self.store.insert_video(&record).await {
            Ok(()) => Some(record.id),
            Err(err) => {
                tracing::warn!(provider = %provider, error = %err, "could not store generation record");
                None
            }
        };

        request.prompt = sanitized.text;
        let started = Instant::now();
        tracing::info!(
            provider = %provider,
            duration_secs = request.duration_secs,
            with_audio = request.with_audio,
            aspect_ratio = %request.aspect_ratio,
            "dispatching generation"
        );

        match self.dispatch(adapter, request).await {
            Ok(result) => {
                tracing::info!(
                    provider = %provider,
                    cost = result.cost(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation succeeded"
                );
                self.record_success(record_id, &result).await;
                Ok((record_id, result))
            }
            Err(err) => {
                let classified = classify(&err);
                tracing::error!(
                    provider = %provider,
                    kind = %classified.kind(),
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation failed"
                );
                self.record_failure(record_id, &err).await;
                Err(classified)
            }
        }
    }

    fn validate(&self, provider: ProviderId) -> Result<Arc<dyn VideoProvider>, GenerationError> {
        if !self.availability.is_available(provider) {
            return Err(GenerationError::Configuration {
                provider,
                reason: "no credentials configured".into(),
            });
        }
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| GenerationError::Configuration {
                provider,
                reason: "no adapter registered".into(),
            })
    }

    /// Runs the adapter on its own task, bounded by the provider timeout. On
    /// timeout the local task is dropped; the upstream job may keep running.
    async fn dispatch(
        &self,
        adapter: Arc<dyn VideoProvider>,
        request: VideoGenerationRequest,
    ) -> Result<VideoGenerationResult, ProviderError> {
        let limit = self
            .timeout
            .unwrap_or(request.provider.spec().default_timeout);
        let mut task = tokio::spawn(async move { adapter.generate(&request).await });

        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ProviderError::VideoGeneration(format!(
                "adapter task ended abnormally: {join}"
            ))),
            Err(_) => {
                task.abort();
                Err(ProviderError::Timeout(limit))
            }
        }
    }

    async fn record_success(&self, record_id: Option<Uuid>, result: &VideoGenerationResult) {
        let provider = result.provider();
        if let Some(id) = record_id {
            if let Err(err) = self
                .store
                .complete_video(id, result.video_url(), result.duration_secs(), result.cost())
                .await
            {
                tracing::warn!(%id, error = %err, "could not mark generation completed");
            }
        }

        let usage = TokenUsage::new(
            provider.spec().family.service_name(),
            "video_generation",
            pricing::actual(result),
            Some(format!(
                "{provider} {}s audio={}",
                result.duration_secs(),
                result.with_audio()
            )),
        );
        if let Err(err) = self.store.record_usage(&usage).await {
            tracing::warn!(provider = %provider, error = %err, "could not record usage");
        }
    }

    async fn record_failure(&self, record_id: Option<Uuid>, err: &ProviderError) {
        let Some(id) = record_id else {
            return;
        };
        if let Err(store_err) = self.store.fail_video(id, &err.to_string()).await {
            tracing::warn!(%id, error = %store_err, "could not mark generation failed");
        }
    }
}

/// Audio reference as stored: URLs as given, `data:` URIs summarized.
fn describe_audio_ref(reference: &str) -> String {
    match reference.strip_prefix("data:") {
        Some(rest) => {
            let mime = rest.split([';', ',']).next().unwrap_or_default();
            format!("<inline {mime}, {} chars>", rest.len())
        }
        None => reference.to_string(),
    }
}

/// Builds the adapter for one provider from configuration.
///
/// The Vertex service account is loaded once and shared.
fn build_adapter(
    id: ProviderId,
    config: &Config,
    service_account: &mut Option<Arc<ServiceAccountTokenSource>>,
) -> crate::error::Result<Arc<dyn VideoProvider>> {
    let timeout = config
        .timeout_override
        .unwrap_or(id.spec().default_timeout);

    let adapter: Arc<dyn VideoProvider> = match (id, id.spec().family) {
        (_, ProviderFamily::FalAi) => {
            let mut builder = FalProvider::builder(id).timeout(timeout);
            if let Some(key) = &config.fal_key {
                builder = builder.api_key(key);
            }
            Arc::new(builder.build()?)
        }
        (ProviderId::GoogleVeo31Gemini, _) => {
            let mut builder = VeoProvider::builder(id)
                .output_dir(&config.video_output_dir)
                .timeout(timeout);
            if let Some(key) = &config.gemini_key {
                builder = builder.api_key(key);
            }
            Arc::new(builder.build()?)
        }
        (ProviderId::GoogleVeo3, _) => {
            let mut builder = VeoProvider::builder(id)
                .location(&config.gcp_location)
                .output_dir(&config.video_output_dir)
                .timeout(timeout);
            if let Some(project) = &config.gcp_project_id {
                builder = builder.project(project);
            }
            match (&config.vertex_api_key, &config.google_credentials) {
                (Some(key), _) => builder = builder.api_key(key),
                (None, Some(path)) => {
                    let source = match service_account {
                        Some(source) => Arc::clone(source),
                        None => {
                            let key = ServiceAccountKey::from_file(path)?;
                            let source = Arc::new(ServiceAccountTokenSource::new(key));
                            *service_account = Some(Arc::clone(&source));
                            source
                        }
                    };
                    builder = builder.service_account(source);
                }
                (None, None) => {}
            }
            Arc::new(builder.build()?)
        }
        (_, ProviderFamily::HuggingFace) => {
            let mut builder = OpenSoraProvider::builder()
                .space_url(&config.open_sora_space_url)
                .timeout(timeout);
            if let Some(token) = &config.hf_token {
                builder = builder.token(token);
            }
            Arc::new(builder.build()?)
        }
        (other, _) => {
            return Err(ProviderError::InvalidRequest(format!(
                "no adapter for {other}"
            )))
        }
    };
    Ok(adapter)
}
