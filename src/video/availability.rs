//! Credential-based provider availability.

use crate::config::Config;
use crate::video::types::ProviderId;
use std::collections::BTreeMap;
use std::path::Path;

/// Which providers have usable credentials.
///
/// Computed once at startup; never mutated afterwards. Share it behind an
/// `Arc` and read it from any task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderAvailability {
    available: BTreeMap<ProviderId, bool>,
}

impl ProviderAvailability {
    /// Inspects the configuration. Never fails: a missing credential is logged
    /// and marks its providers unavailable.
    pub fn detect(config: &Config) -> Self {
        let fal = config.fal_key.is_some();
        let gemini = config.gemini_key.is_some();
        let vertex = config.vertex_api_key.is_some()
            || (config.gcp_project_id.is_some()
                && config
                    .google_credentials
                    .as_deref()
                    .is_some_and(credentials_file_usable));
        let hugging_face = config.hf_token.is_some();

        let available: BTreeMap<ProviderId, bool> = ProviderId::ALL
            .into_iter()
            .map(|id| {
                let ok = match id {
                    ProviderId::FalVeo3 | ProviderId::FalSora2 | ProviderId::FalWav2lip => fal,
                    ProviderId::GoogleVeo31Gemini => gemini,
                    ProviderId::GoogleVeo3 => vertex,
                    ProviderId::OpenSora => hugging_face,
                };
                (id, ok)
            })
            .collect();

        if !fal {
            tracing::warn!("FAL_KEY not set; fal.ai providers unavailable");
        }
        if !gemini {
            tracing::warn!("GEMINI_KEY not set; Veo 3.1 (Gemini API) unavailable");
        }
        if !vertex {
            tracing::warn!(
                "neither GOOGLE_VERTEX_API_KEY nor a service account \
                 (GOOGLE_CLOUD_PROJECT_ID + GOOGLE_APPLICATION_CREDENTIALS) is configured; \
                 Veo 3.1 (Vertex AI) unavailable"
            );
        }
        if !hugging_face {
            tracing::warn!("HF_TOKEN not set; Open-Sora unavailable");
        }
        for (id, ok) in &available {
            tracing::info!(provider = %id, available = *ok, "provider availability");
        }

        Self { available }
    }

    /// Builds a map directly. Providers not listed are unavailable.
    pub fn from_map(entries: impl IntoIterator<Item = (ProviderId, bool)>) -> Self {
        let mut available: BTreeMap<ProviderId, bool> =
            ProviderId::ALL.into_iter().map(|id| (id, false)).collect();
        available.extend(entries);
        Self { available }
    }

    /// Whether `provider` can be invoked.
    pub fn is_available(&self, provider: ProviderId) -> bool {
        self.available.get(&provider).copied().unwrap_or(false)
    }

    /// Every provider with its availability.
    pub fn all_available(&self) -> &BTreeMap<ProviderId, bool> {
        &self.available
    }

    /// Providers that can be invoked, in display order.
    pub fn enabled(&self) -> impl Iterator<Item = ProviderId> + '_ {
        self.available
            .iter()
            .filter(|(_, ok)| **ok)
            .map(|(id, _)| *id)
    }
}

/// A credentials file counts only if it exists and is non-empty.
fn credentials_file_usable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
    }

    #[test]
    fn test_nothing_configured() {
        let availability = ProviderAvailability::detect(&config(&[]));
        assert_eq!(availability.all_available().len(), ProviderId::ALL.len());
        assert!(availability.all_available().values().all(|ok| !ok));
        assert_eq!(availability.enabled().count(), 0);
    }

    #[test]
    fn test_fal_key_enables_fal_family() {
        let availability = ProviderAvailability::detect(&config(&[("FAL_KEY", "k")]));
        assert!(availability.is_available(ProviderId::FalVeo3));
        assert!(availability.is_available(ProviderId::FalSora2));
        assert!(availability.is_available(ProviderId::FalWav2lip));
        assert!(!availability.is_available(ProviderId::GoogleVeo31Gemini));
        assert!(!availability.is_available(ProviderId::OpenSora));
    }

    #[test]
    fn test_vertex_api_key() {
        let availability =
            ProviderAvailability::detect(&config(&[("GOOGLE_VERTEX_API_KEY", "AIza-test")]));
        assert!(availability.is_available(ProviderId::GoogleVeo3));
    }

    #[test]
    fn test_vertex_service_account_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let availability = ProviderAvailability::detect(&config(&[
            ("GOOGLE_CLOUD_PROJECT_ID", "proj"),
            ("GOOGLE_APPLICATION_CREDENTIALS", missing.to_str().unwrap()),
        ]));
        assert!(!availability.is_available(ProviderId::GoogleVeo3));

        let empty = dir.path().join("empty.json");
        std::fs::File::create(&empty).unwrap();
        let availability = ProviderAvailability::detect(&config(&[
            ("GOOGLE_CLOUD_PROJECT_ID", "proj"),
            ("GOOGLE_APPLICATION_CREDENTIALS", empty.to_str().unwrap()),
        ]));
        assert!(!availability.is_available(ProviderId::GoogleVeo3));

        let key = dir.path().join("sa.json");
        let mut file = std::fs::File::create(&key).unwrap();
        writeln!(file, "{{\"type\": \"service_account\"}}").unwrap();
        let availability = ProviderAvailability::detect(&config(&[
            ("GOOGLE_CLOUD_PROJECT_ID", "proj"),
            ("GOOGLE_APPLICATION_CREDENTIALS", key.to_str().unwrap()),
        ]));
        assert!(availability.is_available(ProviderId::GoogleVeo3));

        // A key file without a project is not enough.
        let availability = ProviderAvailability::detect(&config(&[(
            "GOOGLE_APPLICATION_CREDENTIALS",
            key.to_str().unwrap(),
        )]));
        assert!(!availability.is_available(ProviderId::GoogleVeo3));
    }

    #[test]
    fn test_from_map_defaults_to_unavailable() {
        let availability = ProviderAvailability::from_map([(ProviderId::OpenSora, true)]);
        assert!(availability.is_available(ProviderId::OpenSora));
        assert!(!availability.is_available(ProviderId::FalVeo3));
        assert_eq!(availability.enabled().collect::<Vec<_>>(), vec![ProviderId::OpenSora]);
    }
}
