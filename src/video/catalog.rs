//! Static description of every supported provider.

use crate::video::types::{GenerationMode, ProviderId};
use serde::Serialize;
use std::time::Duration;

/// How a provider turns a requested duration into one it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPolicy {
    /// Always generates this many seconds, whatever was asked.
    Fixed(u32),
    /// Accepts only these values (ascending); requests snap up to the next
    /// one, or down to the largest.
    Choices(&'static [u32]),
    /// Accepts any whole number of seconds in `min..=max`.
    Clamp {
        /// Shortest accepted duration.
        min: u32,
        /// Longest accepted duration.
        max: u32,
    },
}

impl DurationPolicy {
    /// Duration that will actually be submitted for `requested` seconds.
    pub fn apply(&self, requested: u32) -> u32 {
        match *self {
            Self::Fixed(secs) => secs,
            Self::Choices(choices) => choices
                .iter()
                .copied()
                .find(|&c| c >= requested)
                .or_else(|| choices.last().copied())
                .unwrap_or(requested),
            Self::Clamp { min, max } => requested.clamp(min, max),
        }
    }

    /// Longest duration the provider produces.
    pub fn max(&self) -> u32 {
        match *self {
            Self::Fixed(secs) => secs,
            Self::Choices(choices) => choices.last().copied().unwrap_or(0),
            Self::Clamp { max, .. } => max,
        }
    }
}

/// Audio behaviour of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSupport {
    /// Generates audio only when asked.
    Optional,
    /// Always generates an audio track.
    Always,
    /// Cannot generate audio.
    Never,
    /// Drives the video from a caller-supplied audio track.
    RequiresReference,
}

impl AudioSupport {
    /// Whether the produced video has audio when `requested` was asked for.
    pub fn effective(&self, requested: bool) -> bool {
        match self {
            Self::Optional => requested,
            Self::Always | Self::RequiresReference => true,
            Self::Never => false,
        }
    }

    /// Whether the provider can produce a video with sound at all.
    pub fn supported(&self) -> bool {
        !matches!(self, Self::Never)
    }
}

/// Billing family, used as the service name in usage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// fal.ai queue API.
    FalAi,
    /// Google (Gemini API and Vertex AI).
    Google,
    /// Hugging Face Spaces.
    HuggingFace,
}

impl ProviderFamily {
    /// Service name recorded in the usage ledger.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::FalAi => "fal_ai",
            Self::Google => "google",
            Self::HuggingFace => "huggingface",
        }
    }
}

/// Everything the crate knows about a provider without calling it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderSpec {
    /// Identifier.
    pub id: ProviderId,
    /// Display name.
    pub name: &'static str,
    /// One-line description for selection UIs.
    pub description: &'static str,
    /// Upstream model identifier.
    pub model: &'static str,
    /// Billing family.
    pub family: ProviderFamily,
    /// Duration translation.
    pub duration: DurationPolicy,
    /// Audio behaviour.
    pub audio: AudioSupport,
    /// Pricing tier.
    pub mode: GenerationMode,
    /// Call timeout unless overridden by configuration.
    pub default_timeout: Duration,
}

const FAL_TIMEOUT: Duration = Duration::from_secs(600);
const GOOGLE_TIMEOUT: Duration = Duration::from_secs(600);
const HF_TIMEOUT: Duration = Duration::from_secs(300);

static SPECS: [ProviderSpec; 6] = [
    ProviderSpec {
        id: ProviderId::FalVeo3,
        name: "Veo 3.1 (fal.ai)",
        description: "Google Veo 3.1 image-to-video through fal.ai, always 8 seconds",
        model: "fal-ai/veo3.1/image-to-video",
        family: ProviderFamily::FalAi,
        duration: DurationPolicy::Fixed(8),
        audio: AudioSupport::Optional,
        mode: GenerationMode::Premium,
        default_timeout: FAL_TIMEOUT,
    },
    ProviderSpec {
        id: ProviderId::FalSora2,
        name: "Sora 2 (fal.ai)",
        description: "OpenAI Sora 2 image-to-video through fal.ai, billed by audio tier",
        model: "fal-ai/sora-2/image-to-video",
        family: ProviderFamily::FalAi,
        duration: DurationPolicy::Choices(&[4, 8, 12]),
        audio: AudioSupport::Optional,
        mode: GenerationMode::Premium,
        default_timeout: FAL_TIMEOUT,
    },
    ProviderSpec {
        id: ProviderId::FalWav2lip,
        name: "Wav2Lip (fal.ai)",
        description: "Lip-sync a portrait to a supplied audio track",
        model: "fal-ai/wav2lip",
        family: ProviderFamily::FalAi,
        duration: DurationPolicy::Clamp { min: 1, max: 60 },
        audio: AudioSupport::RequiresReference,
        mode: GenerationMode::Premium,
        default_timeout: FAL_TIMEOUT,
    },
    ProviderSpec {
        id: ProviderId::GoogleVeo31Gemini,
        name: "Veo 3.1 (Gemini API)",
        description: "Google Veo 3.1 preview through the Gemini API, with native audio",
        model: "veo-3.1-generate-preview",
        family: ProviderFamily::Google,
        duration: DurationPolicy::Choices(&[4, 6, 8]),
        audio: AudioSupport::Always,
        mode: GenerationMode::Premium,
        default_timeout: GOOGLE_TIMEOUT,
    },
    ProviderSpec {
        id: ProviderId::GoogleVeo3,
        name: "Veo 3.1 (Vertex AI)",
        description: "Google Veo 3.1 through Vertex AI, pay-per-second",
        model: "veo-3.1-generate-001",
        family: ProviderFamily::Google,
        duration: DurationPolicy::Clamp { min: 2, max: 8 },
        audio: AudioSupport::Optional,
        mode: GenerationMode::Premium,
        default_timeout: GOOGLE_TIMEOUT,
    },
    ProviderSpec {
        id: ProviderId::OpenSora,
        name: "Open-Sora (Hugging Face)",
        description: "Open-source image-to-video on a Hugging Face Space, free tier",
        model: "hpcai-tech/open-sora",
        family: ProviderFamily::HuggingFace,
        duration: DurationPolicy::Clamp { min: 2, max: 4 },
        audio: AudioSupport::Never,
        mode: GenerationMode::Economy,
        default_timeout: HF_TIMEOUT,
    },
];

impl ProviderId {
    /// Static description of this provider.
    pub fn spec(&self) -> &'static ProviderSpec {
        match self {
            Self::FalVeo3 => &SPECS[0],
            Self::FalSora2 => &SPECS[1],
            Self::FalWav2lip => &SPECS[2],
            Self::GoogleVeo31Gemini => &SPECS[3],
            Self::GoogleVeo3 => &SPECS[4],
            Self::OpenSora => &SPECS[5],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specs_match_ids() {
        for id in ProviderId::ALL {
            assert_eq!(id.spec().id, id);
        }
    }

    #[test]
    fn test_fixed_duration() {
        let policy = ProviderId::FalVeo3.spec().duration;
        assert_eq!(policy.apply(2), 8);
        assert_eq!(policy.apply(8), 8);
        assert_eq!(policy.apply(30), 8);
        assert_eq!(policy.max(), 8);
    }

    #[test]
    fn test_choice_duration_snaps_up() {
        let policy = DurationPolicy::Choices(&[4, 6, 8]);
        assert_eq!(policy.apply(1), 4);
        assert_eq!(policy.apply(5), 6);
        assert_eq!(policy.apply(8), 8);
        assert_eq!(policy.apply(20), 8);
        assert_eq!(policy.max(), 8);
    }

    #[test]
    fn test_clamp_duration() {
        let policy = ProviderId::GoogleVeo3.spec().duration;
        assert_eq!(policy.apply(0), 2);
        assert_eq!(policy.apply(5), 5);
        assert_eq!(policy.apply(12), 8);
    }

    #[test]
    fn test_audio_support() {
        assert!(AudioSupport::Optional.effective(true));
        assert!(!AudioSupport::Optional.effective(false));
        assert!(AudioSupport::Always.effective(false));
        assert!(!AudioSupport::Never.effective(true));
        assert!(!AudioSupport::Never.supported());
        assert!(AudioSupport::RequiresReference.supported());
    }

    #[test]
    fn test_free_tier_is_economy() {
        for id in ProviderId::ALL {
            let spec = id.spec();
            assert_eq!(
                spec.mode == GenerationMode::Economy,
                spec.family == ProviderFamily::HuggingFace,
                "{id}"
            );
        }
    }
}
