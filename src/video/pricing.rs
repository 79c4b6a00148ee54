//! Cost model.
//!
//! Prices are USD per second of generated video, compiled in. Changing a price
//! is a code change, never a database write.

use crate::video::types::{ProviderId, VideoGenerationResult};
use serde::Serialize;

/// Per-second rates for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceEntry {
    /// Rate for a silent video.
    pub per_second: f64,
    /// Rate when the video has an audio track.
    pub per_second_with_audio: f64,
    /// Free-tier providers always cost exactly zero.
    pub free_tier: bool,
}

impl PriceEntry {
    const fn paid(per_second: f64, per_second_with_audio: f64) -> Self {
        Self {
            per_second,
            per_second_with_audio,
            free_tier: false,
        }
    }

    const FREE: Self = Self {
        per_second: 0.0,
        per_second_with_audio: 0.0,
        free_tier: true,
    };

    /// Rate for the given audio tier.
    pub fn rate(&self, with_audio: bool) -> f64 {
        if self.free_tier {
            0.0
        } else if with_audio {
            self.per_second_with_audio
        } else {
            self.per_second
        }
    }
}

impl ProviderId {
    /// Static price entry.
    pub fn price(&self) -> PriceEntry {
        match self {
            Self::FalVeo3 => PriceEntry::paid(0.20, 0.40),
            Self::FalSora2 => PriceEntry::paid(0.15, 0.30),
            Self::FalWav2lip => PriceEntry::paid(0.10, 0.10),
            Self::GoogleVeo31Gemini => PriceEntry::paid(0.076, 0.076),
            Self::GoogleVeo3 => PriceEntry::paid(0.12, 0.15),
            Self::OpenSora => PriceEntry::FREE,
        }
    }
}

/// Cost of generating `duration_secs` seconds, at full precision.
///
/// The audio tier is the one the provider will actually bill: providers that
/// always produce sound use the audio rate, silent-only providers the silent
/// one. Never negative, exactly zero for free-tier providers.
pub fn cost_for(provider: ProviderId, duration_secs: u32, with_audio: bool) -> f64 {
    let audio = provider.spec().audio.effective(with_audio);
    provider.price().rate(audio) * f64::from(duration_secs)
}

/// Pre-dispatch estimate for a request, at full precision.
pub fn estimate(provider: ProviderId, duration_secs: u32, with_audio: bool) -> f64 {
    cost_for(provider, duration_secs, with_audio)
}

/// Authoritative cost of a finished generation: whatever the adapter reported.
pub fn actual(result: &VideoGenerationResult) -> f64 {
    result.cost()
}

/// Rounds an amount to cents for display.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::types::VideoMetadata;

    #[test]
    fn test_estimate_uses_audio_rate() {
        assert!((estimate(ProviderId::FalVeo3, 8, true) - 3.2).abs() < 1e-9);
        assert!((estimate(ProviderId::FalVeo3, 8, false) - 1.6).abs() < 1e-9);
        assert!((estimate(ProviderId::GoogleVeo3, 5, true) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_sora2_bills_by_audio_flag() {
        assert!((estimate(ProviderId::FalSora2, 8, false) - 1.2).abs() < 1e-9);
        assert!((estimate(ProviderId::FalSora2, 8, true) - 2.4).abs() < 1e-9);
    }

    #[test]
    fn test_silent_estimate_matches_listed_silent_rate() {
        for id in ProviderId::ALL {
            for d in [1, 4, 8, 12] {
                let listed = id.price().rate(false) * f64::from(d);
                assert!((estimate(id, d, false) - listed).abs() < 1e-9, "{id} {d}s");
            }
        }
        assert!((estimate(ProviderId::GoogleVeo31Gemini, 8, false) - 0.608).abs() < 1e-9);
    }

    #[test]
    fn test_free_tier_is_zero() {
        for d in [0, 2, 4, 100] {
            assert_eq!(estimate(ProviderId::OpenSora, d, true), 0.0);
            assert_eq!(estimate(ProviderId::OpenSora, d, false), 0.0);
        }
    }

    #[test]
    fn test_monotonic_and_non_negative() {
        for id in ProviderId::ALL {
            for audio in [false, true] {
                let mut previous = 0.0;
                for d in 0..=60 {
                    let cost = estimate(id, d, audio);
                    assert!(cost >= 0.0, "{id} {d}s");
                    assert!(cost >= previous, "{id} not monotonic at {d}s");
                    previous = cost;
                }
            }
        }
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(0.608), 0.61);
        assert_eq!(round_cents(1.6000000000000003), 1.6);
        assert_eq!(round_cents(0.0), 0.0);
    }

    #[test]
    fn test_actual_trusts_result() {
        let result = VideoGenerationResult::success(
            "https://v/1.mp4",
            ProviderId::FalVeo3,
            8,
            1.23,
            false,
            VideoMetadata::default(),
        )
        .unwrap();
        assert_eq!(actual(&result), 1.23);
    }
}
