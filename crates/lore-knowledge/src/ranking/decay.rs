//! Temporal decay: boost fresh pieces, damp stale ones.
//!
//! `multiplier = max(e^(−ln2 / half_life · age_days), min_multiplier)` with
//! age measured from `updated_at`. Evergreen info types are exempt.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use lore_config::DecayConfig;
use lore_types::{ScoredPiece, sort_scored};

/// Exponential score decay by piece age.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalDecay {
    pub enabled: bool,
    pub half_life_days: f64,
    pub min_multiplier: f32,
    pub evergreen_info_types: BTreeSet<String>,
}

impl Default for TemporalDecay {
    fn default() -> Self {
        Self::from(&DecayConfig::default())
    }
}

impl From<&DecayConfig> for TemporalDecay {
    fn from(config: &DecayConfig) -> Self {
        Self {
            enabled: config.enabled,
            half_life_days: f64::from(config.half_life_days),
            min_multiplier: config.min_multiplier.clamp(0.0, 1.0),
            evergreen_info_types: config.evergreen_info_types.iter().cloned().collect(),
        }
    }
}

impl TemporalDecay {
    /// Whether pieces of this info type are exempt.
    pub fn is_evergreen(&self, info_type: &str) -> bool {
        self.evergreen_info_types.contains(info_type)
    }

    /// Decay multiplier for a piece last updated at `updated_at`.
    ///
    /// Timestamps in the future count as age zero. A non-positive half-life
    /// disables decay.
    pub fn multiplier(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
        if self.half_life_days <= 0.0 {
            return 1.0;
        }
        let age_days = ((now - updated_at).num_seconds() as f64 / 86_400.0).max(0.0);
        let decay_constant = std::f64::consts::LN_2 / self.half_life_days;
        let factor = (-decay_constant * age_days).exp() as f32;
        factor.max(self.min_multiplier)
    }

    /// Scale every non-evergreen score and re-sort.
    pub fn apply(&self, results: &mut [ScoredPiece], now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }
        for result in results.iter_mut() {
            if self.is_evergreen(&result.piece.info_type) {
                continue;
            }
            result.score *= self.multiplier(result.piece.updated_at, now);
        }
        sort_scored(results);
    }
}
