//! Weighted fusion of the three signals into one score and band.

use serde::{Deserialize, Serialize};

use crate::events::EventRecord;
use crate::signal::{Degradation, SignalScore};

/// Per-signal weights. They sum to one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub historical: f64,
    pub environmental: f64,
    pub contextual: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            historical: 0.20,
            environmental: 0.50,
            contextual: 0.30,
        }
    }
}

/// How invalid (neutral) signals take part in the weighted sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightPolicy {
    /// Every signal keeps its weight; invalid ones contribute the neutral value.
    Fixed,
    /// Weights are rescaled over the valid signals only. With no valid
    /// signal this degrades to `Fixed`.
    #[default]
    RenormalizeValid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    // 1/3 and 2/3 at the four decimals the score is reported with.
    const MEDIUM_FROM: f64 = 0.3334;
    const HIGH_FROM: f64 = 0.6668;

    /// Bands are defined on the reported 4-decimal score, not the raw sum:
    /// a raw 0.33334 reports as 0.3333 and is low.
    pub fn from_score(score: f64) -> Self {
        if score < Self::MEDIUM_FROM {
            RiskBand::Low
        } else if score < Self::HIGH_FROM {
            RiskBand::Medium
        } else {
            RiskBand::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        }
    }

    /// Map color used by the frontend.
    pub fn color(&self) -> &'static str {
        match self {
            RiskBand::Low => "green",
            RiskBand::Medium => "yellow",
            RiskBand::High => "red",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub score: f64,
    pub band: RiskBand,
    /// Historical, environmental, contextual, in that order.
    pub signals: [SignalScore; 3],
    /// Newest events behind the contextual signal, for display.
    #[serde(default)]
    pub context: Vec<EventRecord>,
}

impl FusedResult {
    /// Fraction of the signals that were actually computed.
    pub fn completeness(&self) -> f64 {
        self.signals.iter().filter(|s| s.valid).count() as f64 / self.signals.len() as f64
    }

    /// One-line account of the news signal, shown next to the score.
    pub fn context_status(&self) -> String {
        let contextual = &self.signals[2];
        match contextual.degraded {
            Some(Degradation::Skipped) => "Statistical (news skipped)".into(),
            Some(_) => "Statistical (news unavailable)".into(),
            None if contextual.evidence == 0 => "Statistical".into(),
            None => format!("Contextual Confirmation ({} reports)", contextual.evidence),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Fusion {
    pub weights: Weights,
    pub policy: WeightPolicy,
}

impl Fusion {
    pub fn new(weights: Weights, policy: WeightPolicy) -> Self {
        Self { weights, policy }
    }

    pub fn fuse(
        &self,
        historical: SignalScore,
        environmental: SignalScore,
        contextual: SignalScore,
    ) -> FusedResult {
        let weighted = [
            (historical, self.weights.historical),
            (environmental, self.weights.environmental),
            (contextual, self.weights.contextual),
        ];

        let fixed = || weighted.iter().map(|(s, w)| s.value * w).sum::<f64>();
        let raw = match self.policy {
            WeightPolicy::Fixed => fixed(),
            WeightPolicy::RenormalizeValid => {
                let valid_weight: f64 = weighted.iter().filter(|(s, _)| s.valid).map(|(_, w)| w).sum();
                if valid_weight > 0.0 {
                    weighted
                        .iter()
                        .filter(|(s, _)| s.valid)
                        .map(|(s, w)| s.value * w)
                        .sum::<f64>()
                        / valid_weight
                } else {
                    fixed()
                }
            }
        };

        // Banded after rounding so the band always agrees with the score shown.
        let score = round4(raw.clamp(0.0, 1.0));
        FusedResult {
            score,
            band: RiskBand::from_score(score),
            signals: [historical, environmental, contextual],
            context: Vec::new(),
        }
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
