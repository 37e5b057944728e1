use serde::{Deserialize, Serialize};

/// Value substituted for any signal that could not be computed.
pub const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Historical,
    Environmental,
    Contextual,
}

/// Why a signal fell back to the neutral value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// Location (or day) never seen by the historical model.
    UnseenCell,
    /// External source failed or timed out.
    Unavailable,
    /// Not requested (fast mode).
    Skipped,
}

/// One of the three sub-scores, in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    pub provenance: Provenance,
    pub value: f64,
    pub valid: bool,
    /// Observations behind the value (venues, events). Zero for the model.
    pub evidence: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<Degradation>,
}

impl SignalScore {
    pub fn valid(provenance: Provenance, value: f64, evidence: u32) -> Self {
        Self {
            provenance,
            value: value.clamp(0.0, 1.0),
            valid: true,
            evidence,
            degraded: None,
        }
    }

    pub fn neutral(provenance: Provenance, reason: Degradation) -> Self {
        Self {
            provenance,
            value: NEUTRAL_SCORE,
            valid: false,
            evidence: 0,
            degraded: Some(reason),
        }
    }
}

/// Maps a non-negative weighted count onto [0, 1).
///
/// `1 - exp(-3x / ceiling)`: zero at zero, strictly increasing, about 0.95 at
/// `ceiling` and flattening beyond it.
pub fn saturate(weighted_count: f64, ceiling: f64) -> f64 {
    if weighted_count <= 0.0 || ceiling <= 0.0 {
        return 0.0;
    }
    (1.0 - (-3.0 * weighted_count / ceiling).exp()).clamp(0.0, 1.0)
}
