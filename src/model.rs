use std::collections::HashMap;
use std::path::Path;

use chrono::Weekday;
use h3o::CellIndex;
use serde::Deserialize;
use tracing::info;

use crate::error::{Result, RiskError};
use crate::signal::{Degradation, Provenance, SignalScore};
use crate::spatial::SpatialIndexer;

/// Class probabilities over the training labels `[low, medium, high]`.
type ClassProbabilities = [f64; 3];

/// On-disk form of the pretrained model, as exported by the training pipeline.
///
/// `class_probabilities[i][j]` belongs to `location_classes[i]` and
/// `day_classes[j]`; the two class lists are the fitted label encoders.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    pub resolution: u8,
    pub location_classes: Vec<String>,
    pub day_classes: Vec<String>,
    pub class_probabilities: Vec<Vec<ClassProbabilities>>,
}

/// Read-only historical model. Built once at startup and shared by `Arc`.
#[derive(Debug)]
pub struct RiskModel {
    // Indexed by `Weekday::num_days_from_monday`; `None` for days the
    // day encoder never saw.
    cells: HashMap<CellIndex, [Option<ClassProbabilities>; 7]>,
}

impl RiskModel {
    pub fn load(path: impl AsRef<Path>, indexer: &SpatialIndexer) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RiskError::config(format!("cannot read model artifact {}: {e}", path.display()))
        })?;
        let artifact: ModelArtifact = serde_json::from_str(&raw).map_err(|e| {
            RiskError::config(format!("malformed model artifact {}: {e}", path.display()))
        })?;
        let model = Self::from_artifact(artifact, indexer)?;
        info!(cells = model.cells.len(), path = %path.display(), "loaded historical model");
        Ok(model)
    }

    /// Validates the artifact against the process-wide indexer.
    pub fn from_artifact(artifact: ModelArtifact, indexer: &SpatialIndexer) -> Result<Self> {
        let expected = u8::from(indexer.resolution());
        if artifact.resolution != expected {
            return Err(RiskError::config(format!(
                "model was trained at H3 resolution {}, indexer uses {expected}",
                artifact.resolution
            )));
        }

        let days = artifact
            .day_classes
            .iter()
            .map(|name| {
                parse_day(name)
                    .map_err(|_| RiskError::config(format!("unknown day class {name:?} in model")))
            })
            .collect::<Result<Vec<_>>>()?;

        if artifact.class_probabilities.len() != artifact.location_classes.len() {
            return Err(RiskError::config(format!(
                "model has {} location classes but {} probability rows",
                artifact.location_classes.len(),
                artifact.class_probabilities.len()
            )));
        }

        let mut cells = HashMap::with_capacity(artifact.location_classes.len());
        for (name, row) in artifact.location_classes.iter().zip(&artifact.class_probabilities) {
            let cell: CellIndex = name
                .parse()
                .map_err(|e| RiskError::config(format!("bad cell {name:?} in model: {e}")))?;
            if cell.resolution() != indexer.resolution() {
                return Err(RiskError::config(format!(
                    "cell {name} is at resolution {}, expected {expected}",
                    u8::from(cell.resolution())
                )));
            }
            if row.len() != days.len() {
                return Err(RiskError::config(format!(
                    "cell {name} has {} day columns, expected {}",
                    row.len(),
                    days.len()
                )));
            }

            let mut by_day = [None; 7];
            for (day, probs) in days.iter().zip(row) {
                if probs.iter().any(|p| !(0.0..=1.0).contains(p)) {
                    return Err(RiskError::config(format!(
                        "cell {name} has probabilities outside [0, 1] for {day}"
                    )));
                }
                by_day[day.num_days_from_monday() as usize] = Some(*probs);
            }
            cells.insert(cell, by_day);
        }

        Ok(Self { cells })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Expected risk level, scaled to [0, 1]. Unseen locations fall back to
    /// the neutral score instead of failing.
    pub fn predict(&self, cell: CellIndex, day: Weekday) -> SignalScore {
        let probs = self
            .cells
            .get(&cell)
            .and_then(|by_day| by_day[day.num_days_from_monday() as usize]);

        match probs {
            Some([_, medium, high]) => {
                SignalScore::valid(Provenance::Historical, (medium + 2.0 * high) / 2.0, 0)
            }
            None => SignalScore::neutral(Provenance::Historical, Degradation::UnseenCell),
        }
    }
}

/// Parses an English day name, full or abbreviated, any case.
pub fn parse_day(name: &str) -> Result<Weekday> {
    name.trim()
        .parse::<Weekday>()
        .map_err(|_| RiskError::invalid(format!("unknown day of week {name:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::NEUTRAL_SCORE;
    use crate::spatial::Coordinate;
    use std::io::Write;

    fn indexer() -> SpatialIndexer {
        SpatialIndexer::new(9).unwrap()
    }

    fn artifact_for(cell: CellIndex) -> ModelArtifact {
        ModelArtifact {
            resolution: 9,
            location_classes: vec![cell.to_string()],
            day_classes: vec!["Monday".into(), "Friday".into()],
            class_probabilities: vec![vec![[0.25, 0.5, 0.25], [0.0, 0.2, 0.8]]],
        }
    }

    fn bangalore_cell() -> CellIndex {
        indexer().cell_of(&Coordinate::new(12.9716, 77.5946).unwrap())
    }

    #[test]
    fn predicts_expected_risk_level() {
        let model = RiskModel::from_artifact(artifact_for(bangalore_cell()), &indexer()).unwrap();

        let monday = model.predict(bangalore_cell(), Weekday::Mon);
        assert!(monday.valid);
        assert!((monday.value - 0.5).abs() < 1e-12);

        let friday = model.predict(bangalore_cell(), Weekday::Fri);
        assert!((friday.value - 0.9).abs() < 1e-12);
    }

    #[test]
    fn unseen_cell_falls_back_to_neutral() {
        let model = RiskModel::from_artifact(artifact_for(bangalore_cell()), &indexer()).unwrap();
        let elsewhere = indexer().cell_of(&Coordinate::new(30.3398, 76.3869).unwrap());

        let score = model.predict(elsewhere, Weekday::Mon);
        assert!(!score.valid);
        assert_eq!(score.value, NEUTRAL_SCORE);
        assert_eq!(score.degraded, Some(Degradation::UnseenCell));
    }

    #[test]
    fn day_missing_from_encoder_is_unseen() {
        let model = RiskModel::from_artifact(artifact_for(bangalore_cell()), &indexer()).unwrap();
        assert!(!model.predict(bangalore_cell(), Weekday::Sun).valid);
    }

    #[test]
    fn resolution_mismatch_is_a_config_error() {
        let mut artifact = artifact_for(bangalore_cell());
        artifact.resolution = 8;
        let err = RiskModel::from_artifact(artifact, &indexer()).unwrap_err();
        assert!(matches!(err, RiskError::Configuration(_)));
    }

    #[test]
    fn rejects_inconsistent_shapes() {
        let mut artifact = artifact_for(bangalore_cell());
        artifact.class_probabilities[0].pop();
        assert!(RiskModel::from_artifact(artifact, &indexer()).is_err());

        let mut artifact = artifact_for(bangalore_cell());
        artifact.day_classes[1] = "Caturday".into();
        assert!(RiskModel::from_artifact(artifact, &indexer()).is_err());

        let mut artifact = artifact_for(bangalore_cell());
        artifact.class_probabilities[0][0] = [0.5, 1.5, 0.0];
        assert!(RiskModel::from_artifact(artifact, &indexer()).is_err());
    }

    #[test]
    fn loads_from_disk_and_fails_on_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"resolution": 9, "location_classes": ["{}"], "day_classes": ["Monday"],
                "class_probabilities": [[[0.1, 0.1, 0.8]]]}}"#,
            bangalore_cell()
        )
        .unwrap();
        let model = RiskModel::load(file.path(), &indexer()).unwrap();
        assert_eq!(model.len(), 1);

        let missing = RiskModel::load("/nonexistent/crime_model.json", &indexer());
        assert!(matches!(missing, Err(RiskError::Configuration(_))));
    }

    #[test]
    fn parses_day_names() {
        assert_eq!(parse_day("Monday").unwrap(), Weekday::Mon);
        assert_eq!(parse_day("fri").unwrap(), Weekday::Fri);
        assert!(parse_day("Someday").unwrap_err().is_invalid_input());
    }
}
