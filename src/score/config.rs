//! Scoring configuration loading and validation.
//!
//! The YAML file defines score values per rating, the global rating cutoffs
//! used at pillar/composite level, optional composite weight overrides, and
//! the pillar → indicator → (weight, threshold bands) tree. A configuration
//! without pillars is unusable and fails the run before any bank is scored.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::domain::Rating;
use crate::error::AppError;

/// A named value range. Absent bounds are unbounded on that side.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ThresholdBand {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ThresholdBand {
    /// A value matches iff it lies within `[min, max]`.
    pub fn matches(&self, value: f64) -> bool {
        if self.min.is_some_and(|min| value < min) {
            return false;
        }
        if self.max.is_some_and(|max| value > max) {
            return false;
        }
        true
    }

    fn to_json(self) -> serde_json::Value {
        let mut band = serde_json::Map::new();
        if let Some(min) = self.min {
            band.insert("min".to_string(), min.into());
        }
        if let Some(max) = self.max {
            band.insert("max".to_string(), max.into());
        }
        serde_json::Value::Object(band)
    }
}

/// Threshold bands for one indicator. Red needs no explicit band — it is the
/// fallback when neither green nor yellow matches — but may be declared for
/// documentation.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ThresholdBands {
    #[serde(default)]
    pub green: Option<ThresholdBand>,
    #[serde(default)]
    pub yellow: Option<ThresholdBand>,
    #[serde(default)]
    pub red: Option<ThresholdBand>,
}

impl ThresholdBands {
    pub fn to_json(self) -> serde_json::Value {
        let mut bands = serde_json::Map::new();
        if let Some(green) = self.green {
            bands.insert("green".to_string(), green.to_json());
        }
        if let Some(yellow) = self.yellow {
            bands.insert("yellow".to_string(), yellow.to_json());
        }
        if let Some(red) = self.red {
            bands.insert("red".to_string(), red.to_json());
        }
        serde_json::Value::Object(bands)
    }
}

/// Scoring configuration for one indicator inside a pillar.
#[derive(Debug, Clone)]
pub struct IndicatorRule {
    pub indicator_id: String,
    pub weight: f64,
    pub thresholds: ThresholdBands,
}

/// Scoring configuration for one CAMELS pillar.
#[derive(Debug, Clone)]
pub struct PillarRule {
    pub name: String,
    pub weight: f64,
    pub indicators: Vec<IndicatorRule>,
}

/// Numeric score assigned to each rating.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RatingScores {
    pub green: f64,
    pub yellow: f64,
    pub red: f64,
    pub missing: f64,
}

impl Default for RatingScores {
    fn default() -> Self {
        Self {
            green: 100.0,
            yellow: 60.0,
            red: 20.0,
            missing: 0.0,
        }
    }
}

impl RatingScores {
    pub fn score_for(&self, rating: Rating) -> f64 {
        match rating {
            Rating::Green => self.green,
            Rating::Yellow => self.yellow,
            Rating::Red => self.red,
            Rating::Missing => self.missing,
        }
    }
}

/// Global cutoffs mapping an aggregated 0-100 score back to a rating.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RatingCutoffs {
    pub green: f64,
    pub yellow: f64,
}

impl Default for RatingCutoffs {
    fn default() -> Self {
        Self {
            green: 80.0,
            yellow: 50.0,
        }
    }
}

/// Default numeric values used by the scoring engine.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ScoringDefaults {
    pub scores: RatingScores,
    pub rating_thresholds: RatingCutoffs,
}

/// Parsed scoring configuration.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub version: i64,
    pub defaults: ScoringDefaults,
    pub composite_weights: BTreeMap<String, f64>,
    pub pillars: Vec<PillarRule>,
}

impl ScoringConfig {
    /// Pillar weight used at composite level: the override table wins, the
    /// pillar's own declared weight is the fallback.
    pub fn composite_weight(&self, pillar: &PillarRule) -> f64 {
        self.composite_weights
            .get(&pillar.name)
            .copied()
            .unwrap_or(pillar.weight)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_version")]
    version: i64,
    #[serde(default)]
    defaults: ScoringDefaults,
    #[serde(default)]
    composite: RawComposite,
    #[serde(default)]
    pillars: serde_yaml::Mapping,
}

fn default_version() -> i64 {
    1
}

#[derive(Debug, Default, Deserialize)]
struct RawComposite {
    #[serde(default)]
    weights: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct RawPillar {
    #[serde(default)]
    weight: f64,
    #[serde(default)]
    indicators: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
struct RawIndicator {
    #[serde(default)]
    weight: f64,
    #[serde(default)]
    thresholds: ThresholdBands,
}

/// Load the scoring configuration from `path`.
pub fn load_scoring_config(path: &Path) -> Result<ScoringConfig, AppError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::config(format!(
            "Scoring configuration not found at '{}': {e}",
            path.display()
        ))
    })?;
    let raw: RawConfig = serde_yaml::from_str(&text)
        .map_err(|e| AppError::config(format!("Failed to parse scoring configuration: {e}")))?;

    // YAML mappings keep file order, which fixes the pillar/indicator
    // iteration order for deterministic output.
    let mut pillars = Vec::new();
    for (key, value) in raw.pillars {
        let Some(name) = key.as_str() else { continue };
        let Ok(raw_pillar) = serde_yaml::from_value::<RawPillar>(value) else {
            continue;
        };
        let mut indicators = Vec::new();
        for (indicator_key, indicator_value) in raw_pillar.indicators {
            let Some(indicator_id) = indicator_key.as_str() else {
                continue;
            };
            let Ok(raw_indicator) = serde_yaml::from_value::<RawIndicator>(indicator_value) else {
                continue;
            };
            indicators.push(IndicatorRule {
                indicator_id: indicator_id.to_string(),
                weight: raw_indicator.weight,
                thresholds: raw_indicator.thresholds,
            });
        }
        pillars.push(PillarRule {
            name: name.to_string(),
            weight: raw_pillar.weight,
            indicators,
        });
    }

    if pillars.is_empty() {
        return Err(AppError::config(
            "No pillars defined in scoring configuration",
        ));
    }

    Ok(ScoringConfig {
        version: raw.version,
        defaults: raw.defaults,
        composite_weights: raw.composite.weights,
        pillars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn full_config_round_trips() {
        let file = write_config(
            r#"
version: 2
defaults:
  scores:
    green: 90
  rating_thresholds:
    yellow: 40
composite:
  weights:
    capital: 0.3
pillars:
  capital:
    weight: 0.25
    indicators:
      cet1_rwa:
        weight: 1.0
        thresholds:
          green: { min: 0.12 }
          yellow: { min: 0.08 }
          red: { min: 0.0 }
  liquidity:
    weight: 0.2
    indicators:
      lcr:
        weight: 0.5
        thresholds:
          green: { min: 1.0 }
"#,
        );

        let config = load_scoring_config(file.path()).unwrap();
        assert_eq!(config.version, 2);
        // Partial defaults merge over the built-in values.
        assert_eq!(config.defaults.scores.green, 90.0);
        assert_eq!(config.defaults.scores.red, 20.0);
        assert_eq!(config.defaults.rating_thresholds.green, 80.0);
        assert_eq!(config.defaults.rating_thresholds.yellow, 40.0);

        assert_eq!(config.pillars.len(), 2);
        assert_eq!(config.pillars[0].name, "capital");
        assert_eq!(config.pillars[1].name, "liquidity");
        assert_eq!(config.composite_weight(&config.pillars[0]), 0.3);
        assert_eq!(config.composite_weight(&config.pillars[1]), 0.2);

        let rule = &config.pillars[0].indicators[0];
        assert_eq!(rule.indicator_id, "cet1_rwa");
        assert!(rule.thresholds.green.unwrap().matches(0.14));
        assert!(!rule.thresholds.green.unwrap().matches(0.10));
    }

    #[test]
    fn config_without_pillars_fails_fast() {
        let file = write_config("version: 1\npillars: {}\n");
        let err = load_scoring_config(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_scoring_config(Path::new("/nonexistent/thresholds.yaml")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn open_ended_bands_match_unbounded_sides() {
        let band = ThresholdBand {
            min: None,
            max: Some(0.05),
        };
        assert!(band.matches(-10.0));
        assert!(band.matches(0.05));
        assert!(!band.matches(0.06));

        let unbounded = ThresholdBand::default();
        assert!(unbounded.matches(f64::MAX));
    }
}
