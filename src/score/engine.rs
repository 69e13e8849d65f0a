//! The scoring engine: snapshots → indicator/pillar/composite ratings.
//!
//! One pure pass over immutable inputs. The same weighted-average-with-
//! exclusion rule applies at pillar and composite level: nodes rated
//! `missing` contribute zero weight to both numerator and denominator, so
//! the remaining weights renormalize among themselves.
//!
//! Indicator ratings come from per-indicator threshold bands; pillar and
//! composite ratings come from the global cutoffs over the already-
//! normalized 0-100 score space. The asymmetry is deliberate: bands are
//! domain-calibrated per metric, cutoffs operate on aggregated scores.

use std::collections::HashMap;

use crate::domain::{
    BankRecord, CompositeScore, IndicatorScore, IndicatorSnapshot, PillarScore, Rating,
    ScoringOutput,
};

use super::config::{IndicatorRule, PillarRule, ScoringConfig};

/// Snapshots per bank, keyed bank_id → indicator_id.
pub type SnapshotMap = HashMap<String, HashMap<String, IndicatorSnapshot>>;

pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score every bank. Recomputing from identical inputs and configuration
    /// always yields identical values.
    pub fn score_all(&self, banks: &[BankRecord], snapshots: &SnapshotMap) -> ScoringOutput {
        let empty = HashMap::new();
        let mut scores = Vec::with_capacity(banks.len());
        let mut banks_with_values = 0;
        let mut indicators_with_values = 0;
        let mut latest_period: Option<String> = None;

        for bank in banks {
            let bank_snapshots = snapshots.get(&bank.bank_id).unwrap_or(&empty);
            let (composite, pillar_values, indicator_values) =
                self.score_bank(bank, bank_snapshots);
            if pillar_values > 0 {
                banks_with_values += 1;
            }
            indicators_with_values += indicator_values;
            if let Some(period) = &composite.period {
                if latest_period.as_deref().is_none_or(|latest| period.as_str() > latest) {
                    latest_period = Some(period.clone());
                }
            }
            scores.push(composite);
        }

        ScoringOutput {
            scores,
            banks_with_values,
            indicators_with_values,
            latest_period,
        }
    }

    fn score_bank(
        &self,
        bank: &BankRecord,
        indicator_data: &HashMap<String, IndicatorSnapshot>,
    ) -> (CompositeScore, usize, usize) {
        let mut pillar_scores = Vec::with_capacity(self.config.pillars.len());
        let mut pillar_value_count = 0;
        let mut indicator_values = 0;
        let mut period: Option<String> = None;
        let mut available_weight = 0.0;
        let mut weighted_total = 0.0;
        let mut missing_pillars = Vec::new();

        for pillar_rule in &self.config.pillars {
            let (pillar_score, value_count, indicator_count) =
                self.score_pillar(&bank.bank_id, pillar_rule, indicator_data);
            pillar_value_count += value_count;
            indicator_values += indicator_count;
            if let Some(candidate) = &pillar_score.period {
                if period.as_deref().is_none_or(|current| candidate.as_str() > current) {
                    period = Some(candidate.clone());
                }
            }
            let pillar_weight = self.config.composite_weight(pillar_rule);
            if pillar_score.rating != Rating::Missing {
                available_weight += pillar_weight;
                weighted_total += pillar_score.score * pillar_weight;
            } else {
                missing_pillars.push(pillar_rule.name.clone());
            }
            pillar_scores.push(pillar_score);
        }

        let (score, rating) = if available_weight > 0.0 {
            let score = weighted_total / available_weight;
            (score, self.rating_for_score(score))
        } else {
            (0.0, Rating::Missing)
        };

        let expected_weight: f64 = self
            .config
            .pillars
            .iter()
            .map(|rule| self.config.composite_weight(rule))
            .sum();

        let composite = CompositeScore {
            bank_id: bank.bank_id.clone(),
            score,
            rating,
            period,
            pillars: pillar_scores,
            metadata: serde_json::json!({
                "expected_weight": expected_weight,
                "available_weight": available_weight,
                "missing_pillars": missing_pillars,
            }),
        };
        (composite, pillar_value_count, indicator_values)
    }

    fn score_pillar(
        &self,
        bank_id: &str,
        pillar_rule: &PillarRule,
        indicator_data: &HashMap<String, IndicatorSnapshot>,
    ) -> (PillarScore, usize, usize) {
        let mut indicators = Vec::with_capacity(pillar_rule.indicators.len());
        let mut period: Option<String> = None;
        let mut available_weight = 0.0;
        let mut expected_weight = 0.0;
        let mut weighted_total = 0.0;
        let mut values_present = 0;
        let mut missing_indicators = Vec::new();

        for rule in &pillar_rule.indicators {
            expected_weight += rule.weight;
            let snapshot = indicator_data.get(&rule.indicator_id);
            let indicator_score =
                self.evaluate_indicator(bank_id, &pillar_rule.name, rule, snapshot);
            if let Some(candidate) = &indicator_score.period {
                if period.as_deref().is_none_or(|current| candidate.as_str() > current) {
                    period = Some(candidate.clone());
                }
            }
            if indicator_score.rating != Rating::Missing {
                available_weight += rule.weight;
                weighted_total += indicator_score.score * rule.weight;
                values_present += 1;
            } else {
                missing_indicators.push(rule.indicator_id.clone());
            }
            indicators.push(indicator_score);
        }

        let (score, rating) = if available_weight > 0.0 {
            let score = weighted_total / available_weight;
            (score, self.rating_for_score(score))
        } else {
            (0.0, Rating::Missing)
        };

        let pillar = PillarScore {
            bank_id: bank_id.to_string(),
            pillar: pillar_rule.name.clone(),
            score,
            rating,
            weight: pillar_rule.weight,
            period,
            indicators,
            metadata: serde_json::json!({
                "expected_weight": expected_weight,
                "available_weight": available_weight,
                "missing_indicators": missing_indicators,
            }),
        };
        (pillar, values_present, values_present)
    }

    fn evaluate_indicator(
        &self,
        bank_id: &str,
        pillar_name: &str,
        rule: &IndicatorRule,
        snapshot: Option<&IndicatorSnapshot>,
    ) -> IndicatorScore {
        let mut metadata = serde_json::Map::new();
        metadata.insert("thresholds".to_string(), rule.thresholds.to_json());
        if let Some(snapshot) = snapshot {
            if !snapshot.metadata.is_null() {
                metadata.insert("source_metadata".to_string(), snapshot.metadata.clone());
            }
        }

        let period = snapshot.and_then(|s| s.period.clone());
        let value = snapshot.and_then(|s| s.value);
        let source_id = snapshot.and_then(|s| s.source_id.clone());
        let normalization_run_id = snapshot.and_then(|s| s.normalization_run_id.clone());
        let unit = snapshot.and_then(|s| s.unit.clone());

        let Some(value) = value else {
            metadata.insert("reason".to_string(), "missing_value".into());
            return IndicatorScore {
                bank_id: bank_id.to_string(),
                indicator_id: rule.indicator_id.clone(),
                pillar: pillar_name.to_string(),
                period,
                value: None,
                score: self.config.defaults.scores.score_for(Rating::Missing),
                rating: Rating::Missing,
                weight: rule.weight,
                source_id,
                normalization_run_id,
                unit,
                metadata: serde_json::Value::Object(metadata),
            };
        };

        let rating = determine_rating(value, rule);
        if rating == Rating::Red {
            metadata.insert("reason".to_string(), "outside_thresholds".into());
        }

        IndicatorScore {
            bank_id: bank_id.to_string(),
            indicator_id: rule.indicator_id.clone(),
            pillar: pillar_name.to_string(),
            period,
            value: Some(value),
            score: self.config.defaults.scores.score_for(rating),
            rating,
            weight: rule.weight,
            source_id,
            normalization_run_id,
            unit,
            metadata: serde_json::Value::Object(metadata),
        }
    }

    fn rating_for_score(&self, score: f64) -> Rating {
        let cutoffs = self.config.defaults.rating_thresholds;
        if score >= cutoffs.green {
            Rating::Green
        } else if score >= cutoffs.yellow {
            Rating::Yellow
        } else {
            Rating::Red
        }
    }
}

/// Test bands in fixed priority order; red is the fallback.
fn determine_rating(value: f64, rule: &IndicatorRule) -> Rating {
    if rule.thresholds.green.is_some_and(|band| band.matches(value)) {
        return Rating::Green;
    }
    if rule.thresholds.yellow.is_some_and(|band| band.matches(value)) {
        return Rating::Yellow;
    }
    Rating::Red
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::config::{
        RatingCutoffs, RatingScores, ScoringDefaults, ThresholdBand, ThresholdBands,
    };

    fn bank(bank_id: &str) -> BankRecord {
        BankRecord {
            bank_id: bank_id.to_string(),
            name: "Banco Test".to_string(),
            country: "Guatemala".to_string(),
            regulator: "SIB".to_string(),
        }
    }

    fn cet1_rule(weight: f64) -> IndicatorRule {
        IndicatorRule {
            indicator_id: "cet1_rwa".to_string(),
            weight,
            thresholds: ThresholdBands {
                green: Some(ThresholdBand {
                    min: Some(0.12),
                    max: None,
                }),
                yellow: Some(ThresholdBand {
                    min: Some(0.08),
                    max: None,
                }),
                red: Some(ThresholdBand {
                    min: Some(0.0),
                    max: None,
                }),
            },
        }
    }

    fn npl_rule(weight: f64) -> IndicatorRule {
        // Lower is better: green caps NPL at 2%, yellow at 5%.
        IndicatorRule {
            indicator_id: "npl".to_string(),
            weight,
            thresholds: ThresholdBands {
                green: Some(ThresholdBand {
                    min: None,
                    max: Some(0.02),
                }),
                yellow: Some(ThresholdBand {
                    min: None,
                    max: Some(0.05),
                }),
                red: None,
            },
        }
    }

    fn config(indicators: Vec<IndicatorRule>) -> ScoringConfig {
        ScoringConfig {
            version: 1,
            defaults: ScoringDefaults {
                scores: RatingScores::default(),
                rating_thresholds: RatingCutoffs::default(),
            },
            composite_weights: [("capital".to_string(), 1.0)].into_iter().collect(),
            pillars: vec![PillarRule {
                name: "capital".to_string(),
                weight: 1.0,
                indicators,
            }],
        }
    }

    fn snapshot(indicator_id: &str, value: Option<f64>) -> IndicatorSnapshot {
        IndicatorSnapshot {
            bank_id: "bank1".to_string(),
            indicator_id: indicator_id.to_string(),
            pillar: "capital".to_string(),
            period: Some("2024Q1".to_string()),
            value,
            unit: Some("ratio".to_string()),
            source_id: Some("demo-source".to_string()),
            normalization_run_id: Some("norm-run".to_string()),
            metadata: serde_json::json!({"source": "demo"}),
        }
    }

    fn snapshots_for(entries: Vec<IndicatorSnapshot>) -> SnapshotMap {
        let mut by_indicator = HashMap::new();
        for entry in entries {
            by_indicator.insert(entry.indicator_id.clone(), entry);
        }
        [("bank1".to_string(), by_indicator)].into_iter().collect()
    }

    #[test]
    fn healthy_capital_ratio_scores_green_at_every_level() {
        let engine = ScoringEngine::new(config(vec![cet1_rule(1.0)]));
        let snapshots = snapshots_for(vec![snapshot("cet1_rwa", Some(0.14))]);

        let output = engine.score_all(&[bank("bank1")], &snapshots);
        assert_eq!(output.banks_with_values, 1);
        assert_eq!(output.indicators_with_values, 1);
        assert_eq!(output.latest_period.as_deref(), Some("2024Q1"));

        let composite = &output.scores[0];
        assert_eq!(composite.rating, Rating::Green);
        assert_eq!(composite.metadata["available_weight"], 1.0);

        let pillar = &composite.pillars[0];
        assert_eq!(pillar.rating, Rating::Green);
        assert_eq!(pillar.metadata["missing_indicators"], serde_json::json!([]));

        let indicator = &pillar.indicators[0];
        assert_eq!(indicator.rating, Rating::Green);
        assert_eq!(indicator.score, 100.0);
        assert_eq!(indicator.metadata["thresholds"]["green"]["min"], 0.12);
        assert_eq!(indicator.metadata["source_metadata"]["source"], "demo");
    }

    #[test]
    fn bank_with_no_snapshots_is_missing_everywhere() {
        let engine = ScoringEngine::new(config(vec![cet1_rule(1.0)]));
        let output = engine.score_all(&[bank("bank1")], &HashMap::new());

        let composite = &output.scores[0];
        assert_eq!(composite.rating, Rating::Missing);
        assert_eq!(composite.score, 0.0);
        assert_eq!(composite.pillars[0].rating, Rating::Missing);
        assert_eq!(
            composite.pillars[0].indicators[0].metadata["reason"],
            "missing_value"
        );
        assert_eq!(output.banks_with_values, 0);
        assert_eq!(
            composite.metadata["missing_pillars"],
            serde_json::json!(["capital"])
        );
    }

    #[test]
    fn missing_indicator_weight_renormalizes_to_the_present_one() {
        // Two indicators of equal weight; one has no snapshot. The pillar
        // score must equal the present indicator's score exactly.
        let engine = ScoringEngine::new(config(vec![cet1_rule(2.0), npl_rule(2.0)]));
        let snapshots = snapshots_for(vec![snapshot("cet1_rwa", Some(0.14))]);

        let output = engine.score_all(&[bank("bank1")], &snapshots);
        let pillar = &output.scores[0].pillars[0];
        assert_eq!(pillar.score, 100.0);
        assert_eq!(pillar.rating, Rating::Green);
        assert_eq!(pillar.metadata["available_weight"], 2.0);
        assert_eq!(pillar.metadata["expected_weight"], 4.0);
        assert_eq!(
            pillar.metadata["missing_indicators"],
            serde_json::json!(["npl"])
        );
    }

    #[test]
    fn null_valued_snapshot_counts_as_missing() {
        let engine = ScoringEngine::new(config(vec![cet1_rule(1.0)]));
        let snapshots = snapshots_for(vec![snapshot("cet1_rwa", None)]);

        let output = engine.score_all(&[bank("bank1")], &snapshots);
        assert_eq!(output.scores[0].rating, Rating::Missing);
        assert_eq!(output.indicators_with_values, 0);
    }

    #[test]
    fn moving_from_red_to_green_strictly_raises_aggregates() {
        let engine = ScoringEngine::new(config(vec![cet1_rule(1.0), npl_rule(1.0)]));

        let red = snapshots_for(vec![
            snapshot("cet1_rwa", Some(0.05)),
            snapshot("npl", Some(0.04)),
        ]);
        let green = snapshots_for(vec![
            snapshot("cet1_rwa", Some(0.14)),
            snapshot("npl", Some(0.04)),
        ]);

        let low = engine.score_all(&[bank("bank1")], &red);
        let high = engine.score_all(&[bank("bank1")], &green);

        assert!(high.scores[0].pillars[0].score > low.scores[0].pillars[0].score);
        assert!(high.scores[0].score > low.scores[0].score);
    }

    #[test]
    fn aggregate_ratings_use_global_cutoffs() {
        // green (100) and red (20) at equal weight average to 60, which the
        // default cutoffs classify as yellow.
        let engine = ScoringEngine::new(config(vec![cet1_rule(1.0), npl_rule(1.0)]));
        let snapshots = snapshots_for(vec![
            snapshot("cet1_rwa", Some(0.14)),
            snapshot("npl", Some(0.10)),
        ]);

        let output = engine.score_all(&[bank("bank1")], &snapshots);
        let pillar = &output.scores[0].pillars[0];
        assert_eq!(pillar.score, 60.0);
        assert_eq!(pillar.rating, Rating::Yellow);
        assert_eq!(
            pillar.indicators[1].metadata["reason"],
            "outside_thresholds"
        );
    }

    #[test]
    fn band_priority_is_green_then_yellow_then_red_fallback() {
        let rule = cet1_rule(1.0);
        assert_eq!(determine_rating(0.14, &rule), Rating::Green);
        assert_eq!(determine_rating(0.09, &rule), Rating::Yellow);
        assert_eq!(determine_rating(0.01, &rule), Rating::Red);
        // Below every declared band still falls back to red.
        assert_eq!(determine_rating(-0.5, &rule), Rating::Red);
    }

    #[test]
    fn period_propagates_as_lexicographic_maximum() {
        let mut older = snapshot("cet1_rwa", Some(0.14));
        older.period = Some("2023Q4".to_string());
        let mut newer = snapshot("npl", Some(0.01));
        newer.period = Some("2024Q2".to_string());

        let engine = ScoringEngine::new(config(vec![cet1_rule(1.0), npl_rule(1.0)]));
        let output = engine.score_all(&[bank("bank1")], &snapshots_for(vec![older, newer]));

        assert_eq!(output.scores[0].period.as_deref(), Some("2024Q2"));
        assert_eq!(output.latest_period.as_deref(), Some("2024Q2"));
    }
}
