use tracing::debug;

use super::normalize::NormalizedMatrix;
use crate::config::ScoringConfig;
use crate::core::{Component, ComponentScores};
use crate::error::{Result, ScoringError};

pub const MAX_SCORE: f64 = 1000.0;

/// Weighted component breakdown for one wallet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaseScore {
    pub components: ComponentScores,
    /// 0-1000.
    pub base_score: f64,
}

/// A component resolved against the matrix columns.
struct ResolvedComponent {
    component: Component,
    weight: f64,
    columns: Vec<usize>,
}

struct ResolvedBoost {
    column: usize,
    threshold: f64,
    multiplier: f64,
}

/// Score every row of the normalized matrix. Pure in the matrix and the config.
pub fn score_components(matrix: &NormalizedMatrix, config: &ScoringConfig) -> Result<Vec<BaseScore>> {
    let components = resolve_components(matrix, config)?;
    let boosts = resolve_boosts(matrix, config)?;

    Ok(matrix
        .rows
        .iter()
        .map(|row| score_row(row, &components, &boosts))
        .collect())
}

fn resolve_column(matrix: &NormalizedMatrix, feature: &str) -> Result<usize> {
    matrix
        .column_index(feature)
        .ok_or_else(|| ScoringError::config_error(format!("unknown feature '{feature}'")))
}

fn resolve_components(
    matrix: &NormalizedMatrix,
    config: &ScoringConfig,
) -> Result<Vec<ResolvedComponent>> {
    config
        .components
        .iter()
        .map(|(component, cfg)| {
            let columns = cfg
                .features
                .iter()
                .map(|f| resolve_column(matrix, f))
                .collect::<Result<Vec<_>>>()?;
            Ok(ResolvedComponent {
                component: *component,
                weight: cfg.weight,
                columns,
            })
        })
        .collect()
}

fn resolve_boosts(matrix: &NormalizedMatrix, config: &ScoringConfig) -> Result<Vec<ResolvedBoost>> {
    config
        .boosts
        .iter()
        .map(|b| {
            Ok(ResolvedBoost {
                column: resolve_column(matrix, &b.feature)?,
                threshold: b.threshold,
                multiplier: b.multiplier,
            })
        })
        .collect()
}

fn score_row(row: &[f64], components: &[ResolvedComponent], boosts: &[ResolvedBoost]) -> BaseScore {
    let mut scores = ComponentScores::default();
    let mut weighted = 0.0;
    for resolved in components {
        let value = component_mean(row, &resolved.columns);
        scores.set(resolved.component, value);
        weighted += value * resolved.weight;
    }

    let mut base_score = weighted * MAX_SCORE;
    for boost in boosts {
        if row[boost.column] > boost.threshold {
            base_score *= boost.multiplier;
        }
    }
    let base_score = base_score.clamp(0.0, MAX_SCORE);
    debug!("Base score {base_score:.2} from {scores:?}");

    BaseScore {
        components: scores,
        base_score,
    }
}

/// Arithmetic mean of the member columns; an empty component scores 0.
fn component_mean(row: &[f64], columns: &[usize]) -> f64 {
    if columns.is_empty() {
        return 0.0;
    }
    columns.iter().map(|&c| row[c]).sum::<f64>() / columns.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoostRule, ComponentConfig};
    use std::collections::BTreeMap;

    fn matrix(rows: Vec<Vec<f64>>) -> NormalizedMatrix {
        NormalizedMatrix {
            wallets: (0..rows.len()).map(|i| format!("0x{i}")).collect(),
            columns: vec!["zero_value_ratio", "error_rate", "burst_ratio"],
            rows,
        }
    }

    fn config() -> ScoringConfig {
        let mut components = BTreeMap::new();
        let entries = [
            (Component::Volume, 0.2, vec![]),
            (Component::Behavioral, 0.4, vec!["zero_value_ratio"]),
            (Component::Technical, 0.2, vec!["error_rate"]),
            (Component::Temporal, 0.2, vec!["burst_ratio", "error_rate"]),
            (Component::Diversity, 0.0, vec![]),
        ];
        for (component, weight, features) in entries {
            components.insert(
                component,
                ComponentConfig {
                    weight,
                    features: features.into_iter().map(String::from).collect(),
                },
            );
        }
        ScoringConfig {
            components,
            degenerate_fill: 0.5,
            boosts: Vec::new(),
        }
    }

    #[test]
    fn weighted_sum_scaled_to_thousand() {
        let scores = score_components(&matrix(vec![vec![1.0, 0.5, 0.0]]), &config()).unwrap();
        let s = &scores[0];
        assert_eq!(s.components.behavioral, 1.0);
        assert_eq!(s.components.technical, 0.5);
        assert_eq!(s.components.temporal, 0.25);
        assert_eq!(s.components.volume, 0.0);
        // 1.0*0.4 + 0.5*0.2 + 0.25*0.2 = 0.55
        assert!((s.base_score - 550.0).abs() < 1e-9);
    }

    #[test]
    fn all_ones_reaches_max_weighted_sum() {
        let scores = score_components(&matrix(vec![vec![1.0, 1.0, 1.0]]), &config()).unwrap();
        // Volume has no members, so 0.8 of the weight is reachable.
        assert!((scores[0].base_score - 800.0).abs() < 1e-9);
    }

    #[test]
    fn boosts_multiply_and_cap() {
        let mut cfg = config();
        cfg.boosts.push(BoostRule {
            feature: "error_rate".into(),
            threshold: 0.1,
            multiplier: 3.0,
        });
        let scores =
            score_components(&matrix(vec![vec![1.0, 1.0, 1.0], vec![1.0, 0.0, 0.0]]), &cfg).unwrap();
        assert_eq!(scores[0].base_score, MAX_SCORE);
        assert!((scores[1].base_score - 400.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_feature_is_config_error() {
        let mut cfg = config();
        if let Some(volume) = cfg.components.get_mut(&Component::Volume) {
            volume.features.push("total_transactions".into());
        }
        let err = score_components(&matrix(vec![vec![0.0, 0.0, 0.0]]), &cfg).unwrap_err();
        assert!(matches!(err, ScoringError::Config(_)));
    }

    #[test]
    fn default_config_scores_default_matrix() {
        let names = crate::features::FEATURE_NAMES;
        let m = NormalizedMatrix {
            wallets: vec!["0xa".into()],
            columns: names.to_vec(),
            rows: vec![vec![0.5; names.len()]],
        };
        let scores = score_components(&m, &ScoringConfig::default()).unwrap();
        assert!((scores[0].base_score - 500.0).abs() < 1e-9);
    }
}
