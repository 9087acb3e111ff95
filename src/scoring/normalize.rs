use crate::features::FeatureMatrix;

/// Feature matrix rescaled column-by-column to [0, 1] across one batch.
///
/// The scaling is relative to the wallets present: adding or removing a wallet can move
/// every other wallet's normalized values.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMatrix {
    pub wallets: Vec<String>,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<f64>>,
}

impl NormalizedMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == name)
    }
}

pub fn normalize(matrix: &FeatureMatrix, degenerate_fill: f64) -> NormalizedMatrix {
    NormalizedMatrix {
        wallets: matrix.wallet_ids().map(str::to_string).collect(),
        columns: matrix.column_names().to_vec(),
        rows: min_max_scale(&matrix.values(), degenerate_fill),
    }
}

/// Min-max scale each column. Non-finite inputs count as 0; a constant column maps to
/// `degenerate_fill`.
pub fn min_max_scale(rows: &[Vec<f64>], degenerate_fill: f64) -> Vec<Vec<f64>> {
    let Some(width) = rows.first().map(Vec::len) else {
        return Vec::new();
    };
    let clean = |v: f64| if v.is_finite() { v } else { 0.0 };

    let mut mins = vec![f64::INFINITY; width];
    let mut maxs = vec![f64::NEG_INFINITY; width];
    for row in rows {
        for (j, v) in row.iter().enumerate() {
            let v = clean(*v);
            mins[j] = mins[j].min(v);
            maxs[j] = maxs[j].max(v);
        }
    }

    rows.iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(j, v)| {
                    let range = maxs[j] - mins[j];
                    if range > 0.0 {
                        ((clean(*v) - mins[j]) / range).clamp(0.0, 1.0)
                    } else {
                        degenerate_fill
                    }
                })
                .collect()
        })
        .collect()
}
