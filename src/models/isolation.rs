use rand::seq::index;
use rand::Rng;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Isolation forest over dense rows.
///
/// Each tree isolates a random subsample by splitting on a random non-constant feature at
/// a uniform point between its min and max. Points that isolate in few splits score high.
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fit on `rows`, which must be non-empty and of equal width.
    pub fn fit<R: Rng>(rows: &[Vec<f64>], n_trees: usize, sample_size: usize, rng: &mut R) -> Self {
        let sample_size = sample_size.min(rows.len()).max(1);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..n_trees)
            .map(|_| {
                let sample = index::sample(rng, rows.len(), sample_size).into_vec();
                build(rows, &sample, 0, height_limit, rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Anomaly score `2^(-E[h(x)] / c(psi))`.
    pub fn score(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let norm = average_path_length(self.sample_size);
        if norm <= 0.0 {
            return 0.0;
        }
        let mean_depth = self
            .trees
            .iter()
            .map(|tree| path_length(tree, row, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_depth / norm)
    }
}

fn build<R: Rng>(rows: &[Vec<f64>], indices: &[usize], depth: usize, limit: usize, rng: &mut R) -> Node {
    if depth >= limit || indices.len() <= 1 {
        return Node::Leaf { size: indices.len() };
    }

    let width = rows[indices[0]].len();
    let mut candidates = Vec::new();
    for feature in 0..width {
        let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            (lo.min(rows[i][feature]), hi.max(rows[i][feature]))
        });
        if hi > lo {
            candidates.push((feature, lo, hi));
        }
    }
    if candidates.is_empty() {
        return Node::Leaf { size: indices.len() };
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    // threshold in [lo, hi): both sides are non-empty
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| rows[i][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build(rows, &left, depth + 1, limit, rng)),
        right: Box::new(build(rows, &right, depth + 1, limit, rng)),
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if row[*feature] <= *threshold {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// Average unsuccessful-search path length in a binary search tree of `n` nodes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
