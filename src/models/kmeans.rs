use rand::Rng;

/// Result of one k-means fit.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    pub k: usize,
    pub n_init: usize,
    pub max_iter: usize,
    /// Converged once the summed squared centroid shift is at most this.
    pub tolerance: f64,
}

/// Lloyd's algorithm with k-means++ seeding, restarted `n_init` times.
///
/// Keeps the converged restart with the lowest inertia (earliest wins ties); when no
/// restart converges the lowest-inertia restart is returned with `converged == false`.
/// `rows` must be non-empty and `1 <= k <= rows.len()`.
pub fn fit<R: Rng>(rows: &[Vec<f64>], params: KMeansParams, rng: &mut R) -> KMeansFit {
    let mut best: Option<KMeansFit> = None;
    for _ in 0..params.n_init.max(1) {
        let candidate = fit_once(rows, params, rng);
        let better = match &best {
            None => true,
            Some(current) => match (candidate.converged, current.converged) {
                (true, false) => true,
                (false, true) => false,
                _ => candidate.inertia < current.inertia,
            },
        };
        if better {
            best = Some(candidate);
        }
    }
    best.unwrap_or_else(|| fit_once(rows, params, rng))
}

fn fit_once<R: Rng>(rows: &[Vec<f64>], params: KMeansParams, rng: &mut R) -> KMeansFit {
    let mut centroids = init_plus_plus(rows, params.k, rng);
    let mut labels = assign(rows, &centroids);
    let mut converged = false;
    let mut iterations = 0;

    while iterations < params.max_iter {
        iterations += 1;
        let updated = update(rows, &labels, &centroids);
        let shift: f64 = centroids
            .iter()
            .zip(&updated)
            .map(|(old, new)| squared_distance(old, new))
            .sum();
        centroids = updated;
        labels = assign(rows, &centroids);
        if shift <= params.tolerance {
            converged = true;
            break;
        }
    }

    let inertia = rows
        .iter()
        .zip(&labels)
        .map(|(row, &label)| squared_distance(row, &centroids[label]))
        .sum();

    KMeansFit {
        labels,
        centroids,
        inertia,
        iterations,
        converged,
    }
}

/// k-means++: first centre uniform, the rest drawn proportionally to squared distance.
fn init_plus_plus<R: Rng>(rows: &[Vec<f64>], k: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let mut centroids = vec![rows[rng.gen_range(0..rows.len())].clone()];
    let mut nearest: Vec<f64> = rows
        .iter()
        .map(|row| squared_distance(row, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().sum();
        let pick = if total > 0.0 {
            let target = rng.gen_range(0.0..total);
            let mut acc = 0.0;
            nearest
                .iter()
                .position(|d| {
                    acc += d;
                    acc > target
                })
                .unwrap_or(rows.len() - 1)
        } else {
            rng.gen_range(0..rows.len())
        };
        let centre = rows[pick].clone();
        for (d, row) in nearest.iter_mut().zip(rows) {
            *d = d.min(squared_distance(row, &centre));
        }
        centroids.push(centre);
    }
    centroids
}

/// Nearest centroid per row; ties go to the lowest cluster index.
pub fn assign(rows: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
    rows.iter()
        .map(|row| {
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = squared_distance(row, centroid);
                if dist < best_dist {
                    best = c;
                    best_dist = dist;
                }
            }
            best
        })
        .collect()
}

/// Member means; an empty cluster keeps its previous centroid.
fn update(rows: &[Vec<f64>], labels: &[usize], centroids: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let dims = centroids.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0; dims]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];
    for (row, &label) in rows.iter().zip(labels) {
        counts[label] += 1;
        for (s, v) in sums[label].iter_mut().zip(row) {
            *s += v;
        }
    }
    sums.into_iter()
        .zip(counts)
        .zip(centroids)
        .map(|((sum, count), previous)| {
            if count == 0 {
                previous.clone()
            } else {
                sum.into_iter().map(|s| s / count as f64).collect()
            }
        })
        .collect()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}
