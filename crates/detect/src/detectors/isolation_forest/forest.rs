//! Isolation forest ensemble.
//!
//! Scores follow the usual convention: `score_samples` is the negated
//! anomaly score `-2^(-E[h(x)] / c(ψ))`, and the decision function shifts it
//! by the training-score percentile at `contamination`, so negative decision
//! values are outliers.

use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::error::DetectError;
use crate::stats;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points.
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum IsolationTree {
    Internal {
        feature: usize,
        threshold: f64,
        left: Box<IsolationTree>,
        right: Box<IsolationTree>,
    },
    External {
        size: usize,
    },
}

impl IsolationTree {
    fn build(
        data: &[Vec<f64>],
        indices: &[usize],
        height: usize,
        max_height: usize,
        rng: &mut StdRng,
    ) -> Self {
        if height >= max_height || indices.len() <= 1 {
            return IsolationTree::External { size: indices.len() };
        }

        // Only features that still vary inside this node can split it.
        let dims = data[indices[0]].len();
        let splittable: Vec<(usize, f64, f64)> = (0..dims)
            .filter_map(|f| {
                let (lo, hi) = indices.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &i| {
                    (lo.min(data[i][f]), hi.max(data[i][f]))
                });
                (hi - lo > 1e-12).then_some((f, lo, hi))
            })
            .collect();
        let Some(&(feature, lo, hi)) = splittable.choose(rng) else {
            return IsolationTree::External { size: indices.len() };
        };

        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| data[i][feature] < threshold);
        if left.is_empty() || right.is_empty() {
            return IsolationTree::External { size: indices.len() };
        }

        IsolationTree::Internal {
            feature,
            threshold,
            left: Box::new(Self::build(data, &left, height + 1, max_height, rng)),
            right: Box::new(Self::build(data, &right, height + 1, max_height, rng)),
        }
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationTree::External { size } => return depth + average_path_length(*size),
                IsolationTree::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Ensemble hyper-parameters with `max_samples` already resolved to a count.
#[derive(Debug, Clone, Copy)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub sample_size: usize,
    pub contamination: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
    offset: f64,
}

impl IsolationForest {
    /// Grow the ensemble in parallel; tree `k` is seeded with `seed + k`.
    pub fn fit(data: &[Vec<f64>], config: &ForestConfig) -> Result<Self, DetectError> {
        let n_features = data.first().map(Vec::len).unwrap_or(0);
        if data.is_empty() || n_features == 0 {
            return Err(DetectError::execution(
                "isolation_forest",
                "cannot fit on an empty feature matrix",
            ));
        }
        if let Some(row) = data.iter().find(|r| r.len() != n_features) {
            return Err(DetectError::DimensionMismatch {
                expected: n_features,
                actual: row.len(),
            });
        }
        if data.iter().flatten().any(|v| !v.is_finite()) {
            return Err(DetectError::execution(
                "isolation_forest",
                "feature matrix contains non-finite values",
            ));
        }

        let sample_size = config.sample_size.clamp(1, data.len());
        let max_height = (sample_size.max(2) as f64).log2().ceil() as usize;

        let trees: Vec<IsolationTree> = (0..config.n_estimators.max(1))
            .into_par_iter()
            .map(|k| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(k as u64));
                let indices = rand::seq::index::sample(&mut rng, data.len(), sample_size).into_vec();
                IsolationTree::build(data, &indices, 0, max_height, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            n_features,
            offset: 0.0,
        };
        let training = forest.score_samples(data)?;
        forest.offset = stats::quantile(&training, config.contamination).unwrap_or(0.0);
        Ok(forest)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Negated anomaly score: lower means more isolated.
    pub fn score_samples(&self, data: &[Vec<f64>]) -> Result<Vec<f64>, DetectError> {
        if let Some(row) = data.iter().find(|r| r.len() != self.n_features) {
            return Err(DetectError::DimensionMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let norm = match average_path_length(self.sample_size) {
            c if c > 0.0 => c,
            _ => 1.0,
        };
        let n_trees = self.trees.len() as f64;
        Ok(data
            .par_iter()
            .map(|sample| {
                let mean_depth =
                    self.trees.iter().map(|t| t.path_length(sample)).sum::<f64>() / n_trees;
                -(2f64.powf(-mean_depth / norm))
            })
            .collect())
    }

    /// `score_samples - offset`; negative values are outliers.
    pub fn decision_function(&self, data: &[Vec<f64>]) -> Result<Vec<f64>, DetectError> {
        Ok(self
            .score_samples(data)?
            .into_iter()
            .map(|s| s - self.offset)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..100)
            .map(|i| vec![(i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1])
            .collect();
        data.push(vec![25.0, -30.0]);
        data
    }

    fn config() -> ForestConfig {
        ForestConfig {
            n_estimators: 100,
            sample_size: 64,
            contamination: 0.1,
            seed: 7,
        }
    }

    #[test]
    fn average_path_length_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.2448).abs() < 1e-3, "c(256) = {c256}");
    }

    #[test]
    fn outlier_gets_lowest_score() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, &config()).unwrap();
        let scores = forest.score_samples(&data).unwrap();
        let (argmin, _) = scores
            .iter()
            .enumerate()
            .fold((0, f64::MAX), |acc, (i, &s)| if s < acc.1 { (i, s) } else { acc });
        assert_eq!(argmin, 100);
        assert!(scores.iter().all(|s| (-1.0..=0.0).contains(s)));

        let decision = forest.decision_function(&data).unwrap();
        assert!(decision[100] < 0.0);
        let outliers = decision.iter().filter(|d| **d < 0.0).count();
        assert!(outliers <= 11, "{outliers} outliers");
    }

    #[test]
    fn same_seed_same_scores() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, &config()).unwrap();
        let b = IsolationForest::fit(&data, &config()).unwrap();
        assert_eq!(a.score_samples(&data).unwrap(), b.score_samples(&data).unwrap());
    }

    #[test]
    fn rejects_ragged_input() {
        let forest = IsolationForest::fit(&cluster_with_outlier(), &config()).unwrap();
        let err = forest.score_samples(&[vec![1.0, 2.0, 3.0]]).unwrap_err();
        assert_eq!(
            err,
            DetectError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert!(IsolationForest::fit(&[], &config()).is_err());
    }
}
