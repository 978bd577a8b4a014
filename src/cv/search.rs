//! Bayesian hyperparameter search over a discrete (C, gamma) grid.
//!
//! After a few random initial evaluations, a Gaussian-process surrogate
//! fitted to the scores so far ranks the remaining grid points by expected
//! improvement. Every candidate is scored by mean inner-fold macro recall.

use ndarray::{ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, info};

use super::metrics::{mean, recall_macro};
use super::split::{Fold, StratifiedKFold};
use super::CvError;
use crate::model::{OneVsOne, SvcParams};

/// Exploration margin for expected improvement
const EI_XI: f64 = 0.01;

/// GP kernel length scale in normalised coordinates
const GP_LENGTH_SCALE: f64 = 0.25;

/// Observation noise added to the GP diagonal
const GP_NOISE: f64 = 1e-6;

/// Candidate values for each hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpace {
    pub c: Vec<f64>,
    pub gamma: Vec<f64>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        let grid: Vec<f64> = (-5..=5).map(|e| 10f64.powi(e)).collect();
        Self {
            c: grid.clone(),
            gamma: grid,
        }
    }
}

impl SearchSpace {
    pub fn len(&self) -> usize {
        self.c.len() * self.gamma.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All (C, gamma) combinations, C-major
    pub fn candidates(&self) -> Vec<SvcParams> {
        self.c
            .iter()
            .flat_map(|&c| self.gamma.iter().map(move |&gamma| SvcParams::new(c, gamma)))
            .collect()
    }
}

/// Search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub space: SearchSpace,
    /// Total evaluations, capped at the grid size
    pub n_iter: usize,
    /// Random evaluations before the surrogate takes over
    pub n_initial_points: usize,
    pub inner_folds: usize,
    pub seed: u64,
    /// Worker threads for inner folds (0 = all cores)
    pub n_jobs: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            space: SearchSpace::default(),
            n_iter: 50,
            n_initial_points: 10,
            inner_folds: 10,
            seed: 42,
            n_jobs: 0,
        }
    }
}

/// One evaluated candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub params: SvcParams,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub best_params: SvcParams,
    /// Mean inner-fold macro recall of `best_params`
    pub best_score: f64,
    /// Refit on the whole training partition with `best_params`
    pub best_estimator: OneVsOne,
    /// Evaluations in the order they were made
    pub history: Vec<Evaluation>,
}

pub struct BayesSearch {
    config: SearchConfig,
}

impl BayesSearch {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Search the grid on `(x, y)` and refit the winner
    pub fn fit(&self, x: ArrayView2<f64>, y: &[usize]) -> Result<SearchResult, CvError> {
        let candidates = self.config.space.candidates();
        if candidates.is_empty() {
            return Err(CvError::EmptySearchSpace);
        }
        if x.nrows() != y.len() {
            return Err(CvError::LabelCountMismatch {
                rows: x.nrows(),
                labels: y.len(),
            });
        }

        let folds = StratifiedKFold::new(self.config.inner_folds, self.config.seed).split(y)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.n_jobs)
            .build()
            .map_err(|e| CvError::ThreadPool(e.to_string()))?;

        let n_iter = self.config.n_iter.clamp(1, candidates.len());
        let n_initial = self.config.n_initial_points.clamp(1, n_iter);
        let coords: Vec<[f64; 2]> = normalised_coordinates(&self.config.space, &candidates);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut evaluated = vec![false; candidates.len()];
        let mut order: Vec<usize> = Vec::with_capacity(n_iter);
        let mut scores: Vec<f64> = Vec::with_capacity(n_iter);

        for idx in sample(&mut rng, candidates.len(), n_initial).into_iter() {
            let score = pool.install(|| score_candidate(x, y, &folds, candidates[idx]))?;
            evaluated[idx] = true;
            order.push(idx);
            scores.push(score);
        }

        while order.len() < n_iter {
            let observed: Vec<[f64; 2]> = order.iter().map(|&i| coords[i]).collect();
            let next = match GaussianProcess::fit(&observed, &scores) {
                Some(gp) => {
                    let best = gp.best_normalised();
                    let mut pick = None;
                    let mut best_ei = f64::NEG_INFINITY;
                    for (idx, point) in coords.iter().enumerate() {
                        if evaluated[idx] {
                            continue;
                        }
                        let ei = gp.expected_improvement(point, best);
                        if ei > best_ei {
                            best_ei = ei;
                            pick = Some(idx);
                        }
                    }
                    pick
                }
                None => {
                    debug!("Surrogate fit failed, falling back to the next unevaluated candidate");
                    evaluated.iter().position(|done| !done)
                }
            };
            let Some(idx) = next else { break };

            let score = pool.install(|| score_candidate(x, y, &folds, candidates[idx]))?;
            evaluated[idx] = true;
            order.push(idx);
            scores.push(score);
        }

        let history: Vec<Evaluation> = order
            .iter()
            .zip(&scores)
            .map(|(&idx, &score)| Evaluation {
                params: candidates[idx],
                score,
            })
            .collect();

        let mut best = history[0];
        for eval in &history[1..] {
            if eval.score > best.score {
                best = *eval;
            }
        }

        info!(
            "Search finished after {} evaluations: C={}, gamma={}, inner recall={:.4}",
            history.len(),
            best.params.c,
            best.params.gamma,
            best.score
        );

        let best_estimator = OneVsOne::fit(x, y, best.params)?;

        Ok(SearchResult {
            best_params: best.params,
            best_score: best.score,
            best_estimator,
            history,
        })
    }
}

/// Mean macro recall over the inner folds, folds evaluated in parallel
fn score_candidate(
    x: ArrayView2<f64>,
    y: &[usize],
    folds: &[Fold],
    params: SvcParams,
) -> Result<f64, CvError> {
    let fold_scores = folds
        .par_iter()
        .map(|fold| -> Result<f64, CvError> {
            let x_train = x.select(Axis(0), &fold.train);
            let y_train: Vec<usize> = fold.train.iter().map(|&i| y[i]).collect();
            let model = OneVsOne::fit(x_train.view(), &y_train, params)?;

            let x_test = x.select(Axis(0), &fold.test);
            let y_test: Vec<usize> = fold.test.iter().map(|&i| y[i]).collect();
            Ok(recall_macro(&y_test, &model.predict(x_test.view())))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let score = mean(&fold_scores);
    debug!("C={:e} gamma={:e}: inner recall {:.4}", params.c, params.gamma, score);
    Ok(score)
}

/// Map each candidate to [0, 1]^2 using log10 of its parameters
fn normalised_coordinates(space: &SearchSpace, candidates: &[SvcParams]) -> Vec<[f64; 2]> {
    let bounds = |values: &[f64]| {
        let logs: Vec<f64> = values.iter().map(|v| v.log10()).collect();
        let lo = logs.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lo, hi)
    };
    let scale = |v: f64, (lo, hi): (f64, f64)| {
        if hi > lo {
            (v.log10() - lo) / (hi - lo)
        } else {
            0.0
        }
    };
    let c_bounds = bounds(&space.c);
    let g_bounds = bounds(&space.gamma);
    candidates
        .iter()
        .map(|p| [scale(p.c, c_bounds), scale(p.gamma, g_bounds)])
        .collect()
}

/// Zero-mean GP regression with an RBF kernel on standardised targets
struct GaussianProcess {
    points: Vec<[f64; 2]>,
    /// Lower Cholesky factor of K + noise I
    chol: Vec<Vec<f64>>,
    /// (K + noise I)^-1 y
    alpha: Vec<f64>,
    y_norm: Vec<f64>,
}

impl GaussianProcess {
    fn kernel(a: &[f64; 2], b: &[f64; 2]) -> f64 {
        let d2 = (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2);
        (-d2 / (2.0 * GP_LENGTH_SCALE * GP_LENGTH_SCALE)).exp()
    }

    fn fit(points: &[[f64; 2]], scores: &[f64]) -> Option<Self> {
        let n = points.len();
        if n == 0 {
            return None;
        }

        let mu = mean(scores);
        let sd = (scores.iter().map(|s| (s - mu).powi(2)).sum::<f64>() / n as f64).sqrt();
        let sd = if sd > 1e-12 { sd } else { 1.0 };
        let y_norm: Vec<f64> = scores.iter().map(|s| (s - mu) / sd).collect();

        let mut gram = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                gram[i][j] = Self::kernel(&points[i], &points[j]);
            }
            gram[i][i] += GP_NOISE;
        }
        let chol = cholesky(&gram)?;
        let alpha = cholesky_solve(&chol, &y_norm);

        Some(Self {
            points: points.to_vec(),
            chol,
            alpha,
            y_norm,
        })
    }

    fn best_normalised(&self) -> f64 {
        self.y_norm.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    fn predict(&self, point: &[f64; 2]) -> (f64, f64) {
        let k_star: Vec<f64> = self.points.iter().map(|p| Self::kernel(p, point)).collect();
        let mu: f64 = k_star.iter().zip(&self.alpha).map(|(k, a)| k * a).sum();
        let v = forward_substitute(&self.chol, &k_star);
        let var = (1.0 - v.iter().map(|x| x * x).sum::<f64>()).max(1e-12);
        (mu, var.sqrt())
    }

    fn expected_improvement(&self, point: &[f64; 2], best: f64) -> f64 {
        let (mu, sigma) = self.predict(point);
        let improvement = mu - best - EI_XI;
        let z = improvement / sigma;
        improvement * normal_cdf(z) + sigma * normal_pdf(z)
    }
}

fn cholesky(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let d = a[i][i] - sum;
                if d <= 0.0 || !d.is_finite() {
                    return None;
                }
                l[i][j] = d.sqrt();
            } else {
                l[i][j] = (a[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}

/// Solve L x = b
fn forward_substitute(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[i][k] * x[k]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

/// Solve (L L^T) x = b
fn cholesky_solve(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let z = forward_substitute(l, b);
    let n = z.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (z[i] - sum) / l[i][i];
    }
    x
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * PI).sqrt()
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::metrics::accuracy;
    use ndarray::Array2;

    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let centers = [(-2.0, -2.0), (2.0, 2.0), (-2.0, 2.0)];
        let mut flat = Vec::new();
        let mut y = Vec::new();
        for (label, (cx, cy)) in centers.iter().enumerate() {
            for k in 0..6 {
                let t = k as f64 * 0.7;
                flat.push(cx + 0.3 * t.sin());
                flat.push(cy + 0.3 * t.cos());
                y.push(label);
            }
        }
        (Array2::from_shape_vec((y.len(), 2), flat).unwrap(), y)
    }

    fn small_config() -> SearchConfig {
        SearchConfig {
            n_iter: 12,
            n_initial_points: 4,
            inner_folds: 3,
            n_jobs: 2,
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_default_space() {
        let space = SearchSpace::default();
        assert_eq!(space.c.len(), 11);
        assert_eq!(space.len(), 121);
        assert_eq!(space.c[0], 1e-5);
        assert_eq!(space.gamma[10], 1e5);
    }

    #[test]
    fn test_search_finds_good_params() {
        let (x, y) = blobs();
        let result = BayesSearch::new(small_config()).fit(x.view(), &y).unwrap();
        assert_eq!(result.history.len(), 12);
        assert!(result.best_score > 0.9, "best score {}", result.best_score);
        assert_eq!(result.best_estimator.params(), result.best_params);
        let train_acc = accuracy(&y, &result.best_estimator.predict(x.view()));
        assert!(train_acc >= 0.9, "training accuracy {}", train_acc);
    }

    #[test]
    fn test_candidates_evaluated_once() {
        let (x, y) = blobs();
        let result = BayesSearch::new(small_config()).fit(x.view(), &y).unwrap();
        for (i, a) in result.history.iter().enumerate() {
            for b in &result.history[i + 1..] {
                assert_ne!(a.params, b.params);
            }
        }
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let (x, y) = blobs();
        let a = BayesSearch::new(small_config()).fit(x.view(), &y).unwrap();
        let b = BayesSearch::new(small_config()).fit(x.view(), &y).unwrap();
        assert_eq!(a.history, b.history);
        assert_eq!(a.best_params, b.best_params);
    }

    #[test]
    fn test_n_iter_capped_at_grid() {
        let (x, y) = blobs();
        let config = SearchConfig {
            space: SearchSpace {
                c: vec![1.0, 10.0],
                gamma: vec![0.1, 1.0],
            },
            n_iter: 50,
            ..small_config()
        };
        let result = BayesSearch::new(config).fit(x.view(), &y).unwrap();
        assert_eq!(result.history.len(), 4);
    }

    #[test]
    fn test_empty_space() {
        let (x, y) = blobs();
        let config = SearchConfig {
            space: SearchSpace {
                c: vec![],
                gamma: vec![1.0],
            },
            ..small_config()
        };
        assert!(matches!(
            BayesSearch::new(config).fit(x.view(), &y),
            Err(CvError::EmptySearchSpace)
        ));
    }

    #[test]
    fn test_gp_interpolates_observations() {
        let points = [[0.0, 0.0], [0.5, 0.5], [1.0, 1.0]];
        let scores = [0.2, 0.9, 0.4];
        let gp = GaussianProcess::fit(&points, &scores).unwrap();
        let (mu, sigma) = gp.predict(&[0.5, 0.5]);
        assert!((mu - gp.y_norm[1]).abs() < 1e-3);
        assert!(sigma < 0.05);
        // Far from data the surrogate is uncertain
        let (_, far_sigma) = gp.predict(&[0.0, 1.0]);
        assert!(far_sigma > 0.5);
    }

    #[test]
    fn test_erf_reference_values() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
    }
}
