//! Binary RBF-kernel support vector classifier.
//!
//! The dual problem is solved by sequential minimal optimization with
//! second-order working set selection (Fan, Chen & Lin 2005), the same
//! scheme used by libsvm. The kernel matrix of the training subset is
//! computed once up front.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ModelError;

/// Curvature floor for non-positive-definite pairs
const TAU: f64 = 1e-12;

/// Hyperparameters of one binary machine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SvcParams {
    /// Regularisation strength (box constraint)
    pub c: f64,
    /// RBF kernel coefficient
    pub gamma: f64,
    /// KKT violation tolerance
    pub tol: f64,
}

impl SvcParams {
    pub fn new(c: f64, gamma: f64) -> Self {
        Self { c, gamma, tol: 1e-3 }
    }
}

impl Default for SvcParams {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

pub fn rbf_kernel(a: &[f64], b: &[f64], gamma: f64) -> f64 {
    let dist: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * dist).exp()
}

/// Fitted binary classifier; positive decision values mean the `+1` class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinarySvc {
    support_vectors: Vec<Vec<f64>>,
    /// `alpha_i * y_i` for each support vector
    dual_coef: Vec<f64>,
    intercept: f64,
    gamma: f64,
}

impl BinarySvc {
    /// Fit on the rows of `x` selected by `indices`, with labels `y` in {-1, +1}
    pub fn fit(
        x: ArrayView2<f64>,
        indices: &[usize],
        y: &[f64],
        params: SvcParams,
    ) -> Result<Self, ModelError> {
        let n = indices.len();
        if n == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        debug_assert_eq!(n, y.len());

        let rows: Vec<Vec<f64>> = indices.iter().map(|&i| x.row(i).to_vec()).collect();

        let mut kernel = vec![0.0; n * n];
        for i in 0..n {
            kernel[i * n + i] = 1.0;
            for j in (i + 1)..n {
                let k = rbf_kernel(&rows[i], &rows[j], params.gamma);
                kernel[i * n + j] = k;
                kernel[j * n + i] = k;
            }
        }

        let solution = Solver::new(&kernel, y, params).solve();

        let mut support_vectors = Vec::new();
        let mut dual_coef = Vec::new();
        for (i, &alpha) in solution.alpha.iter().enumerate() {
            if alpha > 0.0 {
                support_vectors.push(rows[i].clone());
                dual_coef.push(alpha * y[i]);
            }
        }

        Ok(Self {
            support_vectors,
            dual_coef,
            intercept: -solution.rho,
            gamma: params.gamma,
        })
    }

    pub fn decision_function(&self, x: &[f64]) -> f64 {
        self.support_vectors
            .iter()
            .zip(&self.dual_coef)
            .map(|(sv, coef)| coef * rbf_kernel(sv, x, self.gamma))
            .sum::<f64>()
            + self.intercept
    }

    pub fn n_support(&self) -> usize {
        self.support_vectors.len()
    }
}

struct Solution {
    alpha: Vec<f64>,
    rho: f64,
}

struct Solver<'a> {
    kernel: &'a [f64],
    y: &'a [f64],
    n: usize,
    c: f64,
    eps: f64,
    alpha: Vec<f64>,
    grad: Vec<f64>,
}

impl<'a> Solver<'a> {
    fn new(kernel: &'a [f64], y: &'a [f64], params: SvcParams) -> Self {
        let n = y.len();
        Self {
            kernel,
            y,
            n,
            c: params.c,
            eps: params.tol,
            alpha: vec![0.0; n],
            grad: vec![-1.0; n],
        }
    }

    fn k(&self, i: usize, j: usize) -> f64 {
        self.kernel[i * self.n + j]
    }

    fn is_upper(&self, t: usize) -> bool {
        self.alpha[t] >= self.c
    }

    fn is_lower(&self, t: usize) -> bool {
        self.alpha[t] <= 0.0
    }

    /// Maximal violating pair with second-order selection of `j`
    fn select_working_set(&self) -> Option<(usize, usize)> {
        let mut gmax = f64::NEG_INFINITY;
        let mut gmax_idx = None;
        for t in 0..self.n {
            let in_up = if self.y[t] > 0.0 {
                !self.is_upper(t)
            } else {
                !self.is_lower(t)
            };
            if in_up {
                let v = -self.y[t] * self.grad[t];
                if v >= gmax {
                    gmax = v;
                    gmax_idx = Some(t);
                }
            }
        }
        let i = gmax_idx?;

        let mut gmax2 = f64::NEG_INFINITY;
        let mut best_j = None;
        let mut obj_min = f64::INFINITY;
        for t in 0..self.n {
            let in_low = if self.y[t] > 0.0 {
                !self.is_lower(t)
            } else {
                !self.is_upper(t)
            };
            if !in_low {
                continue;
            }
            let v = self.y[t] * self.grad[t];
            if v >= gmax2 {
                gmax2 = v;
            }
            let grad_diff = gmax + v;
            if grad_diff > 0.0 {
                let quad = self.k(i, i) + self.k(t, t) - 2.0 * self.k(i, t);
                let obj = -(grad_diff * grad_diff) / if quad > 0.0 { quad } else { TAU };
                if obj <= obj_min {
                    obj_min = obj;
                    best_j = Some(t);
                }
            }
        }

        if gmax + gmax2 < self.eps {
            return None;
        }
        best_j.map(|j| (i, j))
    }

    fn solve(mut self) -> Solution {
        let max_iter = 10_000_000usize.max(100 * self.n);
        let mut iter = 0;

        while let Some((i, j)) = self.select_working_set() {
            if iter >= max_iter {
                warn!("SMO reached {} iterations without converging", max_iter);
                break;
            }
            iter += 1;
            self.update_pair(i, j);
        }

        let rho = self.calculate_rho();
        Solution {
            alpha: self.alpha,
            rho,
        }
    }

    fn update_pair(&mut self, i: usize, j: usize) {
        let c = self.c;
        let (yi, yj) = (self.y[i], self.y[j]);
        let (old_ai, old_aj) = (self.alpha[i], self.alpha[j]);
        let quad = (self.k(i, i) + self.k(j, j) - 2.0 * self.k(i, j)).max(TAU);

        let (mut ai, mut aj) = (old_ai, old_aj);
        if yi != yj {
            let delta = (-self.grad[i] - self.grad[j]) / quad;
            let diff = ai - aj;
            ai += delta;
            aj += delta;
            if diff > 0.0 {
                if aj < 0.0 {
                    aj = 0.0;
                    ai = diff;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = -diff;
            }
            if diff > 0.0 {
                if ai > c {
                    ai = c;
                    aj = c - diff;
                }
            } else if aj > c {
                aj = c;
                ai = c + diff;
            }
        } else {
            let delta = (self.grad[i] - self.grad[j]) / quad;
            let sum = ai + aj;
            ai -= delta;
            aj += delta;
            if sum > c {
                if ai > c {
                    ai = c;
                    aj = sum - c;
                }
            } else if aj < 0.0 {
                aj = 0.0;
                ai = sum;
            }
            if sum > c {
                if aj > c {
                    aj = c;
                    ai = sum - c;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = sum;
            }
        }

        self.alpha[i] = ai;
        self.alpha[j] = aj;

        // Q_ti = y_t y_i K_ti
        let (dai, daj) = (ai - old_ai, aj - old_aj);
        for t in 0..self.n {
            let yt = self.y[t];
            self.grad[t] += yt * (yi * self.k(t, i) * dai + yj * self.k(t, j) * daj);
        }
    }

    fn calculate_rho(&self) -> f64 {
        let mut ub = f64::INFINITY;
        let mut lb = f64::NEG_INFINITY;
        let mut sum_free = 0.0;
        let mut n_free = 0usize;

        for t in 0..self.n {
            let yg = self.y[t] * self.grad[t];
            if self.is_upper(t) {
                if self.y[t] < 0.0 {
                    ub = ub.min(yg);
                } else {
                    lb = lb.max(yg);
                }
            } else if self.is_lower(t) {
                if self.y[t] > 0.0 {
                    ub = ub.min(yg);
                } else {
                    lb = lb.max(yg);
                }
            } else {
                n_free += 1;
                sum_free += yg;
            }
        }

        if n_free > 0 {
            sum_free / n_free as f64
        } else {
            (ub + lb) / 2.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn two_blobs() -> (Array2<f64>, Vec<f64>) {
        let x = array![
            [0.0, 0.0],
            [0.2, 0.1],
            [0.1, 0.3],
            [-0.1, 0.2],
            [3.0, 3.0],
            [3.2, 2.9],
            [2.8, 3.1],
            [3.1, 3.3],
        ];
        let y = vec![-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_separates_blobs() {
        let (x, y) = two_blobs();
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let svc = BinarySvc::fit(x.view(), &indices, &y, SvcParams::new(10.0, 0.5)).unwrap();

        for (i, label) in y.iter().enumerate() {
            let d = svc.decision_function(&x.row(i).to_vec());
            assert!(d * label > 0.0, "sample {} misclassified (d = {})", i, d);
        }
        assert!(svc.decision_function(&[-0.5, -0.5]) < 0.0);
        assert!(svc.decision_function(&[3.5, 3.5]) > 0.0);
        assert!(svc.n_support() >= 2);
    }

    #[test]
    fn test_kkt_holds_at_solution() {
        let (x, y) = two_blobs();
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let params = SvcParams::new(1.0, 0.5);
        let svc = BinarySvc::fit(x.view(), &indices, &y, params).unwrap();

        // Dual coefficients sum to zero and stay inside the box
        let sum: f64 = svc.dual_coef.iter().sum();
        assert!(sum.abs() < 1e-9);
        assert!(svc.dual_coef.iter().all(|c| c.abs() <= params.c + 1e-12));
    }

    #[test]
    fn test_tiny_c_still_predicts_training_majority_side() {
        let (x, y) = two_blobs();
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let svc = BinarySvc::fit(x.view(), &indices, &y, SvcParams::new(1e-5, 1e5)).unwrap();
        assert!(svc.decision_function(&[0.0, 0.0]).is_finite());
    }

    #[test]
    fn test_subset_indices() {
        let (x, y) = two_blobs();
        // Train on one point of each class only
        let svc = BinarySvc::fit(x.view(), &[0, 4], &[y[0], y[4]], SvcParams::new(1.0, 0.1)).unwrap();
        assert!(svc.decision_function(&[0.0, 0.0]) < 0.0);
        assert!(svc.decision_function(&[3.0, 3.0]) > 0.0);
        assert_eq!(svc.n_support(), 2);
    }

    #[test]
    fn test_rbf_kernel() {
        assert_eq!(rbf_kernel(&[1.0, 2.0], &[1.0, 2.0], 3.0), 1.0);
        assert!((rbf_kernel(&[0.0], &[1.0], 1.0) - (-1.0f64).exp()).abs() < 1e-15);
    }
}
