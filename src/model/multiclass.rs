//! One-vs-one multiclass reduction over binary SVMs.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::svm::{BinarySvc, SvcParams};
use super::ModelError;

/// Machine trained on one pair of classes.
///
/// A positive decision value votes for `classes[j]`, a negative one for
/// `classes[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PairMachine {
    i: usize,
    j: usize,
    svc: BinarySvc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneVsOne {
    /// Sorted class ids seen during fitting
    classes: Vec<usize>,
    machines: Vec<PairMachine>,
    params: SvcParams,
}

impl OneVsOne {
    /// Train K(K-1)/2 machines, one for each pair of classes present in `y`.
    ///
    /// With a single class present no machine is trained and every
    /// prediction is that class.
    pub fn fit(x: ArrayView2<f64>, y: &[usize], params: SvcParams) -> Result<Self, ModelError> {
        if x.nrows() == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        if x.nrows() != y.len() {
            return Err(ModelError::LabelCountMismatch {
                rows: x.nrows(),
                labels: y.len(),
            });
        }

        let mut classes = y.to_vec();
        classes.sort_unstable();
        classes.dedup();

        let mut machines = Vec::with_capacity(classes.len() * classes.len().saturating_sub(1) / 2);
        for i in 0..classes.len() {
            for j in (i + 1)..classes.len() {
                let (neg, pos) = (classes[i], classes[j]);
                let mut indices = Vec::new();
                let mut targets = Vec::new();
                for (row, &label) in y.iter().enumerate() {
                    if label == neg {
                        indices.push(row);
                        targets.push(-1.0);
                    } else if label == pos {
                        indices.push(row);
                        targets.push(1.0);
                    }
                }
                let svc = BinarySvc::fit(x, &indices, &targets, params)?;
                machines.push(PairMachine { i, j, svc });
            }
        }

        debug!(
            "Trained {} pairwise machines over {} classes (C={}, gamma={})",
            machines.len(),
            classes.len(),
            params.c,
            params.gamma
        );

        Ok(Self {
            classes,
            machines,
            params,
        })
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn params(&self) -> SvcParams {
        self.params
    }

    /// Predict one (already scaled) row.
    ///
    /// Each machine casts one vote; ties are broken by adding the summed
    /// decision values squashed into (-1/3, 1/3), so they can never
    /// outweigh a whole vote.
    pub fn predict_row(&self, row: &[f64]) -> usize {
        if self.classes.len() == 1 {
            return self.classes[0];
        }

        let k = self.classes.len();
        let mut votes = vec![0.0f64; k];
        let mut confidences = vec![0.0f64; k];
        for machine in &self.machines {
            let d = machine.svc.decision_function(row);
            if d > 0.0 {
                votes[machine.j] += 1.0;
            } else {
                votes[machine.i] += 1.0;
            }
            confidences[machine.j] += d;
            confidences[machine.i] -= d;
        }

        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (idx, (v, s)) in votes.iter().zip(&confidences).enumerate() {
            let score = v + s / (3.0 * (s.abs() + 1.0));
            if score > best_score {
                best_score = score;
                best = idx;
            }
        }
        self.classes[best]
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Vec<usize> {
        x.rows()
            .into_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.predict_row(slice),
                None => self.predict_row(&row.to_vec()),
            })
            .collect()
    }
}
