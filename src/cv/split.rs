use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use tracing::warn;

use super::CvError;

/// Train/test partition of sample indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffled stratified k-fold splitter.
///
/// Each class's members are shuffled with a seeded RNG and dealt
/// round-robin into the folds. The rotation carries over from one class to
/// the next so fold sizes differ by at most one, and each fold holds every
/// class in roughly its overall proportion.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    pub n_splits: usize,
    pub seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize, seed: u64) -> Self {
        Self { n_splits, seed }
    }

    /// Folds over `labels`; identical labels and seed give identical folds
    pub fn split(&self, labels: &[usize]) -> Result<Vec<Fold>, CvError> {
        let n = labels.len();
        if self.n_splits < 2 {
            return Err(CvError::InvalidSplits(self.n_splits));
        }
        if n < 2 {
            return Err(CvError::TooFewSamples(n));
        }

        let k = if self.n_splits > n {
            warn!(
                "Requested {} folds for {} samples, using {}",
                self.n_splits, n, n
            );
            n
        } else {
            self.n_splits
        };

        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, &label) in labels.iter().enumerate() {
            by_class.entry(label).or_default().push(idx);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut assignment = vec![0usize; n];
        let mut next = 0usize;
        for members in by_class.values_mut() {
            members.shuffle(&mut rng);
            for &idx in members.iter() {
                assignment[idx] = next % k;
                next += 1;
            }
        }

        Ok((0..k)
            .map(|fold| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..n).partition(|&idx| assignment[idx] == fold);
                Fold { train, test }
            })
            .collect())
    }
}
