use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Per-column standardisation to zero mean and unit variance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit column means and population standard deviations.
    ///
    /// Constant columns get a scale of 1 so they map to zero.
    pub fn fit(x: ArrayView2<f64>) -> Result<Self, ModelError> {
        if x.nrows() == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }

        let mean: Vec<f64> = x
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_else(|| vec![0.0; x.ncols()]);
        let scale: Vec<f64> = x
            .std_axis(Axis(0), 0.0)
            .iter()
            .map(|&s| if s > 1e-12 && s.is_finite() { s } else { 1.0 })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        self.check_width(x.ncols())?;
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                *v = (*v - m) / s;
            }
        }
        Ok(out)
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        self.check_width(row.len())?;
        Ok(row
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((v, m), s)| (v - m) / s)
            .collect())
    }

    fn check_width(&self, got: usize) -> Result<(), ModelError> {
        if got != self.n_features() {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features(),
                got,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_zero_mean_unit_variance() {
        let x = array![[1.0, 10.0, 5.0], [2.0, 20.0, 5.0], [3.0, 30.0, 5.0], [4.0, 40.0, 5.0]];
        let scaler = StandardScaler::fit(x.view()).unwrap();
        let z = scaler.transform(x.view()).unwrap();

        for col in 0..2 {
            let column = z.column(col);
            let mean = column.mean().unwrap();
            let std = column.std(0.0);
            assert!(mean.abs() < 1e-12);
            assert!((std - 1.0).abs() < 1e-12);
        }
        // Constant column maps to zero
        assert!(z.column(2).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_transform_row_matches_matrix() {
        let x = array![[1.0, -2.0], [3.0, 4.0], [5.0, 0.0]];
        let scaler = StandardScaler::fit(x.view()).unwrap();
        let z = scaler.transform(x.view()).unwrap();
        assert_eq!(scaler.transform_row(&[3.0, 4.0]).unwrap(), z.row(1).to_vec());
    }

    #[test]
    fn test_width_mismatch() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let scaler = StandardScaler::fit(x.view()).unwrap();
        assert!(matches!(
            scaler.transform_row(&[1.0]),
            Err(ModelError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_empty_fit() {
        let x = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            StandardScaler::fit(x.view()),
            Err(ModelError::EmptyTrainingSet)
        ));
    }
}
