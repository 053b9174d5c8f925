//! Per-column standardization fitted on a training set.

use crate::mnist::{MnistData, MnistError};
use matrix::Matrix;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Column means and standard deviations of a training set.
///
/// Constant columns (standard deviation 0, such as always-blank border
/// pixels) get a divisor of 1 so they map to 0 instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizationParams {
    pub mean: Array1<f64>,
    pub std_dev: Array1<f64>,
}

impl StandardizationParams {
    pub fn fit(data: &Matrix) -> Self {
        let mean = data.column_means();
        let std_dev = data
            .column_std_devs()
            .mapv(|s| if s == 0.0 { 1.0 } else { s });
        Self { mean, std_dev }
    }

    /// `(x - mean) / std_dev` column by column.
    pub fn standardize(&self, matrix: &Matrix) -> Result<Matrix, MnistError> {
        if matrix.cols() != self.mean.len() {
            return Err(MnistError::DataMismatch(format!(
                "expected {} columns, got {}",
                self.mean.len(),
                matrix.cols()
            )));
        }
        let standardized = (matrix.as_array() - &self.mean) / &self.std_dev;
        Ok(Matrix::from(standardized))
    }

    pub fn standardize_data(&self, data: &MnistData) -> Result<MnistData, MnistError> {
        MnistData::new(self.standardize(data.images())?, data.labels().to_vec())
    }
}
