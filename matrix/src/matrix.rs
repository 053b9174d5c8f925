use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised when a matrix cannot be built or indexed as requested.
#[derive(Debug, Error, PartialEq)]
pub enum MatrixError {
    #[error("Data length {len} does not match {rows}x{cols}")]
    Shape { rows: usize, cols: usize, len: usize },
    #[error("Row {index} out of bounds for matrix with {rows} rows")]
    RowOutOfBounds { index: usize, rows: usize },
    #[error("Ragged rows: row {row} has {actual} columns, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// A dense, row-major matrix of `f64` values.
///
/// Rows are samples and columns are features, so a batch of `n` inputs of
/// width `w` is an `n x w` matrix.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub(crate) data: Array2<f64>,
}

impl Matrix {
    /// Builds a matrix from row-major data.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, MatrixError> {
        let len = data.len();
        Array2::from_shape_vec((rows, cols), data)
            .map(Self::from)
            .map_err(|_| MatrixError::Shape { rows, cols, len })
    }

    /// Builds a matrix from a slice of equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MatrixError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (row, values) in rows.iter().enumerate() {
            if values.len() != cols {
                return Err(MatrixError::Ragged {
                    row,
                    expected: cols,
                    actual: values.len(),
                });
            }
            data.extend_from_slice(values);
        }
        Self::new(rows.len(), cols, data)
    }

    #[doc(hidden)]
    #[allow(clippy::panic)]
    pub fn from_macro_rows(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        match Self::new(rows, cols, data) {
            Ok(matrix) => matrix,
            Err(e) => panic!("{e}"),
        }
    }

    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
        }
    }

    #[inline(always)]
    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    #[inline(always)]
    #[must_use]
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied()
    }

    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    /// Gathers the given rows, in order, into a new matrix.
    ///
    /// Indices may repeat. Used to materialize a shuffled batch.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self, MatrixError> {
        let rows = self.rows();
        if let Some(&index) = indices.iter().find(|&&index| index >= rows) {
            return Err(MatrixError::RowOutOfBounds { index, rows });
        }
        Ok(Self::from(self.data.select(Axis(0), indices)))
    }

    /// Index of the largest value in every row.
    ///
    /// Ties resolve to the lowest column index. An empty row yields 0.
    #[must_use]
    pub fn argmax_rows(&self) -> Vec<usize> {
        self.data
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |(best, max), (idx, &value)| {
                        if value > max {
                            (idx, value)
                        } else {
                            (best, max)
                        }
                    })
                    .0
            })
            .collect()
    }

    #[must_use]
    pub fn row_sums(&self) -> Vec<f64> {
        self.data.sum_axis(Axis(1)).to_vec()
    }

    /// Mean of every column. Empty matrices yield zeros.
    #[must_use]
    pub fn column_means(&self) -> Array1<f64> {
        self.data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.cols()))
    }

    /// Population standard deviation of every column.
    #[must_use]
    pub fn column_std_devs(&self) -> Array1<f64> {
        if self.rows() == 0 {
            return Array1::zeros(self.cols());
        }
        self.data.std_axis(Axis(0), 0.0)
    }

    #[must_use]
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self::from(self.data.mapv(f))
    }
}

impl From<Array2<f64>> for Matrix {
    fn from(data: Array2<f64>) -> Self {
        Self { data }
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.data.rows() {
            for value in row {
                write!(f, "{:8.4}", value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
