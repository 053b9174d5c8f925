mod macros;
pub mod matrix;

pub use crate::matrix::{Matrix, MatrixError};
