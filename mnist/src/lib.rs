pub mod mnist;
pub mod standardize;

pub use crate::mnist::*;
pub use crate::standardize::StandardizationParams;
