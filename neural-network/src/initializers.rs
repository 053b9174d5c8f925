//! Weight initialization strategies.
//!
//! An [`Initializer`] is a plain value carried by the network configuration,
//! so every network instance picks its own strategy.

use anyhow::{Result, anyhow};
use ndarray::Array2;
use rand::Rng;
use rand::distr::Uniform;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard deviation of a unit normal truncated to two standard deviations.
const TRUNCATED_NORMAL_STD: f64 = 0.879_625_661_034_239_8;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Truncated normal with variance `scale / fan_in`.
    VarianceScaling { scale: f64 },
    /// Uniform in `±sqrt(6 / (fan_in + fan_out))`.
    GlorotUniform,
    /// Uniform in `±limit`.
    Uniform { limit: f64 },
}

impl Initializer {
    /// The "he" strategy: fan-in variance scaling with unit scale.
    pub const HE: Initializer = Initializer::VarianceScaling { scale: 1.0 };

    /// Samples a `fan_in x fan_out` weight matrix.
    pub fn weights<R: Rng + ?Sized>(
        &self,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        if fan_in == 0 || fan_out == 0 {
            return Err(anyhow!(
                "Cannot initialize a {}x{} weight matrix",
                fan_in,
                fan_out
            ));
        }

        match *self {
            Initializer::VarianceScaling { scale } => {
                let std_dev = (scale / fan_in as f64).sqrt() / TRUNCATED_NORMAL_STD;
                let normal = Normal::new(0.0, std_dev)
                    .map_err(|e| anyhow!("Invalid variance scaling ({scale}): {e}"))?;
                let bound = 2.0 * std_dev;
                Ok(Array2::from_shape_fn((fan_in, fan_out), |_| loop {
                    let value = normal.sample(&mut *rng);
                    if value.abs() <= bound {
                        break value;
                    }
                }))
            }
            Initializer::GlorotUniform => {
                let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
                uniform(fan_in, fan_out, limit, rng)
            }
            Initializer::Uniform { limit } => uniform(fan_in, fan_out, limit, rng),
        }
    }
}

fn uniform<R: Rng + ?Sized>(
    fan_in: usize,
    fan_out: usize,
    limit: f64,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let dist = Uniform::new(-limit, limit)
        .map_err(|e| anyhow!("Invalid uniform limit {limit}: {e}"))?;
    Ok(Array2::from_shape_fn((fan_in, fan_out), |_| dist.sample(&mut *rng)))
}

impl Default for Initializer {
    fn default() -> Self {
        Initializer::HE
    }
}

impl fmt::Display for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initializer::VarianceScaling { scale } => write!(f, "variance_scaling({scale})"),
            Initializer::GlorotUniform => write!(f, "glorot_uniform"),
            Initializer::Uniform { limit } => write!(f, "uniform({limit})"),
        }
    }
}
