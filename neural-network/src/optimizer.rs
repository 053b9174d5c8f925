//! Gradient descent optimizers.
//!
//! [`Optimizer`] is the configuration value; [`OptimizerState`] owns the
//! per-parameter slots (momentum accumulators, Adam moments) and is part of
//! the network snapshot, so restoring a snapshot also restores the slots.

use anyhow::{Result, anyhow};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    Sgd,
    Momentum { momentum: f64 },
    Adam { beta1: f64, beta2: f64, epsilon: f64 },
}

impl Optimizer {
    pub fn adam() -> Self {
        Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Optimizer::Sgd => Ok(()),
            Optimizer::Momentum { momentum } => {
                if !(momentum.is_finite() && (0.0..1.0).contains(&momentum)) {
                    return Err(anyhow!("momentum must be in [0, 1), got {momentum}"));
                }
                Ok(())
            }
            Optimizer::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
                    if !(beta.is_finite() && (0.0..1.0).contains(&beta)) {
                        return Err(anyhow!("adam {name} must be in [0, 1), got {beta}"));
                    }
                }
                if !(epsilon.is_finite() && epsilon > 0.0) {
                    return Err(anyhow!("adam epsilon must be > 0, got {epsilon}"));
                }
                Ok(())
            }
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::adam()
    }
}

impl fmt::Display for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Optimizer::Sgd => write!(f, "sgd"),
            Optimizer::Momentum { momentum } => write!(f, "momentum({momentum})"),
            Optimizer::Adam { .. } => write!(f, "adam"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    optimizer: Optimizer,
    learning_rate: f64,
    step: u64,
    first: Vec<ArrayD<f64>>,
    second: Vec<ArrayD<f64>>,
}

impl OptimizerState {
    /// Allocates zeroed slots for parameters of the given shapes.
    pub fn new(optimizer: Optimizer, learning_rate: f64, shapes: &[Vec<usize>]) -> Result<Self> {
        optimizer.validate()?;
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(anyhow!("learning rate must be > 0, got {learning_rate}"));
        }

        let zeros = |used: bool| -> Vec<ArrayD<f64>> {
            if used {
                shapes
                    .iter()
                    .map(|shape| ArrayD::zeros(IxDyn(shape)))
                    .collect()
            } else {
                Vec::new()
            }
        };

        let (first, second) = match optimizer {
            Optimizer::Sgd => (zeros(false), zeros(false)),
            Optimizer::Momentum { .. } => (zeros(true), zeros(false)),
            Optimizer::Adam { .. } => (zeros(true), zeros(true)),
        };

        Ok(Self {
            optimizer,
            learning_rate,
            step: 0,
            first,
            second,
        })
    }

    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Applies one update to every parameter, in the order the slots were
    /// allocated.
    pub fn apply(
        &mut self,
        params: Vec<ArrayViewMutD<'_, f64>>,
        grads: Vec<ArrayViewD<'_, f64>>,
    ) -> Result<()> {
        if params.len() != grads.len() {
            return Err(anyhow!(
                "{} parameters but {} gradients",
                params.len(),
                grads.len()
            ));
        }
        for (param, grad) in params.iter().zip(&grads) {
            if param.shape() != grad.shape() {
                return Err(anyhow!(
                    "Gradient shape {:?} does not match parameter shape {:?}",
                    grad.shape(),
                    param.shape()
                ));
            }
        }

        self.step += 1;
        let lr = self.learning_rate;

        match self.optimizer {
            Optimizer::Sgd => {
                for (mut param, grad) in params.into_iter().zip(grads) {
                    param.scaled_add(-lr, &grad);
                }
            }
            Optimizer::Momentum { momentum } => {
                check_slots(&self.first, &params)?;
                for ((param, grad), accum) in params.into_iter().zip(grads).zip(&mut self.first) {
                    Zip::from(param)
                        .and(&grad)
                        .and(accum)
                        .for_each(|p, &g, a| {
                            *a = momentum * *a + g;
                            *p -= lr * *a;
                        });
                }
            }
            Optimizer::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                check_slots(&self.first, &params)?;
                check_slots(&self.second, &params)?;
                let t = self.step as i32;
                let lr_t = lr * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));
                for (((param, grad), m), v) in params
                    .into_iter()
                    .zip(grads)
                    .zip(&mut self.first)
                    .zip(&mut self.second)
                {
                    Zip::from(param)
                        .and(&grad)
                        .and(m)
                        .and(v)
                        .for_each(|p, &g, m, v| {
                            *m = beta1 * *m + (1.0 - beta1) * g;
                            *v = beta2 * *v + (1.0 - beta2) * g * g;
                            *p -= lr_t * *m / (v.sqrt() + epsilon);
                        });
                }
            }
        }

        Ok(())
    }
}

fn check_slots(slots: &[ArrayD<f64>], params: &[ArrayViewMutD<'_, f64>]) -> Result<()> {
    if slots.len() != params.len()
        || slots
            .iter()
            .zip(params)
            .any(|(slot, param)| slot.shape() != param.shape())
    {
        return Err(anyhow!("Optimizer slots do not match the network parameters"));
    }
    Ok(())
}
