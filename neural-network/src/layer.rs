//! Dense layers with optional batch normalization and input dropout.

use crate::activations::Activation;
use crate::initializers::Initializer;
use anyhow::{Result, anyhow};
use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Variance epsilon used by batch normalization.
pub const BATCH_NORM_EPSILON: f64 = 0.001;

/// Whether a forward pass is part of training.
///
/// Training passes draw dropout masks from the borrowed generator and
/// normalize with batch statistics; inference passes use the moving
/// statistics and no dropout.
pub(crate) enum Mode<'a> {
    Train(&'a mut StdRng),
    Infer,
}

/// Batch normalization parameters and moving statistics for one layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNorm {
    gamma: Array1<f64>,
    beta: Array1<f64>,
    moving_mean: Array1<f64>,
    moving_variance: Array1<f64>,
    momentum: f64,
}

impl BatchNorm {
    fn new(width: usize, momentum: f64) -> Self {
        Self {
            gamma: Array1::ones(width),
            beta: Array1::zeros(width),
            moving_mean: Array1::zeros(width),
            moving_variance: Array1::ones(width),
            momentum,
        }
    }

    pub fn moving_mean(&self) -> &Array1<f64> {
        &self.moving_mean
    }

    pub fn moving_variance(&self) -> &Array1<f64> {
        &self.moving_variance
    }
}

pub(crate) struct NormCache {
    normalized: Array2<f64>,
    inv_std: Array1<f64>,
    mean: Array1<f64>,
    variance: Array1<f64>,
}

pub(crate) struct LayerCache {
    input: Array2<f64>,
    mask: Option<Array2<f64>>,
    norm: Option<NormCache>,
    pre_activation: Array2<f64>,
}

pub(crate) struct LayerGradients {
    weights: Array2<f64>,
    bias: Array1<f64>,
    gamma: Option<Array1<f64>>,
    beta: Option<Array1<f64>>,
}

impl LayerGradients {
    pub(crate) fn views(&self) -> Vec<ArrayViewD<'_, f64>> {
        let mut views = vec![self.weights.view().into_dyn(), self.bias.view().into_dyn()];
        if let (Some(gamma), Some(beta)) = (&self.gamma, &self.beta) {
            views.push(gamma.view().into_dyn());
            views.push(beta.view().into_dyn());
        }
        views
    }
}

/// A fully-connected layer: `activation(norm(dropout(x) · W + b))`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    batch_norm: Option<BatchNorm>,
}

impl DenseLayer {
    pub fn new(
        fan_in: usize,
        fan_out: usize,
        initializer: &Initializer,
        batch_norm_momentum: Option<f64>,
        rng: &mut StdRng,
    ) -> Result<Self> {
        Ok(Self {
            weights: initializer.weights(fan_in, fan_out, rng)?,
            bias: Array1::zeros(fan_out),
            batch_norm: batch_norm_momentum.map(|momentum| BatchNorm::new(fan_out, momentum)),
        })
    }

    pub fn fan_in(&self) -> usize {
        self.weights.nrows()
    }

    pub fn fan_out(&self) -> usize {
        self.weights.ncols()
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn batch_norm(&self) -> Option<&BatchNorm> {
        self.batch_norm.as_ref()
    }

    pub(crate) fn parameter_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = vec![self.weights.shape().to_vec(), self.bias.shape().to_vec()];
        if let Some(bn) = &self.batch_norm {
            shapes.push(bn.gamma.shape().to_vec());
            shapes.push(bn.beta.shape().to_vec());
        }
        shapes
    }

    /// Trainable parameters in the same order as [`LayerGradients::views`].
    pub(crate) fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut views = vec![
            self.weights.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ];
        if let Some(bn) = &mut self.batch_norm {
            views.push(bn.gamma.view_mut().into_dyn());
            views.push(bn.beta.view_mut().into_dyn());
        }
        views
    }

    pub(crate) fn same_shape(&self, other: &DenseLayer) -> bool {
        self.parameter_shapes() == other.parameter_shapes()
            && self.batch_norm.is_some() == other.batch_norm.is_some()
    }

    pub(crate) fn forward(
        &self,
        input: Array2<f64>,
        activation: Option<Activation>,
        dropout: Option<f64>,
        mode: &mut Mode<'_>,
    ) -> (Array2<f64>, LayerCache) {
        let (input, mask) = match (dropout, &mut *mode) {
            (Some(rate), Mode::Train(rng)) => {
                let keep = 1.0 - rate;
                let mask = input.mapv(|_| {
                    if rng.random::<f64>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                });
                (&input * &mask, Some(mask))
            }
            _ => (input, None),
        };

        let linear = input.dot(&self.weights) + &self.bias;

        let (pre_activation, norm) = match (&self.batch_norm, &*mode) {
            (Some(bn), Mode::Train(_)) => {
                let n = linear.nrows().max(1) as f64;
                let mean = linear.sum_axis(Axis(0)) / n;
                let centered = &linear - &mean;
                let variance = centered.mapv(|v| v * v).sum_axis(Axis(0)) / n;
                let inv_std = variance.mapv(|v| 1.0 / (v + BATCH_NORM_EPSILON).sqrt());
                let normalized = &centered * &inv_std;
                let out = &normalized * &bn.gamma + &bn.beta;
                (
                    out,
                    Some(NormCache {
                        normalized,
                        inv_std,
                        mean,
                        variance,
                    }),
                )
            }
            (Some(bn), Mode::Infer) => {
                let inv_std = bn
                    .moving_variance
                    .mapv(|v| 1.0 / (v + BATCH_NORM_EPSILON).sqrt());
                let out = (&linear - &bn.moving_mean) * &inv_std * &bn.gamma + &bn.beta;
                (out, None)
            }
            (None, _) => (linear, None),
        };

        let output = match activation {
            Some(activation) => activation.apply_matrix(&pre_activation),
            None => pre_activation.clone(),
        };

        (
            output,
            LayerCache {
                input,
                mask,
                norm,
                pre_activation,
            },
        )
    }

    /// Back-propagates `grad_output` through the layer.
    ///
    /// Returns the parameter gradients and the gradient with respect to the
    /// layer input (before dropout).
    pub(crate) fn backward(
        &self,
        cache: &LayerCache,
        grad_output: Array2<f64>,
        activation: Option<Activation>,
    ) -> Result<(LayerGradients, Array2<f64>)> {
        let grad_pre = match activation {
            Some(activation) => grad_output * activation.derivative_matrix(&cache.pre_activation),
            None => grad_output,
        };

        let (grad_linear, gamma, beta) = match (&self.batch_norm, &cache.norm) {
            (Some(bn), Some(norm)) => {
                let n = grad_pre.nrows().max(1) as f64;
                let grad_gamma = (&grad_pre * &norm.normalized).sum_axis(Axis(0));
                let grad_beta = grad_pre.sum_axis(Axis(0));
                let grad_normalized = &grad_pre * &bn.gamma;
                let sum_grad = grad_normalized.sum_axis(Axis(0));
                let sum_grad_norm = (&grad_normalized * &norm.normalized).sum_axis(Axis(0));
                let grad_linear = ((&grad_normalized * n) - &sum_grad
                    - &norm.normalized * &sum_grad_norm)
                    * &norm.inv_std
                    / n;
                (grad_linear, Some(grad_gamma), Some(grad_beta))
            }
            (None, None) => (grad_pre, None, None),
            _ => {
                return Err(anyhow!(
                    "Batch normalization cache missing; backward requires a training pass"
                ));
            }
        };

        let grad_weights = cache.input.t().dot(&grad_linear);
        let grad_bias = grad_linear.sum_axis(Axis(0));
        let mut grad_input = grad_linear.dot(&self.weights.t());
        if let Some(mask) = &cache.mask {
            grad_input *= mask;
        }

        Ok((
            LayerGradients {
                weights: grad_weights,
                bias: grad_bias,
                gamma,
                beta,
            },
            grad_input,
        ))
    }

    /// Folds the batch statistics of a training pass into the moving
    /// averages. A no-op for layers without batch normalization.
    pub(crate) fn update_moving_statistics(&mut self, cache: &LayerCache) {
        if let (Some(bn), Some(norm)) = (&mut self.batch_norm, &cache.norm) {
            let momentum = bn.momentum;
            bn.moving_mean = &bn.moving_mean * momentum + &norm.mean * (1.0 - momentum);
            bn.moving_variance =
                &bn.moving_variance * momentum + &norm.variance * (1.0 - momentum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::SeedableRng;

    fn layer(batch_norm: Option<f64>) -> DenseLayer {
        let mut rng = StdRng::seed_from_u64(3);
        DenseLayer::new(3, 2, &Initializer::GlorotUniform, batch_norm, &mut rng).unwrap()
    }

    #[test]
    fn test_shapes() {
        let dense = layer(None);
        assert_eq!(dense.fan_in(), 3);
        assert_eq!(dense.fan_out(), 2);
        assert_eq!(dense.parameter_shapes(), vec![vec![3, 2], vec![2]]);

        let normed = layer(Some(0.9));
        assert_eq!(normed.parameter_shapes().len(), 4);
        assert!(!dense.same_shape(&normed));
    }

    #[test]
    fn test_training_batch_norm_output_is_standardized() {
        let dense = layer(Some(0.9));
        let input = array![[1.0, 2.0, 3.0], [0.5, -1.0, 2.0], [-2.0, 0.0, 1.0]];
        let mut rng = StdRng::seed_from_u64(1);

        let (output, cache) = dense.forward(input, None, None, &mut Mode::Train(&mut rng));

        assert!(cache.norm.is_some());
        for column in output.columns() {
            assert_relative_eq!(column.sum(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_moving_statistics_only_change_on_update() {
        let mut dense = layer(Some(0.5));
        let input = array![[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]];
        let mut rng = StdRng::seed_from_u64(1);

        let (_, cache) = dense.forward(input, None, None, &mut Mode::Train(&mut rng));
        let before = dense.batch_norm().unwrap().moving_mean().clone();
        assert_eq!(before, Array1::<f64>::zeros(2));

        dense.update_moving_statistics(&cache);
        let norm = cache.norm.as_ref().unwrap();
        let expected_mean = norm.mean.mapv(|m| m * 0.5);
        let expected_variance = norm.variance.mapv(|v| 0.5 + v * 0.5);
        let bn = dense.batch_norm().unwrap();
        assert_eq!(bn.moving_mean(), &expected_mean);
        assert_eq!(bn.moving_variance(), &expected_variance);
    }

    #[test]
    fn test_dropout_only_in_training() {
        let dense = layer(None);
        let input = Array2::ones((50, 3));
        let mut rng = StdRng::seed_from_u64(9);

        let (_, train_cache) =
            dense.forward(input.clone(), None, Some(0.5), &mut Mode::Train(&mut rng));
        let mask = train_cache.mask.unwrap();
        assert!(mask.iter().all(|&m| m == 0.0 || m == 2.0));
        assert!(mask.iter().any(|&m| m == 0.0));

        let (_, infer_cache) = dense.forward(input, None, Some(0.5), &mut Mode::Infer);
        assert!(infer_cache.mask.is_none());
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let dense = layer(Some(0.9));
        let input = array![[0.3, -1.2, 0.8], [1.5, 0.2, -0.4], [-0.7, 0.9, 0.1]];
        let upstream = array![[1.0, -0.5], [0.25, 2.0], [-1.0, 0.5]];
        let activation = Some(Activation::Tanh);

        let objective = |layer: &DenseLayer| -> f64 {
            let mut rng = StdRng::seed_from_u64(0);
            let (out, _) = layer.forward(input.clone(), activation, None, &mut Mode::Train(&mut rng));
            (&out * &upstream).sum()
        };

        let mut rng = StdRng::seed_from_u64(0);
        let (_, cache) = dense.forward(input.clone(), activation, None, &mut Mode::Train(&mut rng));
        let (grads, _) = dense.backward(&cache, upstream.clone(), activation).unwrap();

        let h = 1e-6;
        for (i, j) in [(0, 0), (1, 1), (2, 0)] {
            let mut plus = dense.clone();
            plus.weights[[i, j]] += h;
            let mut minus = dense.clone();
            minus.weights[[i, j]] -= h;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * h);
            assert_relative_eq!(grads.weights[[i, j]], numeric, epsilon = 1e-5);
        }
    }
}
