//! The capability set the classifier needs from a trainable model.
//!
//! [`DnnClassifier`](crate::DnnClassifier) never touches weights directly.
//! It drives any type implementing [`TrainableModel`], which lets tests
//! substitute a scripted model and lets another backend slot in without
//! touching the training loop.

use crate::hyperparameters::Hyperparameters;
use anyhow::Result;
use matrix::Matrix;
use neural_network::{Network, NetworkParameters};
use std::path::Path;

pub trait TrainableModel: Sized + Send {
    /// Owned deep copy of every stateful variable.
    type Parameters: Clone + Send;

    /// Builds a freshly initialized model for `n_classes` outputs.
    fn initialize(
        input_width: usize,
        n_classes: usize,
        hyperparameters: &Hyperparameters,
    ) -> Result<Self>;

    /// One gradient step on a batch of rows and dense class indices.
    fn train_step(&mut self, features: &Matrix, labels: &[usize]) -> Result<()>;

    /// Extra per-batch updates (batch-norm moving statistics).
    fn update_statistics(&mut self, _features: &Matrix, _labels: &[usize]) -> Result<()> {
        Ok(())
    }

    /// Whether [`update_statistics`](TrainableModel::update_statistics) does
    /// anything for this model.
    fn has_statistics(&self) -> bool {
        false
    }

    /// Mean loss and accuracy, in inference mode.
    fn evaluate(&self, features: &Matrix, labels: &[usize]) -> Result<(f64, f64)>;

    /// Row-stochastic class probabilities.
    fn predict_probabilities(&self, features: &Matrix) -> Result<Matrix>;

    fn parameters(&self) -> Self::Parameters;

    fn set_parameters(&mut self, parameters: Self::Parameters) -> Result<()>;

    fn save(&self, path: &Path) -> Result<()>;
}

impl TrainableModel for Network {
    type Parameters = NetworkParameters;

    fn initialize(
        input_width: usize,
        n_classes: usize,
        hyperparameters: &Hyperparameters,
    ) -> Result<Self> {
        Network::new(&hyperparameters.network_config(input_width, n_classes, None))
    }

    fn train_step(&mut self, features: &Matrix, labels: &[usize]) -> Result<()> {
        Network::train_step(self, features, labels).map(|_| ())
    }

    fn update_statistics(&mut self, features: &Matrix, labels: &[usize]) -> Result<()> {
        Network::update_statistics(self, features, labels)
    }

    fn has_statistics(&self) -> bool {
        self.has_batch_norm()
    }

    fn evaluate(&self, features: &Matrix, labels: &[usize]) -> Result<(f64, f64)> {
        let evaluation = Network::evaluate(self, features, labels)?;
        Ok((evaluation.loss, evaluation.accuracy))
    }

    fn predict_probabilities(&self, features: &Matrix) -> Result<Matrix> {
        self.predict_proba(features)
    }

    fn parameters(&self) -> NetworkParameters {
        Network::parameters(self)
    }

    fn set_parameters(&mut self, parameters: NetworkParameters) -> Result<()> {
        Network::set_parameters(self, parameters)
    }

    fn save(&self, path: &Path) -> Result<()> {
        Network::save(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::HyperparametersBuilder;
    use matrix::matrix;

    #[test]
    fn test_network_adapter() -> Result<()> {
        let params = HyperparametersBuilder::default()
            .n_hidden_layers(1)
            .n_neurons(4)
            .batch_norm_momentum(0.9)
            .random_state(3)
            .build()?;
        let mut model = <Network as TrainableModel>::initialize(2, 3, &params)?;
        assert!(model.has_statistics());

        let features = matrix![
            0.0, 1.0;
            1.0, 0.0;
            1.0, 1.0
        ];
        let labels = [0, 1, 2];
        TrainableModel::train_step(&mut model, &features, &labels)?;
        TrainableModel::update_statistics(&mut model, &features, &labels)?;

        let (loss, accuracy) = TrainableModel::evaluate(&model, &features, &labels)?;
        assert!(loss.is_finite());
        assert!((0.0..=1.0).contains(&accuracy));
        assert_eq!(model.predict_probabilities(&features)?.cols(), 3);
        Ok(())
    }
}
