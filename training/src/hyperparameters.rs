use crate::error::ClassifierError;
use derive_builder::Builder;
use neural_network::{Activation, Initializer, NetworkConfig, Optimizer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hyperparameters of a [`DnnClassifier`](crate::DnnClassifier).
///
/// Read-only once built. Use [`HyperparametersBuilder`] to construct a
/// validated set, or deserialize one from JSON (missing fields take their
/// defaults).
///
/// # Example
///
/// ```
/// use neural_network::Activation;
/// use training::HyperparametersBuilder;
///
/// let params = HyperparametersBuilder::default()
///     .n_hidden_layers(2)
///     .activation(Activation::Selu)
///     .random_state(1)
///     .build()
///     .unwrap();
/// assert_eq!(params.batch_size, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
#[builder(default, build_fn(private, name = "build_unvalidated"))]
pub struct Hyperparameters {
    /// Number of hidden layers.
    pub n_hidden_layers: usize,
    /// Units per hidden layer.
    pub n_neurons: usize,
    pub activation: Activation,
    pub optimizer: Optimizer,
    pub learning_rate: f64,
    /// Rows per gradient step.
    pub batch_size: usize,
    pub initializer: Initializer,
    #[builder(setter(strip_option))]
    pub batch_norm_momentum: Option<f64>,
    #[builder(setter(strip_option))]
    pub dropout_rate: Option<f64>,
    /// Seeds shuffling, initialization and dropout.
    #[builder(setter(strip_option))]
    pub random_state: Option<u64>,
    /// Patience for early stopping. Tracked but never acted on.
    pub checks: usize,
    /// Training stops once more than this many samples have been fed.
    pub max_iter: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_hidden_layers: 5,
            n_neurons: 100,
            activation: Activation::Elu,
            optimizer: Optimizer::adam(),
            learning_rate: 0.001,
            batch_size: 20,
            initializer: Initializer::HE,
            batch_norm_momentum: None,
            dropout_rate: None,
            random_state: None,
            checks: 20,
            max_iter: 20000,
        }
    }
}

impl HyperparametersBuilder {
    /// Builds and validates the hyperparameters.
    pub fn build(&self) -> Result<Hyperparameters, ClassifierError> {
        let params = self
            .build_unvalidated()
            .map_err(|e| ClassifierError::InvalidConfig(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let invalid = |msg: String| Err(ClassifierError::InvalidConfig(msg));

        if self.batch_size == 0 {
            return invalid("batch size must be positive".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.n_hidden_layers > 0 && self.n_neurons == 0 {
            return invalid("hidden layers need at least one neuron".to_string());
        }
        if let Some(rate) = self.dropout_rate {
            if !(0.0..1.0).contains(&rate) {
                return invalid(format!("dropout rate must be in [0, 1), got {rate}"));
            }
        }
        if let Some(momentum) = self.batch_norm_momentum {
            if !(0.0..1.0).contains(&momentum) {
                return invalid(format!(
                    "batch norm momentum must be in [0, 1), got {momentum}"
                ));
            }
        }
        self.optimizer
            .validate()
            .map_err(|e| ClassifierError::InvalidConfig(e.to_string()))
    }

    /// Whether batch-norm statistics need updating after each step.
    pub fn uses_batch_norm(&self) -> bool {
        self.batch_norm_momentum.is_some_and(|m| m > 0.0)
    }

    /// The network configuration for a model with the given input width and
    /// number of classes. `seed` overrides `random_state`.
    pub fn network_config(
        &self,
        input_width: usize,
        n_classes: usize,
        seed: Option<u64>,
    ) -> NetworkConfig {
        NetworkConfig {
            input_width,
            n_hidden_layers: self.n_hidden_layers,
            n_neurons: self.n_neurons,
            output_width: n_classes,
            activation: self.activation,
            initializer: self.initializer,
            optimizer: self.optimizer,
            learning_rate: self.learning_rate,
            batch_norm_momentum: self.batch_norm_momentum,
            dropout_rate: self.dropout_rate,
            seed: seed.or(self.random_state),
        }
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n_hidden_layers={} n_neurons={} activation={} optimizer={} learning_rate={} batch_size={} max_iter={}",
            self.n_hidden_layers,
            self.n_neurons,
            self.activation,
            self.optimizer,
            self.learning_rate,
            self.batch_size,
            self.max_iter
        )?;
        if let Some(rate) = self.dropout_rate {
            write!(f, " dropout_rate={rate}")?;
        }
        if let Some(momentum) = self.batch_norm_momentum {
            write!(f, " batch_norm_momentum={momentum}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = HyperparametersBuilder::default().build().unwrap();
        assert_eq!(params, Hyperparameters::default());
        assert_eq!(params.n_hidden_layers, 5);
        assert_eq!(params.n_neurons, 100);
        assert_eq!(params.activation, Activation::Elu);
        assert_eq!(params.optimizer, Optimizer::adam());
        assert_eq!(params.learning_rate, 0.001);
        assert_eq!(params.batch_size, 20);
        assert_eq!(params.initializer, Initializer::HE);
        assert_eq!(params.checks, 20);
        assert_eq!(params.max_iter, 20000);
        assert!(!params.uses_batch_norm());
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(HyperparametersBuilder::default().batch_size(0).build().is_err());
        assert!(HyperparametersBuilder::default()
            .learning_rate(f64::NAN)
            .build()
            .is_err());
        assert!(HyperparametersBuilder::default()
            .dropout_rate(1.0)
            .build()
            .is_err());
        assert!(matches!(
            HyperparametersBuilder::default()
                .batch_norm_momentum(1.5)
                .build(),
            Err(ClassifierError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_momentum_is_accepted_as_disabled() {
        let params = HyperparametersBuilder::default()
            .batch_norm_momentum(0.0)
            .build()
            .unwrap();
        assert!(!params.uses_batch_norm());

        match HyperparametersBuilder::default()
            .batch_norm_momentum(1.0)
            .build()
        {
            Err(ClassifierError::InvalidConfig(msg)) => assert!(msg.contains("[0, 1)")),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_network_config() {
        let params = HyperparametersBuilder::default()
            .n_hidden_layers(2)
            .n_neurons(30)
            .batch_norm_momentum(0.9)
            .random_state(7)
            .build()
            .unwrap();

        let config = params.network_config(64, 3, None);
        assert_eq!(config.layer_sizes(), vec![64, 30, 30, 3]);
        assert_eq!(config.batch_norm(), Some(0.9));
        assert_eq!(config.seed, Some(7));
        assert_eq!(params.network_config(64, 3, Some(9)).seed, Some(9));
    }

    #[test]
    fn test_partial_json() {
        let params: Hyperparameters =
            serde_json::from_str(r#"{"activation": "selu", "n_hidden_layers": 3}"#).unwrap();
        assert_eq!(params.activation, Activation::Selu);
        assert_eq!(params.n_hidden_layers, 3);
        assert_eq!(params.batch_size, 20);
    }
}
