use crate::activations::Activation;
use crate::initializers::Initializer;
use crate::optimizer::Optimizer;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Configuration for a dense classification network.
///
/// The network has `n_hidden_layers` hidden layers of `n_neurons` units each,
/// followed by a linear layer of `output_width` logits and a softmax.
///
/// # Example
///
/// ```
/// use neural_network::NetworkConfig;
///
/// let config = NetworkConfig::default();
/// assert_eq!(config.layer_sizes(), vec![784, 100, 100, 100, 100, 100, 10]);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Number of input features.
    pub input_width: usize,

    /// Number of hidden layers.
    pub n_hidden_layers: usize,

    /// Units in every hidden layer.
    pub n_neurons: usize,

    /// Number of classes.
    pub output_width: usize,

    /// Non-linearity applied after every hidden layer.
    pub activation: Activation,

    /// Weight initialization strategy for every layer.
    pub initializer: Initializer,

    /// Update rule used by `train_step`.
    pub optimizer: Optimizer,

    /// Learning rate for the optimizer.
    pub learning_rate: f64,

    /// Enables batch normalization with this moving-average momentum.
    /// `None` or zero disables it.
    pub batch_norm_momentum: Option<f64>,

    /// Enables dropout on hidden-layer inputs with this drop probability.
    /// `None` or zero disables it.
    pub dropout_rate: Option<f64>,

    /// Seed for initialization and dropout masks. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl NetworkConfig {
    /// Loads a network configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: NetworkConfig = serde_json::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_width == 0 {
            return Err(anyhow!("input width must be positive"));
        }
        if self.output_width < 2 {
            return Err(anyhow!(
                "output width must be at least 2, got {}",
                self.output_width
            ));
        }
        if self.n_hidden_layers > 0 && self.n_neurons == 0 {
            return Err(anyhow!("hidden layers need at least one neuron"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(anyhow!(
                "learning rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if let Some(momentum) = self.batch_norm_momentum {
            if !(0.0..1.0).contains(&momentum) {
                return Err(anyhow!(
                    "batch norm momentum must be in [0, 1), got {momentum}"
                ));
            }
        }
        if let Some(rate) = self.dropout_rate {
            if !(0.0..1.0).contains(&rate) {
                return Err(anyhow!("dropout rate must be in [0, 1), got {rate}"));
            }
        }
        self.optimizer.validate()
    }

    /// Batch-norm momentum, if batch normalization is enabled.
    pub fn batch_norm(&self) -> Option<f64> {
        self.batch_norm_momentum.filter(|&m| m > 0.0)
    }

    /// Dropout rate, if dropout is enabled.
    pub fn dropout(&self) -> Option<f64> {
        self.dropout_rate.filter(|&r| r > 0.0)
    }

    /// Sizes of every layer, input and output included.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.n_hidden_layers + 2);
        sizes.push(self.input_width);
        sizes.extend(std::iter::repeat(self.n_neurons).take(self.n_hidden_layers));
        sizes.push(self.output_width);
        sizes
    }
}

/// The default matches MNIST: 784 inputs, five hidden ELU layers of 100
/// units, 10 outputs, Adam at 0.001.
impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_width: 784,
            n_hidden_layers: 5,
            n_neurons: 100,
            output_width: 10,
            activation: Activation::default(),
            initializer: Initializer::default(),
            optimizer: Optimizer::default(),
            learning_rate: 0.001,
            batch_norm_momentum: None,
            dropout_rate: None,
            seed: None,
        }
    }
}

impl fmt::Display for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Network configuration:")?;
        writeln!(f, "  layers:        {:?}", self.layer_sizes())?;
        writeln!(f, "  activation:    {}", self.activation)?;
        writeln!(f, "  initializer:   {}", self.initializer)?;
        writeln!(f, "  optimizer:     {}", self.optimizer)?;
        writeln!(f, "  learning rate: {}", self.learning_rate)?;
        if let Some(momentum) = self.batch_norm() {
            writeln!(f, "  batch norm:    {momentum}")?;
        }
        if let Some(rate) = self.dropout() {
            writeln!(f, "  dropout:       {rate}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("test_config.json");

        let config_json = r#"{
            "input_width": 64,
            "n_hidden_layers": 2,
            "n_neurons": 30,
            "output_width": 10,
            "activation": "selu",
            "optimizer": {"momentum": {"momentum": 0.95}},
            "learning_rate": 0.01,
            "dropout_rate": 0.2
        }"#;

        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_json.as_bytes()).unwrap();

        let config = NetworkConfig::load(&config_path).unwrap();
        assert_eq!(config.layer_sizes(), vec![64, 30, 30, 10]);
        assert_eq!(config.activation, Activation::Selu);
        assert_eq!(config.optimizer, Optimizer::Momentum { momentum: 0.95 });
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.dropout(), Some(0.2));
        assert_eq!(config.batch_norm(), None);
        assert_eq!(config.initializer, Initializer::HE);
    }

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert_eq!(config.n_hidden_layers, 5);
        assert_eq!(config.n_neurons, 100);
        assert_eq!(config.activation, Activation::Elu);
        assert_eq!(config.optimizer, Optimizer::adam());
        assert_eq!(config.learning_rate, 0.001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_rates_disable_features() {
        let config = NetworkConfig {
            batch_norm_momentum: Some(0.0),
            dropout_rate: Some(0.0),
            ..NetworkConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_norm(), None);
        assert_eq!(config.dropout(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            NetworkConfig {
                output_width: 1,
                ..NetworkConfig::default()
            },
            NetworkConfig {
                learning_rate: -1.0,
                ..NetworkConfig::default()
            },
            NetworkConfig {
                dropout_rate: Some(1.0),
                ..NetworkConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
