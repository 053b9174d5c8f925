use crate::initializers::Initializer;
use crate::layer::{DenseLayer, LayerCache, Mode};
use crate::network_config::NetworkConfig;
use crate::optimizer::OptimizerState;
use anyhow::{Result, anyhow};
use matrix::Matrix;
use ndarray::{Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Loss and accuracy of the network on a labelled set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean softmax cross-entropy.
    pub loss: f64,
    /// Fraction of rows whose most probable class is the label.
    pub accuracy: f64,
}

/// A deep copy of every stateful variable of a [`Network`].
///
/// Covers weights, biases, batch-norm parameters and moving statistics, and
/// the optimizer slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkParameters {
    hidden: Vec<DenseLayer>,
    output: DenseLayer,
    optimizer: OptimizerState,
}

/// A dense softmax classifier trained with mini-batch gradient descent.
///
/// The network is built from a [`NetworkConfig`] and can be serialized to and
/// from JSON.
///
/// # Examples
///
/// ```
/// use matrix::matrix;
/// use neural_network::{Network, NetworkConfig};
///
/// let config = NetworkConfig {
///     input_width: 2,
///     n_hidden_layers: 1,
///     n_neurons: 4,
///     output_width: 2,
///     seed: Some(1),
///     ..NetworkConfig::default()
/// };
/// let mut network = Network::new(&config).unwrap();
///
/// let inputs = matrix![
///     0.0, 1.0;
///     1.0, 0.0
/// ];
/// network.train_step(&inputs, &[1, 0]).unwrap();
///
/// let probabilities = network.predict_proba(&inputs).unwrap();
/// assert_eq!(probabilities.cols(), 2);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Network {
    config: NetworkConfig,
    hidden: Vec<DenseLayer>,
    output: DenseLayer,
    optimizer: OptimizerState,
    #[serde(skip, default = "StdRng::from_os_rng")]
    rng: StdRng,
}

impl Network {
    /// Creates a freshly initialized network.
    ///
    /// Hidden weights are drawn with the configured initializer and the
    /// logits layer always uses [`Initializer::HE`], from a generator seeded
    /// with `config.seed` (or the OS when unset). Biases start at zero.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let sizes = config.layer_sizes();
        let mut hidden = Vec::with_capacity(config.n_hidden_layers);
        for window in sizes.windows(2).take(config.n_hidden_layers) {
            if let [fan_in, fan_out] = *window {
                hidden.push(DenseLayer::new(
                    fan_in,
                    fan_out,
                    &config.initializer,
                    config.batch_norm(),
                    &mut rng,
                )?);
            }
        }

        let last_hidden = hidden.last().map_or(config.input_width, DenseLayer::fan_out);
        let output = DenseLayer::new(
            last_hidden,
            config.output_width,
            &Initializer::HE,
            None,
            &mut rng,
        )?;

        let shapes: Vec<Vec<usize>> = hidden
            .iter()
            .chain(std::iter::once(&output))
            .flat_map(DenseLayer::parameter_shapes)
            .collect();
        let optimizer = OptimizerState::new(config.optimizer, config.learning_rate, &shapes)?;

        Ok(Network {
            config: config.clone(),
            hidden,
            output,
            optimizer,
            rng,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Whether the network carries batch-norm moving statistics that need
    /// [`update_statistics`](Network::update_statistics) after each step.
    pub fn has_batch_norm(&self) -> bool {
        self.hidden.iter().any(|layer| layer.batch_norm().is_some())
    }

    /// Performs one gradient step on the batch and returns the batch loss
    /// measured before the update.
    ///
    /// # Errors
    ///
    /// Returns an error if the input width or labels don't match the network.
    pub fn train_step(&mut self, inputs: &Matrix, labels: &[usize]) -> Result<f64> {
        self.check_batch(inputs, labels)?;

        let (logits, caches) = Self::forward(
            &self.hidden,
            &self.output,
            &self.config,
            inputs.view(),
            &mut Mode::Train(&mut self.rng),
        );
        let (output_cache, hidden_caches) = caches
            .split_last()
            .ok_or_else(|| anyhow!("Forward pass produced no layer caches"))?;

        let probabilities = softmax(&logits);
        let loss = cross_entropy(&logits, labels);

        // d(mean cross-entropy)/d(logits)
        let n = labels.len() as f64;
        let mut grad = probabilities;
        for (mut row, &label) in grad.axis_iter_mut(Axis(0)).zip(labels) {
            if let Some(p) = row.get_mut(label) {
                *p -= 1.0;
            }
        }
        grad /= n;

        let (output_grads, mut grad) = self.output.backward(output_cache, grad, None)?;
        let mut layer_grads = Vec::with_capacity(self.hidden.len() + 1);
        for (layer, cache) in self.hidden.iter().zip(hidden_caches).rev() {
            let (grads, grad_input) = layer.backward(cache, grad, Some(self.config.activation))?;
            layer_grads.push(grads);
            grad = grad_input;
        }
        layer_grads.reverse();
        layer_grads.push(output_grads);

        let grad_views = layer_grads.iter().flat_map(|g| g.views()).collect();
        let param_views = self
            .hidden
            .iter_mut()
            .chain(std::iter::once(&mut self.output))
            .flat_map(DenseLayer::parameters_mut)
            .collect();
        self.optimizer.apply(param_views, grad_views)?;

        Ok(loss)
    }

    /// Runs a training-mode forward pass and folds the batch statistics into
    /// the batch-norm moving averages. A no-op without batch normalization.
    pub fn update_statistics(&mut self, inputs: &Matrix, labels: &[usize]) -> Result<()> {
        self.check_batch(inputs, labels)?;
        if !self.has_batch_norm() {
            return Ok(());
        }

        let (_, caches) = Self::forward(
            &self.hidden,
            &self.output,
            &self.config,
            inputs.view(),
            &mut Mode::Train(&mut self.rng),
        );
        for (layer, cache) in self.hidden.iter_mut().zip(&caches) {
            layer.update_moving_statistics(cache);
        }
        Ok(())
    }

    /// Computes mean cross-entropy and accuracy in inference mode.
    pub fn evaluate(&self, inputs: &Matrix, labels: &[usize]) -> Result<Evaluation> {
        self.check_batch(inputs, labels)?;
        let logits = self.logits(inputs.view());

        let correct = Matrix::from(logits.clone())
            .argmax_rows()
            .iter()
            .zip(labels)
            .filter(|(predicted, label)| predicted == label)
            .count();

        Ok(Evaluation {
            loss: cross_entropy(&logits, labels),
            accuracy: correct as f64 / labels.len().max(1) as f64,
        })
    }

    /// Class probabilities for every input row, in inference mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of input columns doesn't match the
    /// input width.
    pub fn predict_proba(&self, inputs: &Matrix) -> Result<Matrix> {
        self.check_inputs(inputs)?;
        Ok(Matrix::from(softmax(&self.logits(inputs.view()))))
    }

    pub fn parameters(&self) -> NetworkParameters {
        NetworkParameters {
            hidden: self.hidden.clone(),
            output: self.output.clone(),
            optimizer: self.optimizer.clone(),
        }
    }

    /// Restores a snapshot taken from a network of the same shape.
    pub fn set_parameters(&mut self, parameters: NetworkParameters) -> Result<()> {
        let compatible = parameters.hidden.len() == self.hidden.len()
            && parameters
                .hidden
                .iter()
                .zip(&self.hidden)
                .all(|(a, b)| a.same_shape(b))
            && parameters.output.same_shape(&self.output);
        if !compatible {
            return Err(anyhow!(
                "Parameter snapshot does not match the network architecture"
            ));
        }

        self.hidden = parameters.hidden;
        self.output = parameters.output;
        self.optimizer = parameters.optimizer;
        Ok(())
    }

    /// Saves the network to a file in JSON format.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use neural_network::{Network, NetworkConfig};
    ///
    /// let network = Network::new(&NetworkConfig::default()).unwrap();
    /// network.save("my_network.json").unwrap();
    /// ```
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads a network from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let mut network: Network = serde_json::from_str(&json)?;
        if let Some(seed) = network.config.seed {
            network.rng = StdRng::seed_from_u64(seed);
        }
        Ok(network)
    }

    fn logits(&self, inputs: ArrayView2<'_, f64>) -> Array2<f64> {
        Self::forward(
            &self.hidden,
            &self.output,
            &self.config,
            inputs,
            &mut Mode::Infer,
        )
        .0
    }

    /// Forward pass through every layer. The last cache belongs to the
    /// output layer.
    fn forward(
        hidden: &[DenseLayer],
        output: &DenseLayer,
        config: &NetworkConfig,
        inputs: ArrayView2<'_, f64>,
        mode: &mut Mode<'_>,
    ) -> (Array2<f64>, Vec<LayerCache>) {
        let mut caches = Vec::with_capacity(hidden.len() + 1);
        let mut current = inputs.to_owned();

        for layer in hidden {
            let (activated, cache) =
                layer.forward(current, Some(config.activation), config.dropout(), mode);
            caches.push(cache);
            current = activated;
        }

        let (logits, cache) = output.forward(current, None, None, mode);
        caches.push(cache);
        (logits, caches)
    }

    fn check_inputs(&self, inputs: &Matrix) -> Result<()> {
        if inputs.cols() != self.config.input_width {
            return Err(anyhow!(
                "Invalid number of inputs: expected {}, got {}",
                self.config.input_width,
                inputs.cols()
            ));
        }
        Ok(())
    }

    fn check_batch(&self, inputs: &Matrix, labels: &[usize]) -> Result<()> {
        self.check_inputs(inputs)?;
        if inputs.rows() != labels.len() {
            return Err(anyhow!(
                "Number of inputs ({}) must match number of labels ({})",
                inputs.rows(),
                labels.len()
            ));
        }
        if labels.is_empty() {
            return Err(anyhow!("Cannot train or evaluate on an empty batch"));
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= self.config.output_width) {
            return Err(anyhow!(
                "Label {} out of range for {} classes",
                label,
                self.config.output_width
            ));
        }
        Ok(())
    }
}

/// Row-wise softmax, shifted by the row maximum for stability.
fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    out
}

/// Mean sparse softmax cross-entropy computed from logits.
fn cross_entropy(logits: &Array2<f64>, labels: &[usize]) -> f64 {
    let total: f64 = logits
        .axis_iter(Axis(0))
        .zip(labels)
        .map(|(row, &label)| {
            let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            let log_sum_exp = row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln() + max;
            log_sum_exp - row.get(label).copied().unwrap_or(f64::NEG_INFINITY)
        })
        .sum();
    total / labels.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::Activation;
    use crate::optimizer::Optimizer;
    use approx::assert_relative_eq;
    use matrix::matrix;
    use tempfile::NamedTempFile;

    fn small_config() -> NetworkConfig {
        NetworkConfig {
            input_width: 2,
            n_hidden_layers: 1,
            n_neurons: 8,
            output_width: 3,
            activation: Activation::Tanh,
            learning_rate: 0.05,
            seed: Some(11),
            ..NetworkConfig::default()
        }
    }

    /// Three points, one per class.
    fn three_class_data() -> (Matrix, Vec<usize>) {
        let inputs = matrix![
            0.0, 0.0;
            1.0, 0.0;
            0.0, 1.0
        ];
        (inputs, vec![0, 1, 2])
    }

    #[test]
    fn test_network_creation() {
        let network = Network::new(&small_config()).unwrap();
        assert_eq!(network.hidden.len(), 1);
        assert_eq!(network.hidden[0].weights().dim(), (2, 8));
        assert_eq!(network.output.weights().dim(), (8, 3));
        assert!(!network.has_batch_norm());
    }

    #[test]
    fn test_no_hidden_layers() {
        let config = NetworkConfig {
            n_hidden_layers: 0,
            ..small_config()
        };
        let network = Network::new(&config).unwrap();
        assert_eq!(network.output.weights().dim(), (2, 3));
    }

    #[test]
    fn test_output_layer_uses_he_initialization() -> Result<()> {
        let config = NetworkConfig {
            input_width: 20,
            n_hidden_layers: 1,
            n_neurons: 50,
            output_width: 10,
            initializer: Initializer::Uniform { limit: 0.001 },
            seed: Some(5),
            ..NetworkConfig::default()
        };
        let network = Network::new(&config)?;

        let hidden = network.hidden[0].weights();
        assert!(hidden.iter().all(|w| w.abs() <= 0.001));
        let largest = network
            .output
            .weights()
            .iter()
            .fold(0.0_f64, |max, w| max.max(w.abs()));
        assert!(largest > 0.01);
        Ok(())
    }

    #[test]
    fn test_predict_proba_rows_are_distributions() -> Result<()> {
        let network = Network::new(&small_config())?;
        let (inputs, _) = three_class_data();

        let probabilities = network.predict_proba(&inputs)?;

        assert_eq!(probabilities.rows(), 3);
        assert_eq!(probabilities.cols(), 3);
        for sum in probabilities.row_sums() {
            assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
        }
        assert!(probabilities
            .as_array()
            .iter()
            .all(|&p| (0.0..=1.0).contains(&p)));
        Ok(())
    }

    #[test]
    fn test_invalid_inputs() {
        let mut network = Network::new(&small_config()).unwrap();
        let wide = Matrix::zeros(1, 3);
        assert!(network.predict_proba(&wide).is_err());

        let (inputs, _) = three_class_data();
        assert!(network.train_step(&inputs, &[0, 1]).is_err());
        assert!(network.train_step(&inputs, &[0, 1, 3]).is_err());
    }

    #[test]
    fn test_training_reduces_loss() -> Result<()> {
        let mut network = Network::new(&small_config())?;
        let (inputs, labels) = three_class_data();

        let before = network.evaluate(&inputs, &labels)?;
        for _ in 0..300 {
            network.train_step(&inputs, &labels)?;
        }
        let after = network.evaluate(&inputs, &labels)?;

        assert!(after.loss < before.loss);
        assert_relative_eq!(after.accuracy, 1.0);
        Ok(())
    }

    #[test]
    fn test_every_optimizer_learns() -> Result<()> {
        for optimizer in [
            Optimizer::Sgd,
            Optimizer::Momentum { momentum: 0.9 },
            Optimizer::adam(),
        ] {
            let config = NetworkConfig {
                optimizer,
                ..small_config()
            };
            let mut network = Network::new(&config)?;
            let (inputs, labels) = three_class_data();
            let before = network.evaluate(&inputs, &labels)?.loss;
            for _ in 0..100 {
                network.train_step(&inputs, &labels)?;
            }
            assert!(network.evaluate(&inputs, &labels)?.loss < before, "{optimizer}");
        }
        Ok(())
    }

    #[test]
    fn test_batch_norm_statistics_update() -> Result<()> {
        let config = NetworkConfig {
            batch_norm_momentum: Some(0.9),
            ..small_config()
        };
        let mut network = Network::new(&config)?;
        assert!(network.has_batch_norm());
        let (inputs, labels) = three_class_data();

        network.train_step(&inputs, &labels)?;
        let untouched = network.hidden[0].batch_norm().unwrap().moving_mean().clone();
        assert!(untouched.iter().all(|&m| m == 0.0));

        network.update_statistics(&inputs, &labels)?;
        let updated = network.hidden[0].batch_norm().unwrap().moving_mean();
        assert!(updated.iter().any(|&m| m != 0.0));
        Ok(())
    }

    #[test]
    fn test_parameters_snapshot_is_a_deep_copy() -> Result<()> {
        let mut network = Network::new(&small_config())?;
        let (inputs, labels) = three_class_data();

        let snapshot = network.parameters();
        let before = network.evaluate(&inputs, &labels)?;

        for _ in 0..20 {
            network.train_step(&inputs, &labels)?;
        }
        assert_ne!(network.parameters(), snapshot);

        network.set_parameters(snapshot.clone())?;
        assert_eq!(network.parameters(), snapshot);
        assert_relative_eq!(network.evaluate(&inputs, &labels)?.loss, before.loss);
        Ok(())
    }

    #[test]
    fn test_set_parameters_rejects_other_architecture() {
        let mut network = Network::new(&small_config()).unwrap();
        let other = Network::new(&NetworkConfig {
            n_neurons: 4,
            ..small_config()
        })
        .unwrap();
        assert!(network.set_parameters(other.parameters()).is_err());
    }

    #[test]
    fn test_seeded_networks_are_identical() {
        let a = Network::new(&small_config()).unwrap();
        let b = Network::new(&small_config()).unwrap();
        assert_eq!(a.parameters(), b.parameters());
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let network = Network::new(&NetworkConfig {
            batch_norm_momentum: Some(0.99),
            dropout_rate: Some(0.1),
            ..small_config()
        })?;
        let temp_file = NamedTempFile::new()?;

        network.save(temp_file.path())?;
        let file_content = fs::read_to_string(temp_file.path())?;
        assert!(file_content.contains("weights"));
        assert!(file_content.contains("moving_mean"));

        let loaded = Network::load(temp_file.path())?;
        assert_eq!(loaded.config(), network.config());
        assert_eq!(loaded.parameters(), network.parameters());
        Ok(())
    }

    #[test]
    fn test_cross_entropy_of_uniform_logits() {
        let logits = Array2::zeros((2, 4));
        assert_relative_eq!(cross_entropy(&logits, &[0, 3]), 4.0f64.ln(), epsilon = 1e-12);
    }
}
