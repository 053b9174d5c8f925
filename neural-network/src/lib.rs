// Modules
pub mod activations;
pub mod initializers;
pub mod layer;
pub mod network;
pub mod network_config;
pub mod optimizer;

pub use activations::Activation;
pub use initializers::Initializer;
pub use layer::{BatchNorm, DenseLayer};
pub use matrix::Matrix;
pub use network::{Evaluation, Network, NetworkParameters};
pub use network_config::NetworkConfig;
pub use optimizer::{Optimizer, OptimizerState};
