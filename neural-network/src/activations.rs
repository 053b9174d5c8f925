use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

const SELU_ALPHA: f64 = 1.673_263_242_354_377_2;
const SELU_SCALE: f64 = 1.050_700_987_355_480_5;

/// Default slope for the negative half of leaky ReLU.
pub const LEAKY_RELU_ALPHA: f64 = 0.01;

/// Non-linearity applied to the output of every hidden layer.
///
/// Both [`apply`](Activation::apply) and [`derivative`](Activation::derivative)
/// take the pre-activation value, so the derivative never has to be
/// reconstructed from the activated output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Elu,
    Relu,
    Selu,
    Tanh,
    Sigmoid,
    LeakyRelu { alpha: f64 },
}

impl Activation {
    pub fn leaky_relu() -> Self {
        Activation::LeakyRelu {
            alpha: LEAKY_RELU_ALPHA,
        }
    }

    #[inline]
    pub fn apply(&self, x: f64) -> f64 {
        match *self {
            Activation::Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp_m1()
                }
            }
            Activation::Relu => x.max(0.0),
            Activation::Selu => {
                if x > 0.0 {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp_m1()
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::LeakyRelu { alpha } => (alpha * x).max(x),
        }
    }

    #[inline]
    pub fn derivative(&self, x: f64) -> f64 {
        match *self {
            Activation::Elu => {
                if x > 0.0 {
                    1.0
                } else {
                    x.exp()
                }
            }
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Selu => {
                if x > 0.0 {
                    SELU_SCALE
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp()
                }
            }
            Activation::Tanh => 1.0 - x.tanh().powi(2),
            Activation::Sigmoid => {
                let s = 1.0 / (1.0 + (-x).exp());
                s * (1.0 - s)
            }
            Activation::LeakyRelu { alpha } => {
                if alpha * x > x {
                    alpha
                } else {
                    1.0
                }
            }
        }
    }

    pub fn apply_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(|v| self.apply(v))
    }

    pub fn derivative_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(|v| self.derivative(v))
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Elu => write!(f, "elu"),
            Activation::Relu => write!(f, "relu"),
            Activation::Selu => write!(f, "selu"),
            Activation::Tanh => write!(f, "tanh"),
            Activation::Sigmoid => write!(f, "sigmoid"),
            Activation::LeakyRelu { alpha } => write!(f, "leaky_relu({alpha})"),
        }
    }
}
