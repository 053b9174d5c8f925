mod classifier;
mod error;
mod hyperparameters;
mod label_mapping;
mod model;
mod model_selection;
mod progress;

pub use classifier::{DnnClassifier, TrainingSummary};
pub use error::ClassifierError;
pub use hyperparameters::{Hyperparameters, HyperparametersBuilder};
pub use label_mapping::LabelMapping;
pub use model::TrainableModel;
pub use model_selection::{
    CandidateResult, Fold, GridSearch, ParamGrid, SearchConfig, StratifiedKFold, accuracy_score,
    cross_val_score, mean_std,
};
pub use progress::{ProgressEntry, ProgressRecord};
