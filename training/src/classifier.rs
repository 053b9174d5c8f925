//! The classifier and its bounded training loop.
//!
//! Training runs epoch after epoch over a fresh shuffle of the training
//! rows. It ends only once more than `max_iter` samples have been fed,
//! which can happen in the middle of an epoch. When validation data is
//! available every epoch is scored, the score is appended to the progress
//! record, and the parameters with the lowest validation loss are
//! snapshotted.

use crate::error::ClassifierError;
use crate::hyperparameters::Hyperparameters;
use crate::label_mapping::LabelMapping;
use crate::model::TrainableModel;
use crate::model_selection::accuracy_score;
use crate::progress::ProgressRecord;
use matrix::Matrix;
use neural_network::Network;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bookkeeping of the last training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    /// Samples counted when training stopped, the rejected batch included.
    pub samples_seen: usize,
    /// Gradient steps taken.
    pub steps: usize,
    /// Epochs completed.
    pub epochs: usize,
    /// Lowest validation loss seen, if validation data was used.
    pub best_loss: Option<f64>,
    /// Validated epochs since the last improvement.
    pub checks_without_progress: usize,
}

struct Fitted<M, L: Ord> {
    model: M,
    mapping: LabelMapping<L>,
    summary: TrainingSummary,
}

/// A dense softmax classifier with a fit/predict interface.
///
/// `M` is the trainable model and `L` the label type.
///
/// # Example
///
/// ```no_run
/// use matrix::Matrix;
/// use training::{DnnClassifier, HyperparametersBuilder};
///
/// # fn run(features: Matrix, labels: Vec<u8>) -> Result<(), training::ClassifierError> {
/// let params = HyperparametersBuilder::default().random_state(1).build()?;
/// let mut clf: DnnClassifier = DnnClassifier::new(params);
/// clf.fit(&features, &labels, None)?;
/// let predicted = clf.predict(&features)?;
/// # Ok(())
/// # }
/// ```
pub struct DnnClassifier<M = Network, L: Ord = u8> {
    hyperparameters: Hyperparameters,
    validation: Option<(Matrix, Vec<L>)>,
    progress_dir: Option<PathBuf>,
    progress: ProgressRecord,
    fitted: Option<Fitted<M, L>>,
}

impl<M, L> DnnClassifier<M, L>
where
    M: TrainableModel,
    L: Ord + Clone,
{
    pub fn new(hyperparameters: Hyperparameters) -> Self {
        Self {
            hyperparameters,
            validation: None,
            progress_dir: None,
            progress: ProgressRecord::new(),
            fitted: None,
        }
    }

    /// Validation set used by [`fit`](DnnClassifier::fit) when none is
    /// passed explicitly.
    pub fn with_validation(mut self, features: Matrix, labels: Vec<L>) -> Self {
        self.validation = Some((features, labels));
        self
    }

    /// Directory the progress record is written to when training ends.
    pub fn with_progress_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.progress_dir = Some(dir.into());
        self
    }

    /// An unfitted copy with different hyperparameters and the same
    /// validation set and progress directory.
    pub fn with_hyperparameters(&self, hyperparameters: Hyperparameters) -> Self {
        Self {
            hyperparameters,
            validation: self.validation.clone(),
            progress_dir: self.progress_dir.clone(),
            progress: ProgressRecord::new(),
            fitted: None,
        }
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Progress record of the last fit.
    pub fn progress(&self) -> &ProgressRecord {
        &self.progress
    }

    /// Sorted class labels seen during fit.
    pub fn classes(&self) -> Result<&[L], ClassifierError> {
        Ok(self.fitted()?.mapping.classes())
    }

    pub fn summary(&self) -> Result<TrainingSummary, ClassifierError> {
        Ok(self.fitted()?.summary)
    }

    pub fn model(&self) -> Result<&M, ClassifierError> {
        Ok(&self.fitted()?.model)
    }

    /// Trains a fresh model on `features` and `labels`.
    ///
    /// Any previously fitted state is discarded first. `validation`
    /// overrides the set given to
    /// [`with_validation`](DnnClassifier::with_validation).
    ///
    /// # Errors
    ///
    /// [`ClassifierError::InvalidInput`] for mismatched lengths, fewer than
    /// two classes, or validation labels unseen in training. Model failures
    /// propagate as [`ClassifierError::Model`] and leave the classifier
    /// unfitted.
    pub fn fit(
        &mut self,
        features: &Matrix,
        labels: &[L],
        validation: Option<(&Matrix, &[L])>,
    ) -> Result<&mut Self, ClassifierError> {
        self.fitted = None;
        self.progress = ProgressRecord::new();

        self.hyperparameters.validate()?;
        check_lengths(features, labels)?;
        let mapping = LabelMapping::fit(labels);
        if mapping.n_classes() < 2 {
            return Err(ClassifierError::InvalidInput(format!(
                "need at least 2 classes, got {}",
                mapping.n_classes()
            )));
        }
        let targets = mapping.encode(labels)?;

        let validation = match validation.or_else(|| {
            self.validation
                .as_ref()
                .map(|(x, y)| (x, y.as_slice()))
        }) {
            Some((x, y)) => Some((x, encode_validation(&mapping, features.cols(), x, y)?)),
            None => None,
        };

        let mut model = M::initialize(features.cols(), mapping.n_classes(), &self.hyperparameters)?;
        let (progress, summary) = self.train(
            &mut model,
            features,
            &targets,
            validation.as_ref().map(|(x, y)| (*x, y.as_slice())),
        )?;

        self.progress = progress;
        self.fitted = Some(Fitted {
            model,
            mapping,
            summary,
        });
        Ok(self)
    }

    fn train(
        &self,
        model: &mut M,
        features: &Matrix,
        targets: &[usize],
        validation: Option<(&Matrix, &[usize])>,
    ) -> Result<(ProgressRecord, TrainingSummary), ClassifierError> {
        let h = &self.hyperparameters;
        let mut rng = match h.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut progress = ProgressRecord::new();
        let mut best_loss = f64::INFINITY;
        let mut best_params: Option<M::Parameters> = None;
        // Counted for every stalled epoch, never compared against `checks`.
        let mut checks_without_progress = 0;
        let mut samples_seen = 0;
        let mut steps = 0;
        let mut indices: Vec<usize> = (0..features.rows()).collect();

        let summary = |samples_seen, steps, epochs, best_loss: f64, checks_without_progress| {
            TrainingSummary {
                samples_seen,
                steps,
                epochs,
                best_loss: best_loss.is_finite().then_some(best_loss),
                checks_without_progress,
            }
        };

        for epoch in 1usize.. {
            indices.shuffle(&mut rng);
            let mut last_batch = None;

            for chunk in indices.chunks(h.batch_size) {
                samples_seen += h.batch_size;
                if samples_seen > h.max_iter {
                    info!(
                        max_iter = h.max_iter,
                        "Early stopping! {} samples trained on.", h.max_iter
                    );
                    self.persist(&progress)?;
                    return Ok((
                        progress,
                        summary(samples_seen, steps, epoch - 1, best_loss, checks_without_progress),
                    ));
                }

                let batch_features = features.select_rows(chunk)?;
                let batch_labels: Vec<usize> =
                    chunk.iter().filter_map(|&i| targets.get(i).copied()).collect();

                model.train_step(&batch_features, &batch_labels)?;
                if model.has_statistics() {
                    model.update_statistics(&batch_features, &batch_labels)?;
                }
                steps += 1;
                last_batch = Some((batch_features, batch_labels));
            }

            match validation {
                Some((valid_features, valid_labels)) => {
                    let (loss, accuracy) = model.evaluate(valid_features, valid_labels)?;
                    progress.record(samples_seen, accuracy);
                    if loss < best_loss {
                        best_params = Some(model.parameters());
                        best_loss = loss;
                        checks_without_progress = 0;
                        debug!(epoch, loss, "New best parameters");
                    } else {
                        checks_without_progress += 1;
                    }
                    info!(
                        epoch,
                        samples_seen,
                        "Validation loss: {:.6}\tBest loss: {:.6}\tAccuracy: {:.2}%",
                        loss,
                        best_loss,
                        accuracy * 100.0
                    );
                }
                None => {
                    if let Some((batch_features, batch_labels)) = &last_batch {
                        let (loss, accuracy) = model.evaluate(batch_features, batch_labels)?;
                        info!(
                            epoch,
                            samples_seen,
                            "Last training batch loss: {:.6}\tAccuracy: {:.2}%",
                            loss,
                            accuracy * 100.0
                        );
                    }
                }
            }
        }

        // Only reachable if the epoch counter is exhausted; training always
        // returns through the max_iter check above.
        if let Some(params) = best_params {
            model.set_parameters(params)?;
        }
        self.persist(&progress)?;
        Ok((
            progress,
            summary(samples_seen, steps, usize::MAX, best_loss, checks_without_progress),
        ))
    }

    fn persist(&self, progress: &ProgressRecord) -> Result<(), ClassifierError> {
        if let Some(dir) = &self.progress_dir {
            let path = progress.save_to_dir(dir)?;
            debug!(path = %path.display(), entries = progress.len(), "Saved progress record");
        }
        Ok(())
    }

    /// Class probabilities (N × n_classes) from the current model.
    pub fn predict_probability(&self, features: &Matrix) -> Result<Matrix, ClassifierError> {
        Ok(self.fitted()?.model.predict_probabilities(features)?)
    }

    /// Most probable label per row. Ties go to the lowest class.
    pub fn predict(&self, features: &Matrix) -> Result<Vec<L>, ClassifierError> {
        let probabilities = self.predict_probability(features)?;
        self.fitted()?.mapping.decode(&probabilities.argmax_rows())
    }

    /// Mean accuracy of [`predict`](DnnClassifier::predict) on `labels`.
    pub fn score(&self, features: &Matrix, labels: &[L]) -> Result<f64, ClassifierError> {
        check_lengths(features, labels)?;
        let predicted = self.predict(features)?;
        accuracy_score(labels, &predicted)
    }

    /// Writes the fitted model to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        Ok(self.fitted()?.model.save(path)?)
    }

    fn fitted(&self) -> Result<&Fitted<M, L>, ClassifierError> {
        self.fitted.as_ref().ok_or(ClassifierError::NotFitted)
    }
}

fn encode_validation<L: Ord + Clone>(
    mapping: &LabelMapping<L>,
    n_features: usize,
    features: &Matrix,
    labels: &[L],
) -> Result<Vec<usize>, ClassifierError> {
    check_lengths(features, labels)?;
    if features.cols() != n_features {
        return Err(ClassifierError::InvalidInput(format!(
            "validation set has {} columns, training set has {}",
            features.cols(),
            n_features
        )));
    }
    mapping.encode(labels)
}

fn check_lengths<L>(features: &Matrix, labels: &[L]) -> Result<(), ClassifierError> {
    if features.rows() != labels.len() {
        return Err(ClassifierError::InvalidInput(format!(
            "{} feature rows but {} labels",
            features.rows(),
            labels.len()
        )));
    }
    if labels.is_empty() {
        return Err(ClassifierError::InvalidInput("empty data set".to_string()));
    }
    Ok(())
}
