//! Cross validation and exhaustive hyperparameter search.

use crate::classifier::DnnClassifier;
use crate::error::ClassifierError;
use crate::hyperparameters::Hyperparameters;
use crate::model::TrainableModel;
use indicatif::{ProgressBar, ProgressStyle};
use matrix::Matrix;
use neural_network::{Activation, Network, Optimizer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Fraction of positions where `predicted` equals `truth`.
pub fn accuracy_score<L: PartialEq>(truth: &[L], predicted: &[L]) -> Result<f64, ClassifierError> {
    if truth.len() != predicted.len() {
        return Err(ClassifierError::InvalidInput(format!(
            "{} true labels but {} predictions",
            truth.len(),
            predicted.len()
        )));
    }
    if truth.is_empty() {
        return Err(ClassifierError::InvalidInput(
            "cannot score an empty set".to_string(),
        ));
    }
    let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / truth.len() as f64)
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Train/test row indices of one fold.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// K-fold splitter that keeps class proportions in every test fold.
///
/// Rows of each class are taken in their original order and cut into
/// `n_splits` contiguous runs; run `k` of every class goes to test fold `k`.
/// No shuffling is done, so splits are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratifiedKFold {
    pub n_splits: usize,
}

impl Default for StratifiedKFold {
    fn default() -> Self {
        Self { n_splits: 5 }
    }
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Result<Self, ClassifierError> {
        if n_splits < 2 {
            return Err(ClassifierError::InvalidConfig(format!(
                "need at least 2 splits, got {n_splits}"
            )));
        }
        Ok(Self { n_splits })
    }

    pub fn split<L: Ord>(&self, labels: &[L]) -> Result<Vec<Fold>, ClassifierError> {
        if self.n_splits < 2 {
            return Err(ClassifierError::InvalidConfig(format!(
                "need at least 2 splits, got {}",
                self.n_splits
            )));
        }
        if labels.len() < self.n_splits {
            return Err(ClassifierError::InvalidInput(format!(
                "cannot split {} samples into {} folds",
                labels.len(),
                self.n_splits
            )));
        }

        let mut by_class: BTreeMap<&L, Vec<usize>> = BTreeMap::new();
        for (index, label) in labels.iter().enumerate() {
            by_class.entry(label).or_default().push(index);
        }

        let mut test_folds = vec![Vec::new(); self.n_splits];
        for rows in by_class.values() {
            let m = rows.len();
            for (k, fold) in test_folds.iter_mut().enumerate() {
                let start = k * m / self.n_splits;
                let end = (k + 1) * m / self.n_splits;
                fold.extend(rows.get(start..end).unwrap_or_default());
            }
        }

        let mut folds = Vec::with_capacity(self.n_splits);
        for mut test in test_folds {
            if test.is_empty() {
                return Err(ClassifierError::InvalidInput(format!(
                    "a test fold would be empty with {} splits",
                    self.n_splits
                )));
            }
            test.sort_unstable();
            let train = (0..labels.len())
                .filter(|i| test.binary_search(i).is_err())
                .collect();
            folds.push(Fold { train, test });
        }
        Ok(folds)
    }
}

/// Rows and labels of `indices`.
fn subset<L: Clone>(
    features: &Matrix,
    labels: &[L],
    indices: &[usize],
) -> Result<(Matrix, Vec<L>), ClassifierError> {
    let rows = features.select_rows(indices)?;
    let selected = indices
        .iter()
        .map(|&i| {
            labels.get(i).cloned().ok_or_else(|| {
                ClassifierError::InvalidInput(format!("label index {i} out of range"))
            })
        })
        .collect::<Result<Vec<L>, _>>()?;
    Ok((rows, selected))
}

/// Test accuracy of a fresh copy of `estimator` on every fold.
pub fn cross_val_score<M, L>(
    estimator: &DnnClassifier<M, L>,
    features: &Matrix,
    labels: &[L],
    folds: &StratifiedKFold,
) -> Result<Vec<f64>, ClassifierError>
where
    M: TrainableModel,
    L: Ord + Clone,
{
    if features.rows() != labels.len() {
        return Err(ClassifierError::InvalidInput(format!(
            "{} feature rows but {} labels",
            features.rows(),
            labels.len()
        )));
    }

    folds
        .split(labels)?
        .iter()
        .map(|fold| {
            let (train_x, train_y) = subset(features, labels, &fold.train)?;
            let (test_x, test_y) = subset(features, labels, &fold.test)?;
            let mut clf = estimator.with_hyperparameters(estimator.hyperparameters().clone());
            clf.fit(&train_x, &train_y, None)?.score(&test_x, &test_y)
        })
        .collect()
}

/// Candidate values per hyperparameter. An empty list keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub n_hidden_layers: Vec<usize>,
    pub n_neurons: Vec<usize>,
    pub batch_size: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub activation: Vec<Activation>,
    pub optimizer: Vec<Optimizer>,
    pub dropout_rate: Vec<Option<f64>>,
    pub max_iter: Vec<usize>,
}

fn expand<T: Clone>(
    candidates: Vec<Hyperparameters>,
    values: &[T],
    set: impl Fn(&mut Hyperparameters, T),
) -> Vec<Hyperparameters> {
    if values.is_empty() {
        return candidates;
    }
    let set = &set;
    candidates
        .into_iter()
        .flat_map(|base| {
            values.iter().map(move |value| {
                let mut params = base.clone();
                set(&mut params, value.clone());
                params
            })
        })
        .collect()
}

impl ParamGrid {
    /// Every combination, with the first axis varying slowest.
    pub fn candidates(&self, base: &Hyperparameters) -> Vec<Hyperparameters> {
        let c = vec![base.clone()];
        let c = expand(c, &self.n_hidden_layers, |p, v| p.n_hidden_layers = v);
        let c = expand(c, &self.n_neurons, |p, v| p.n_neurons = v);
        let c = expand(c, &self.batch_size, |p, v| p.batch_size = v);
        let c = expand(c, &self.learning_rate, |p, v| p.learning_rate = v);
        let c = expand(c, &self.activation, |p, v| p.activation = v);
        let c = expand(c, &self.optimizer, |p, v| p.optimizer = v);
        let c = expand(c, &self.dropout_rate, |p, v| p.dropout_rate = v);
        expand(c, &self.max_iter, |p, v| p.max_iter = v)
    }

    /// Number of combinations [`candidates`](ParamGrid::candidates) yields.
    pub fn n_candidates(&self) -> usize {
        [
            self.n_hidden_layers.len(),
            self.n_neurons.len(),
            self.batch_size.len(),
            self.learning_rate.len(),
            self.activation.len(),
            self.optimizer.len(),
            self.dropout_rate.len(),
            self.max_iter.len(),
        ]
        .iter()
        .map(|&n| n.max(1))
        .product()
    }

    /// Names and values of the axes this grid varies, for `params`.
    pub fn varied(&self, params: &Hyperparameters) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if !self.n_hidden_layers.is_empty() {
            out.push(("n_hidden_layers", params.n_hidden_layers.to_string()));
        }
        if !self.n_neurons.is_empty() {
            out.push(("n_neurons", params.n_neurons.to_string()));
        }
        if !self.batch_size.is_empty() {
            out.push(("batch_size", params.batch_size.to_string()));
        }
        if !self.learning_rate.is_empty() {
            out.push(("learning_rate", params.learning_rate.to_string()));
        }
        if !self.activation.is_empty() {
            out.push(("activation", params.activation.to_string()));
        }
        if !self.optimizer.is_empty() {
            out.push(("optimizer", params.optimizer.to_string()));
        }
        if !self.dropout_rate.is_empty() {
            let rate = params
                .dropout_rate
                .map_or_else(|| "none".to_string(), |r| r.to_string());
            out.push(("dropout_rate", rate));
        }
        if !self.max_iter.is_empty() {
            out.push(("max_iter", params.max_iter.to_string()));
        }
        out
    }
}

/// Scores of one candidate across all folds.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    pub params: Hyperparameters,
    pub split_scores: Vec<f64>,
    pub mean_test_score: f64,
    pub std_test_score: f64,
    /// 1 for the best mean score; ties share the lower rank.
    pub rank_test_score: usize,
    pub mean_fit_time: f64,
    pub std_fit_time: f64,
    pub mean_score_time: f64,
    pub std_score_time: f64,
}

struct JobOutcome {
    candidate: usize,
    fold: usize,
    score: f64,
    fit_time: f64,
    score_time: f64,
}

/// A search configuration loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base: Hyperparameters,
    pub grid: ParamGrid,
    pub folds: StratifiedKFold,
}

/// Selu, one to three hidden layers, 40000 samples, seeded with 1.
impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base: Hyperparameters {
                random_state: Some(1),
                ..Hyperparameters::default()
            },
            grid: ParamGrid {
                activation: vec![Activation::Selu],
                n_hidden_layers: vec![1, 2, 3],
                max_iter: vec![40000],
                ..ParamGrid::default()
            },
            folds: StratifiedKFold::default(),
        }
    }
}

impl SearchConfig {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let config_str = fs::read_to_string(path)?;
        let config: SearchConfig = serde_json::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        StratifiedKFold::new(self.folds.n_splits)?;
        self.grid
            .candidates(&self.base)
            .iter()
            .try_for_each(Hyperparameters::validate)
    }
}

/// Exhaustive search over a [`ParamGrid`] with stratified k-fold cross
/// validation.
///
/// Every (candidate, fold) pair is fitted on its own classifier in
/// parallel. The best candidate by mean test accuracy is then refitted on
/// the whole training set.
pub struct GridSearch<M = Network, L: Ord = u8> {
    estimator: DnnClassifier<M, L>,
    grid: ParamGrid,
    folds: StratifiedKFold,
    show_progress: bool,
    results: Vec<CandidateResult>,
    best_index: Option<usize>,
    best_estimator: Option<DnnClassifier<M, L>>,
}

impl<M, L> GridSearch<M, L>
where
    M: TrainableModel,
    L: Ord + Clone + Send + Sync,
{
    pub fn new(estimator: DnnClassifier<M, L>, grid: ParamGrid, folds: StratifiedKFold) -> Self {
        Self {
            estimator,
            grid,
            folds,
            show_progress: false,
            results: Vec::new(),
            best_index: None,
            best_estimator: None,
        }
    }

    /// Shows a progress bar while fitting.
    pub fn with_progress_bar(mut self) -> Self {
        self.show_progress = true;
        self
    }

    pub fn fit(&mut self, features: &Matrix, labels: &[L]) -> Result<&mut Self, ClassifierError> {
        self.results.clear();
        self.best_index = None;
        self.best_estimator = None;

        if features.rows() != labels.len() {
            return Err(ClassifierError::InvalidInput(format!(
                "{} feature rows but {} labels",
                features.rows(),
                labels.len()
            )));
        }

        let candidates = self.grid.candidates(self.estimator.hyperparameters());
        let folds = self.folds.split(labels)?;
        info!(
            candidates = candidates.len(),
            folds = folds.len(),
            "Fitting {} fits",
            candidates.len() * folds.len()
        );

        let mut jobs = Vec::with_capacity(candidates.len() * folds.len());
        for (c, params) in candidates.iter().enumerate() {
            for f in 0..folds.len() {
                jobs.push((c, f, self.estimator.with_hyperparameters(params.clone())));
            }
        }

        let progress = if self.show_progress {
            let bar = ProgressBar::new(jobs.len() as u64);
            bar.set_style(create_progress_style(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}/{len:3} fits {msg}",
            ));
            bar
        } else {
            ProgressBar::hidden()
        };

        let outcomes = jobs
            .into_par_iter()
            .map(|(candidate, fold, mut clf)| -> Result<JobOutcome, ClassifierError> {
                let split = folds.get(fold).ok_or_else(|| {
                    ClassifierError::InvalidInput(format!("fold {fold} out of range"))
                })?;
                let (train_x, train_y) = subset(features, labels, &split.train)?;
                let (test_x, test_y) = subset(features, labels, &split.test)?;

                let started = Instant::now();
                clf.fit(&train_x, &train_y, None)?;
                let fit_time = started.elapsed().as_secs_f64();

                let started = Instant::now();
                let score = clf.score(&test_x, &test_y)?;
                let score_time = started.elapsed().as_secs_f64();

                progress.inc(1);
                Ok(JobOutcome {
                    candidate,
                    fold,
                    score,
                    fit_time,
                    score_time,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        progress.finish_and_clear();

        self.results = aggregate(candidates, folds.len(), outcomes);

        let best_index = self
            .results
            .iter()
            .position(|r| r.rank_test_score == 1)
            .ok_or_else(|| ClassifierError::InvalidConfig("no candidates to search".to_string()))?;
        let best_params = self
            .results
            .get(best_index)
            .map(|r| r.params.clone())
            .ok_or_else(|| ClassifierError::InvalidConfig("no candidates to search".to_string()))?;
        info!(best_index, params = %best_params, "Refitting best candidate");

        let mut best = self.estimator.with_hyperparameters(best_params);
        best.fit(features, labels, None)?;
        self.best_index = Some(best_index);
        self.best_estimator = Some(best);
        Ok(self)
    }

    pub fn results(&self) -> &[CandidateResult] {
        &self.results
    }

    pub fn best_estimator(&self) -> Result<&DnnClassifier<M, L>, ClassifierError> {
        self.best_estimator.as_ref().ok_or(ClassifierError::NotFitted)
    }

    pub fn best_result(&self) -> Result<&CandidateResult, ClassifierError> {
        self.best_index
            .and_then(|i| self.results.get(i))
            .ok_or(ClassifierError::NotFitted)
    }

    /// Mean cross-validated accuracy of the best candidate.
    pub fn best_score(&self) -> Result<f64, ClassifierError> {
        Ok(self.best_result()?.mean_test_score)
    }

    pub fn best_params(&self) -> Result<&Hyperparameters, ClassifierError> {
        Ok(&self.best_result()?.params)
    }

    /// The grid axes and values of the best candidate.
    pub fn best_params_description(&self) -> Result<String, ClassifierError> {
        Ok(describe(&self.grid.varied(self.best_params()?)))
    }

    /// Writes one row per candidate.
    pub fn write_results_csv(&self, path: &Path) -> Result<(), ClassifierError> {
        let n_splits = self
            .results
            .first()
            .map_or(0, |r| r.split_scores.len());
        let axes: Vec<&str> = self
            .results
            .first()
            .map(|r| self.grid.varied(&r.params).into_iter().map(|(name, _)| name).collect())
            .unwrap_or_default();

        let mut writer = csv::Writer::from_path(path)?;
        let mut header: Vec<String> = [
            "mean_fit_time",
            "std_fit_time",
            "mean_score_time",
            "std_score_time",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(axes.iter().map(|name| format!("param_{name}")));
        header.push("params".to_string());
        header.extend((0..n_splits).map(|i| format!("split{i}_test_score")));
        header.extend(
            ["mean_test_score", "std_test_score", "rank_test_score"]
                .iter()
                .map(|s| s.to_string()),
        );
        writer.write_record(&header)?;

        for result in &self.results {
            let varied = self.grid.varied(&result.params);
            let mut row = vec![
                result.mean_fit_time.to_string(),
                result.std_fit_time.to_string(),
                result.mean_score_time.to_string(),
                result.std_score_time.to_string(),
            ];
            row.extend(varied.iter().map(|(_, value)| value.clone()));
            row.push(describe(&varied));
            row.extend(result.split_scores.iter().map(|s| s.to_string()));
            row.push(result.mean_test_score.to_string());
            row.push(result.std_test_score.to_string());
            row.push(result.rank_test_score.to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes the results into `dir` under a time-of-day file name.
    pub fn save_results(&self, dir: &Path) -> Result<PathBuf, ClassifierError> {
        fs::create_dir_all(dir)?;
        let name = chrono::Local::now().format("%H-%M-%S");
        let path = dir.join(format!("{name}.csv"));
        self.write_results_csv(&path)?;
        Ok(path)
    }
}

fn describe(varied: &[(&str, String)]) -> String {
    let fields: Vec<String> = varied
        .iter()
        .map(|(name, value)| format!("'{name}': {value}"))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn aggregate(
    candidates: Vec<Hyperparameters>,
    n_folds: usize,
    outcomes: Vec<JobOutcome>,
) -> Vec<CandidateResult> {
    let n = candidates.len();
    let mut scores = vec![vec![0.0; n_folds]; n];
    let mut fit_times = vec![vec![0.0; n_folds]; n];
    let mut score_times = vec![vec![0.0; n_folds]; n];
    for outcome in outcomes {
        let slots = [
            (&mut scores, outcome.score),
            (&mut fit_times, outcome.fit_time),
            (&mut score_times, outcome.score_time),
        ];
        for (table, value) in slots {
            if let Some(slot) = table
                .get_mut(outcome.candidate)
                .and_then(|row| row.get_mut(outcome.fold))
            {
                *slot = value;
            }
        }
    }

    let means: Vec<f64> = scores.iter().map(|s| mean_std(s).0).collect();
    candidates
        .into_iter()
        .zip(scores)
        .zip(fit_times.iter().zip(&score_times))
        .zip(&means)
        .map(|(((params, split_scores), (fit, score)), &mean)| {
            let (mean_test_score, std_test_score) = mean_std(&split_scores);
            let (mean_fit_time, std_fit_time) = mean_std(fit);
            let (mean_score_time, std_score_time) = mean_std(score);
            CandidateResult {
                params,
                split_scores,
                mean_test_score,
                std_test_score,
                rank_test_score: 1 + means.iter().filter(|&&other| other > mean).count(),
                mean_fit_time,
                std_fit_time,
                mean_score_time,
                std_score_time,
            }
        })
        .collect()
}

/// Creates a progress bar style with the specified template.
fn create_progress_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::ScriptedModel;
    use crate::hyperparameters::HyperparametersBuilder;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_accuracy_score() {
        assert_relative_eq!(accuracy_score(&[1, 2, 3, 4], &[1, 2, 0, 4]).unwrap(), 0.75);
        assert!(accuracy_score(&[1, 2], &[1]).is_err());
        assert!(accuracy_score::<u8>(&[], &[]).is_err());
    }

    #[test]
    fn test_mean_std_is_population() {
        let (mean, std) = mean_std(&[1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(mean, 2.5);
        assert_relative_eq!(std, 1.25f64.sqrt());
    }

    #[test]
    fn test_stratified_folds_partition_and_balance() {
        let labels: Vec<u8> = (0..50).map(|i| (i % 2) as u8).collect();
        let folds = StratifiedKFold::default().split(&labels).unwrap();
        assert_eq!(folds.len(), 5);

        let mut seen = vec![0; labels.len()];
        for fold in &folds {
            assert_eq!(fold.test.len(), 10);
            assert_eq!(fold.train.len() + fold.test.len(), labels.len());
            let ones = fold.test.iter().filter(|&&i| labels[i] == 1).count();
            assert_eq!(ones, 5);
            for &i in &fold.test {
                seen[i] += 1;
                assert!(!fold.train.contains(&i));
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_stratified_folds_are_contiguous_per_class() {
        let labels = [0, 0, 0, 0, 1, 1, 1, 1];
        let folds = StratifiedKFold::new(2).unwrap().split(&labels).unwrap();
        assert_eq!(folds[0].test, vec![0, 1, 4, 5]);
        assert_eq!(folds[1].test, vec![2, 3, 6, 7]);
    }

    #[test]
    fn test_stratified_fold_errors() {
        assert!(StratifiedKFold::new(1).is_err());
        assert!(StratifiedKFold::default().split(&[0, 1, 0]).is_err());
    }

    #[test]
    fn test_param_grid_cartesian_order() {
        let grid = ParamGrid {
            n_hidden_layers: vec![1, 2],
            activation: vec![Activation::Relu, Activation::Selu],
            ..ParamGrid::default()
        };
        let base = Hyperparameters::default();
        let candidates = grid.candidates(&base);

        assert_eq!(grid.n_candidates(), 4);
        let pairs: Vec<(usize, Activation)> = candidates
            .iter()
            .map(|p| (p.n_hidden_layers, p.activation))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (1, Activation::Relu),
                (1, Activation::Selu),
                (2, Activation::Relu),
                (2, Activation::Selu),
            ]
        );
        assert!(candidates.iter().all(|p| p.n_neurons == base.n_neurons));
        assert_eq!(
            grid.varied(&candidates[1]),
            vec![("n_hidden_layers", "1".to_string()), ("activation", "selu".to_string())]
        );
    }

    #[test]
    fn test_empty_grid_is_the_base() {
        let base = Hyperparameters::default();
        assert_eq!(ParamGrid::default().candidates(&base), vec![base]);
    }

    #[test]
    fn test_search_config_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("search.json");
        fs::write(
            &path,
            r#"{
                "base": {"random_state": 1, "batch_size": 10},
                "grid": {"n_neurons": [10, 30], "dropout_rate": [null, 0.2]},
                "folds": {"n_splits": 3}
            }"#,
        )
        .unwrap();

        let config = SearchConfig::load(&path).unwrap();
        assert_eq!(config.base.batch_size, 10);
        assert_eq!(config.grid.candidates(&config.base).len(), 4);
        assert_eq!(config.folds.n_splits, 3);

        fs::write(&path, r#"{"grid": {"batch_size": [0]}}"#).unwrap();
        assert!(matches!(
            SearchConfig::load(&path),
            Err(ClassifierError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_search_config() {
        let config = SearchConfig::default();
        assert_eq!(config.base.random_state, Some(1));
        let candidates = config.grid.candidates(&config.base);
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|p| p.activation == Activation::Selu && p.max_iter == 40000));
    }

    fn dataset(n: usize) -> (Matrix, Vec<u8>) {
        let features = Matrix::new(n, 2, (0..n * 2).map(|i| i as f64).collect()).unwrap();
        let labels = (0..n).map(|i| (i % 2) as u8).collect();
        (features, labels)
    }

    #[test]
    fn test_cross_val_score_fits_every_fold() {
        let (x, y) = dataset(20);
        let h = HyperparametersBuilder::default()
            .batch_size(4)
            .max_iter(16)
            .build()
            .unwrap();
        let clf: DnnClassifier<ScriptedModel, u8> = DnnClassifier::new(h);

        let scores = cross_val_score(&clf, &x, &y, &StratifiedKFold::default()).unwrap();

        // the scripted model predicts class 0 on the first test row only
        assert_eq!(scores.len(), 5);
        for score in scores {
            assert_relative_eq!(score, 0.75);
        }
        assert!(!clf.is_fitted());
    }

    #[test]
    fn test_grid_search_ranks_and_refits() {
        let (x, y) = dataset(30);
        let base = HyperparametersBuilder::default()
            .batch_size(5)
            .max_iter(30)
            .random_state(1)
            .build()
            .unwrap();
        let grid = ParamGrid {
            n_hidden_layers: vec![1, 2, 3],
            ..ParamGrid::default()
        };
        let clf: DnnClassifier<ScriptedModel, u8> = DnnClassifier::new(base);
        let mut search = GridSearch::new(clf, grid, StratifiedKFold::new(3).unwrap());

        assert!(matches!(search.best_score(), Err(ClassifierError::NotFitted)));
        search.fit(&x, &y).unwrap();

        assert_eq!(search.results().len(), 3);
        for result in search.results() {
            assert_eq!(result.split_scores.len(), 3);
            // identical scripted scores tie at rank 1
            assert_eq!(result.rank_test_score, 1);
        }
        assert_eq!(search.best_params().unwrap().n_hidden_layers, 1);
        assert_eq!(search.best_params_description().unwrap(), "{'n_hidden_layers': 1}");
        let best = search.best_estimator().unwrap();
        assert!(best.is_fitted());
        assert_eq!(best.model().unwrap().steps, 6);

        let dir = tempdir().unwrap();
        let path = search.save_results(&dir.path().join("gs_results")).unwrap();
        let content = fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "mean_fit_time,std_fit_time,mean_score_time,std_score_time,param_n_hidden_layers,params,\
             split0_test_score,split1_test_score,split2_test_score,mean_test_score,std_test_score,rank_test_score"
        );
        assert_eq!(lines.count(), 3);
    }

    #[test]
    fn test_rank_ties_share_lowest_rank() {
        let candidates = vec![Hyperparameters::default(); 3];
        let outcome = |candidate, score| JobOutcome {
            candidate,
            fold: 0,
            score,
            fit_time: 0.0,
            score_time: 0.0,
        };
        let results = aggregate(
            candidates,
            1,
            vec![outcome(0, 0.5), outcome(1, 0.9), outcome(2, 0.5)],
        );
        let ranks: Vec<usize> = results.iter().map(|r| r.rank_test_score).collect();
        assert_eq!(ranks, vec![2, 1, 2]);
    }
}
