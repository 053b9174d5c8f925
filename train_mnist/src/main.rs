mod graph;
mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use matrix::Matrix;
use mnist::StandardizationParams;
use neural_network::Network;
use report::{format_duration, ConfusionMatrix};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;
use training::{
    accuracy_score, cross_val_score, mean_std, DnnClassifier, GridSearch, SearchConfig,
};

const TRAIN_SIZE: usize = 800;
const VALID_SIZE: usize = 100;
const SPLIT_SEED: u64 = 1;

#[derive(Parser)]
#[command(author, version, about = "Grid search a DNN classifier on MNIST")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a cross-validated grid search and report on the best model
    Search {
        /// Directory holding the IDX training files
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Number of images to load
        #[arg(long, default_value_t = mnist::DEFAULT_LIMIT)]
        limit: usize,

        /// JSON search configuration; the built-in grid is used when absent
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for per-fit validation progress files
        #[arg(long, default_value = "val_scores")]
        progress_dir: PathBuf,

        /// Directory for the search results table
        #[arg(long, default_value = "gs_results")]
        results_dir: PathBuf,

        /// Save the refitted best network to this path
        #[arg(long)]
        save_model: Option<PathBuf>,
    },
    /// Render a validation progress file as an SVG line chart
    Graph {
        /// Progress CSV written during training
        csv: PathBuf,

        /// Output path, defaults to the CSV path with an .svg extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

struct SearchOptions {
    data_dir: PathBuf,
    limit: usize,
    config: Option<PathBuf>,
    progress_dir: PathBuf,
    results_dir: PathBuf,
    save_model: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(
            std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(),
        ))
        .init();

    match Args::parse().command {
        Command::Search {
            data_dir,
            limit,
            config,
            progress_dir,
            results_dir,
            save_model,
        } => run_search(SearchOptions {
            data_dir,
            limit,
            config,
            progress_dir,
            results_dir,
            save_model,
        }),
        Command::Graph { csv, output } => {
            let (path, record) = graph::graph_file(&csv, output.as_deref())?;
            record.print_summary();
            println!("Chart saved to {}", path.display());
            Ok(())
        }
    }
}

/// Directives from `RUST_LOG` when present and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn load_config(path: Option<&Path>) -> Result<SearchConfig> {
    match path {
        Some(path) => SearchConfig::load(path)
            .with_context(|| format!("Failed to load search config {}", path.display())),
        None => Ok(SearchConfig::default()),
    }
}

fn run_search(options: SearchOptions) -> Result<()> {
    let config = load_config(options.config.as_deref())?;

    println!("Loading MNIST dataset...");
    let data = mnist::load_training_data(&options.data_dir, Some(options.limit))
        .with_context(|| format!("Failed to load MNIST from {}", options.data_dir.display()))?;
    println!("Loaded {} images", data.len());

    let split = data.split(TRAIN_SIZE, VALID_SIZE, SPLIT_SEED)?;
    let scaler = StandardizationParams::fit(split.train.images());
    let (train_x, train_y) = scaler.standardize_data(&split.train)?.into_parts();
    let (valid_x, valid_y) = scaler.standardize_data(&split.valid)?.into_parts();
    let (test_x, test_y) = scaler.standardize_data(&split.test)?.into_parts();
    info!(
        "Split into {} train, {} validation and {} test images",
        train_y.len(),
        valid_y.len(),
        test_y.len()
    );

    let estimator = DnnClassifier::<Network, u8>::new(config.base.clone())
        .with_validation(valid_x, valid_y)
        .with_progress_dir(&options.progress_dir);
    let mut search = GridSearch::new(estimator, config.grid.clone(), config.folds)
        .with_progress_bar();

    let start = Instant::now();
    search.fit(&train_x, &train_y)?;
    println!("Search took {}", format_duration(start.elapsed()));

    println!("Best score: {:.4}", search.best_score()?);
    println!("Params: {}", search.best_params_description()?);

    let best = search.best_estimator()?;
    report_best(best, &train_x, &train_y, &test_x, &test_y, &config)?;

    let results_path = search.save_results(&options.results_dir)?;
    println!("Search results saved to {}", results_path.display());

    if let Some(path) = &options.save_model {
        best.save(path)?;
        println!("Network saved to {}", path.display());
    }

    Ok(())
}

fn report_best(
    best: &DnnClassifier<Network, u8>,
    train_x: &Matrix,
    train_y: &[u8],
    test_x: &Matrix,
    test_y: &[u8],
    config: &SearchConfig,
) -> Result<()> {
    let train_predictions = best.predict(train_x)?;
    println!(
        "Training accuracy: {:.4}",
        accuracy_score(train_y, &train_predictions)?
    );

    let scores = cross_val_score(best, train_x, train_y, &config.folds)?;
    let (mean, std) = mean_std(&scores);
    println!("Cross val scores: {:?}", scores);
    println!("Mean: {:.4}", mean);
    println!("std: {:.4}", std);

    if test_y.is_empty() {
        println!("No test images left after the split");
        return Ok(());
    }

    let test_predictions = best.predict(test_x)?;
    println!(
        "Test accuracy: {:.4}",
        accuracy_score(test_y, &test_predictions)?
    );

    let confusion = ConfusionMatrix::from_predictions(test_y, &test_predictions);
    println!("{}", confusion);
    confusion.print_metrics();
    Ok(())
}
