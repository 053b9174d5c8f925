//! MNIST dataset loader.
//!
//! Reads images and labels from the IDX files MNIST is distributed in. Each
//! image becomes one row of a [`Matrix`] with pixels scaled to [0, 1].

use indicatif::{ProgressBar, ProgressStyle};
use matrix::Matrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const IMAGE_MAGIC_NUMBER: u32 = 2051;
pub const LABEL_MAGIC_NUMBER: u32 = 2049;
pub const INPUT_NODES: usize = 784;
pub const OUTPUT_NODES: usize = 10;

/// Rows kept from the training files by default.
pub const DEFAULT_LIMIT: usize = 1000;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";

/// Errors that can occur while handling MNIST data
#[derive(Debug, Error)]
pub enum MnistError {
    /// Wrapper for standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error for invalid magic numbers in MNIST files
    #[error("Invalid magic number for {kind} file: expected {expected}, got {actual}")]
    InvalidMagicNumber {
        kind: &'static str,
        expected: u32,
        actual: u32,
    },
    /// Error for mismatches between images and labels
    #[error("Data mismatch: {0}")]
    DataMismatch(String),
    /// Error for invalid image dimensions
    #[error(
        "Invalid image dimensions: expected {expected} pixels, got {actual} pixels ({rows}x{cols})"
    )]
    InvalidDimensions {
        expected: usize,
        actual: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Matrix error: {0}")]
    Matrix(#[from] matrix::MatrixError),
}

/// Images (one per row) and their digit labels.
#[derive(Debug, Clone, PartialEq)]
pub struct MnistData {
    images: Matrix,
    labels: Vec<u8>,
}

/// Train, validation and test partitions of a data set.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit {
    pub train: MnistData,
    pub valid: MnistData,
    pub test: MnistData,
}

impl MnistData {
    /// Pairs an image matrix with its labels.
    ///
    /// # Example
    /// ```
    /// use matrix::Matrix;
    /// use mnist::MnistData;
    ///
    /// let images = Matrix::zeros(2, 784);
    /// let data = MnistData::new(images, vec![3, 7]).unwrap();
    /// assert_eq!(data.len(), 2);
    /// ```
    pub fn new(images: Matrix, labels: Vec<u8>) -> Result<Self, MnistError> {
        if images.rows() != labels.len() {
            return Err(MnistError::DataMismatch(format!(
                "Number of images ({}) does not match number of labels ({})",
                images.rows(),
                labels.len()
            )));
        }
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn images(&self) -> &Matrix {
        &self.images
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn into_parts(self) -> (Matrix, Vec<u8>) {
        (self.images, self.labels)
    }

    /// The rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, MnistError> {
        let images = self.images.select_rows(indices)?;
        let labels = indices
            .iter()
            .map(|&i| {
                self.labels.get(i).copied().ok_or_else(|| {
                    MnistError::DataMismatch(format!("row {i} out of range for {}", self.len()))
                })
            })
            .collect::<Result<Vec<u8>, _>>()?;
        Self::new(images, labels)
    }

    /// Shuffles the rows with `seed` and cuts them into `n_train` training
    /// rows, `n_valid` validation rows and the rest for testing.
    pub fn split(&self, n_train: usize, n_valid: usize, seed: u64) -> Result<DataSplit, MnistError> {
        if n_train + n_valid > self.len() {
            return Err(MnistError::DataMismatch(format!(
                "cannot take {} training and {} validation rows from {}",
                n_train,
                n_valid,
                self.len()
            )));
        }

        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));
        let (train, rest) = indices.split_at(n_train);
        let (valid, test) = rest.split_at(n_valid);

        Ok(DataSplit {
            train: self.select(train)?,
            valid: self.select(valid)?,
            test: self.select(test)?,
        })
    }
}

/// Creates a progress bar with a consistent style
pub(crate) fn create_progress_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Reads a 32-bit unsigned integer in big-endian format
fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buffer = [0; 4];
    reader.read_exact(&mut buffer)?;
    Ok(u32::from_be_bytes(buffer))
}

/// Reads up to `limit` images from an IDX image file.
///
/// # Format
/// The IDX file format consists of:
/// * 32-bit magic number (2051)
/// * 32-bit number of images
/// * 32-bit number of rows
/// * 32-bit number of columns
/// * Pixels in row-major order (1 byte per pixel)
pub fn read_mnist_images(
    path: impl AsRef<Path>,
    limit: Option<usize>,
    progress: &ProgressBar,
) -> Result<Matrix, MnistError> {
    let mut reader = BufReader::new(File::open(path)?);

    let magic_number = read_u32(&mut reader)?;
    if magic_number != IMAGE_MAGIC_NUMBER {
        return Err(MnistError::InvalidMagicNumber {
            kind: "images",
            expected: IMAGE_MAGIC_NUMBER,
            actual: magic_number,
        });
    }

    let num_images = read_u32(&mut reader)? as usize;
    let num_rows = read_u32(&mut reader)? as usize;
    let num_cols = read_u32(&mut reader)? as usize;
    let pixels_per_image = num_rows * num_cols;

    if pixels_per_image != INPUT_NODES {
        return Err(MnistError::InvalidDimensions {
            expected: INPUT_NODES,
            actual: pixels_per_image,
            rows: num_rows,
            cols: num_cols,
        });
    }

    let count = limit.map_or(num_images, |limit| limit.min(num_images));
    progress.set_length(count as u64);
    progress.set_message("Loading images...");

    let mut data = Vec::with_capacity(count * pixels_per_image);
    let mut buffer = vec![0u8; pixels_per_image];
    for _ in 0..count {
        reader.read_exact(&mut buffer)?;
        data.extend(buffer.iter().map(|&pixel| f64::from(pixel) / 255.0));
        progress.inc(1);
    }

    progress.finish_with_message("Images loaded successfully");
    Ok(Matrix::new(count, pixels_per_image, data)?)
}

/// Reads up to `limit` labels from an IDX label file.
///
/// # Format
/// The IDX file format consists of:
/// * 32-bit magic number (2049)
/// * 32-bit number of labels
/// * Labels (1 byte per label)
pub fn read_mnist_labels(
    path: impl AsRef<Path>,
    limit: Option<usize>,
    progress: &ProgressBar,
) -> Result<Vec<u8>, MnistError> {
    let mut reader = BufReader::new(File::open(path)?);

    let magic_number = read_u32(&mut reader)?;
    if magic_number != LABEL_MAGIC_NUMBER {
        return Err(MnistError::InvalidMagicNumber {
            kind: "labels",
            expected: LABEL_MAGIC_NUMBER,
            actual: magic_number,
        });
    }

    let num_labels = read_u32(&mut reader)? as usize;
    let count = limit.map_or(num_labels, |limit| limit.min(num_labels));
    progress.set_length(count as u64);
    progress.set_message("Loading labels...");

    let mut labels = vec![0u8; count];
    reader.read_exact(&mut labels)?;
    if let Some(&label) = labels.iter().find(|&&l| usize::from(l) >= OUTPUT_NODES) {
        return Err(MnistError::DataMismatch(format!(
            "label {label} is not a digit"
        )));
    }
    progress.inc(count as u64);

    progress.finish_with_message("Labels loaded successfully");
    Ok(labels)
}

/// Loads the first `limit` rows of the MNIST training files in `dir`.
pub fn load_training_data(dir: &Path, limit: Option<usize>) -> Result<MnistData, MnistError> {
    load_mnist_data(dir.join(TRAIN_IMAGES), dir.join(TRAIN_LABELS), limit)
}

/// Loads MNIST images and labels from the specified file paths.
pub fn load_mnist_data(
    images_path: PathBuf,
    labels_path: PathBuf,
    limit: Option<usize>,
) -> Result<MnistData, MnistError> {
    let multi_progress = indicatif::MultiProgress::new();
    let style = create_progress_style(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
    );

    let images_progress = multi_progress.add(ProgressBar::new(0));
    let labels_progress = multi_progress.add(ProgressBar::new(0));
    images_progress.set_style(style.clone());
    labels_progress.set_style(style);

    let images = read_mnist_images(images_path, limit, &images_progress)?;
    let labels = read_mnist_labels(labels_path, limit, &labels_progress)?;

    MnistData::new(images, labels)
}
