use crate::error::ClassifierError;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-process sequence number appended to saved record names.
static SAVED_RECORDS: AtomicUsize = AtomicUsize::new(0);

/// One validated epoch: samples fed so far and validation accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    #[serde(rename = "Epoch")]
    pub samples_seen: usize,
    #[serde(rename = "Validation")]
    pub accuracy: f64,
}

/// Validation accuracy recorded at the end of every epoch, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressRecord {
    entries: Vec<ProgressEntry>,
}

impl ProgressRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, samples_seen: usize, accuracy: f64) {
        self.entries.push(ProgressEntry {
            samples_seen,
            accuracy,
        });
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Best validation accuracy and the sample count it was reached at.
    pub fn best(&self) -> Option<ProgressEntry> {
        self.entries
            .iter()
            .copied()
            .fold(None, |best: Option<ProgressEntry>, entry| match best {
                Some(b) if b.accuracy >= entry.accuracy => Some(b),
                _ => Some(entry),
            })
    }

    /// Writes the record as `Epoch,Validation` CSV.
    pub fn write_csv(&self, path: &Path) -> Result<(), ClassifierError> {
        let mut writer = csv::Writer::from_path(path)?;
        // serialize() skips the header when there are no rows
        writer.write_record(["Epoch", "Validation"])?;
        for entry in &self.entries {
            writer.write_record([entry.samples_seen.to_string(), entry.accuracy.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes the record into `dir` as `HH-MM-SS-mmm-N.csv` and returns the
    /// path written. `N` is unique within the process, so concurrent fits
    /// sharing a directory never overwrite each other.
    pub fn save_to_dir(&self, dir: &Path) -> Result<PathBuf, ClassifierError> {
        fs::create_dir_all(dir)?;
        let time = chrono::Local::now().format("%H-%M-%S-%3f");
        let seq = SAVED_RECORDS.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{time}-{seq}.csv"));
        self.write_csv(&path)?;
        Ok(path)
    }

    pub fn read_csv(path: &Path) -> Result<Self, ClassifierError> {
        let mut reader = csv::Reader::from_path(path)?;
        let entries = reader
            .deserialize()
            .collect::<Result<Vec<ProgressEntry>, csv::Error>>()?;
        Ok(Self { entries })
    }

    /// Best and final accuracy, plus four evenly spaced points of the
    /// progression when there are at least four entries.
    pub fn summary(&self) -> String {
        let mut out = String::from("\nValidation History Summary:\n---------------------------\n");
        let Some(best) = self.best() else {
            out.push_str("No validation data recorded\n");
            return out;
        };
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "Best accuracy: {:.2}% (after {} samples)",
            best.accuracy * 100.0,
            best.samples_seen
        );
        if let Some(last) = self.entries.last() {
            let _ = writeln!(
                out,
                "Final accuracy: {:.2}% (after {} samples)",
                last.accuracy * 100.0,
                last.samples_seen
            );
        }

        let len = self.entries.len();
        if len >= 4 {
            out.push_str("\nAccuracy progression:\n");
            for i in 0..=3 {
                if let Some(entry) = self.entries.get(i * (len - 1) / 3) {
                    let _ = writeln!(
                        out,
                        "{:>7} samples: {:.2}%",
                        entry.samples_seen,
                        entry.accuracy * 100.0
                    );
                }
            }
        }
        out
    }

    pub fn print_summary(&self) {
        print!("{}", self.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_history_recording() {
        let mut record = ProgressRecord::new();
        assert!(record.is_empty());
        assert_eq!(record.best(), None);

        record.record(800, 0.855);
        record.record(1600, 0.9);
        record.record(2400, 0.88);

        assert_eq!(record.len(), 3);
        assert_eq!(
            record.best(),
            Some(ProgressEntry {
                samples_seen: 1600,
                accuracy: 0.9
            })
        );
    }

    #[test]
    fn test_csv_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        let mut record = ProgressRecord::new();
        record.record(800, 0.5);
        record.record(1600, 0.75);

        record.write_csv(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Epoch,Validation\n800,0.5\n1600,0.75\n");
        assert_eq!(ProgressRecord::read_csv(&path).unwrap(), record);
    }

    #[test]
    fn test_empty_record_still_has_header() {
        let dir = tempdir().unwrap();
        let path = ProgressRecord::new().save_to_dir(&dir.path().join("val_scores")).unwrap();

        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("csv"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "Epoch,Validation\n");
        assert!(ProgressRecord::read_csv(&path).unwrap().is_empty());
    }

    #[test]
    fn test_summary_reports_best_final_and_progression() {
        let mut record = ProgressRecord::new();
        for (samples, accuracy) in [(800, 0.5), (1600, 0.9), (2400, 0.7), (3200, 0.8)] {
            record.record(samples, accuracy);
        }

        let summary = record.summary();
        assert!(summary.contains("Best accuracy: 90.00% (after 1600 samples)"));
        assert!(summary.contains("Final accuracy: 80.00% (after 3200 samples)"));
        assert!(summary.contains("Accuracy progression:"));
        assert!(summary.contains("   2400 samples: 70.00%"));
    }

    #[test]
    fn test_summary_of_empty_record() {
        let summary = ProgressRecord::new().summary();
        assert!(summary.contains("No validation data recorded"));
        assert!(!summary.contains("Best accuracy"));
    }

    #[test]
    fn test_concurrent_saves_get_distinct_files() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("val_scores");
        let mut record = ProgressRecord::new();
        record.record(100, 0.5);

        let paths: Vec<PathBuf> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| record.save_to_dir(&target).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut unique = paths.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 8);
        assert_eq!(fs::read_dir(&target).unwrap().count(), 8);
        for path in &paths {
            assert_eq!(ProgressRecord::read_csv(path).unwrap(), record);
        }
    }
}
