use mnist::OUTPUT_NODES;
use std::fmt;
use std::time::Duration;

/// Counts of (actual, predicted) digit pairs.
///
/// Rows are the actual digit and columns the prediction, so the diagonal
/// holds the correct predictions.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfusionMatrix {
    matrix: [[usize; OUTPUT_NODES]; OUTPUT_NODES],
}

/// Metrics for a single digit classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigitMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ConfusionMatrix {
    pub fn from_predictions(actual: &[u8], predicted: &[u8]) -> Self {
        let mut confusion = Self::default();
        for (&a, &p) in actual.iter().zip(predicted) {
            confusion.record(usize::from(a), usize::from(p));
        }
        confusion
    }

    /// Records a prediction. Out-of-range digits are ignored.
    pub fn record(&mut self, actual: usize, predicted: usize) {
        if let Some(cell) = self
            .matrix
            .get_mut(actual)
            .and_then(|row| row.get_mut(predicted))
        {
            *cell += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.matrix
            .get(actual)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..OUTPUT_NODES).map(|i| self.get(i, i)).sum();
        correct as f64 / self.total().max(1) as f64
    }

    pub fn metrics(&self, digit: usize) -> DigitMetrics {
        let true_positives = self.get(digit, digit) as f64;
        let actual_total: usize = (0..OUTPUT_NODES).map(|i| self.get(digit, i)).sum();
        let predicted_total: usize = (0..OUTPUT_NODES).map(|i| self.get(i, digit)).sum();

        let precision = true_positives / predicted_total.max(1) as f64;
        let recall = true_positives / actual_total.max(1) as f64;
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        DigitMetrics {
            precision,
            recall,
            f1,
        }
    }

    /// Prints precision, recall and F1 for every digit.
    pub fn print_metrics(&self) {
        println!("\nPer-digit Metrics:");
        println!("Digit  | Precision | Recall  | F1 Score");
        println!("-------|-----------|---------|----------");

        for digit in 0..OUTPUT_NODES {
            let metrics = self.metrics(digit);
            println!(
                "   {}   |   {:5.1}%  |  {:5.1}% |   {:5.1}%",
                digit,
                metrics.precision * 100.0,
                metrics.recall * 100.0,
                metrics.f1 * 100.0
            );
        }

        println!("\nOverall Accuracy: {:.2}%", self.accuracy() * 100.0);
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nConfusion Matrix:")?;
        writeln!(f, "      Predicted →")?;
        write!(f, "Actual")?;
        for digit in 0..OUTPUT_NODES {
            write!(f, " {digit:4}")?;
        }
        writeln!(f)?;
        writeln!(f, "  ↓   +{}", "-".repeat(5 * OUTPUT_NODES))?;
        for i in 0..OUTPUT_NODES {
            write!(f, "  {}   |", i)?;
            for j in 0..OUTPUT_NODES {
                write!(f, " {:4}", self.get(i, j))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }

    parts.join(" ")
}
