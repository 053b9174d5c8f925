use anyhow::{Context, Result};
use plotters::prelude::*;
use std::path::{Path, PathBuf};
use training::ProgressRecord;

/// Default chart location: the record's path with an `.svg` extension.
pub fn default_output(csv_path: &Path) -> PathBuf {
    csv_path.with_extension("svg")
}

/// Draws validation accuracy (percent) against samples trained on.
pub fn plot_progress(record: &ProgressRecord, output: &Path, title: &str) -> Result<()> {
    if record.is_empty() {
        anyhow::bail!("Progress record has no entries to plot");
    }

    let points: Vec<(f64, f64)> = record
        .entries()
        .iter()
        .map(|entry| (entry.samples_seen as f64, entry.accuracy * 100.0))
        .collect();
    let max_samples = points.iter().map(|&(x, _)| x).fold(1.0, f64::max);

    let root = SVGBackend::new(output, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)
        .context("Failed to fill chart background")?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..max_samples, 0.0..100.0)
        .context("Failed to build chart")?;

    chart
        .configure_mesh()
        .x_desc("Samples")
        .y_desc("Validation accuracy (%)")
        .draw()
        .context("Failed to draw mesh")?;

    chart
        .draw_series(LineSeries::new(points, &BLUE))
        .context("Failed to draw series")?
        .label("Validation")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .context("Failed to draw legend")?;

    root.present()
        .with_context(|| format!("Failed to write chart to {}", output.display()))?;
    Ok(())
}

/// Reads a progress CSV and renders it. Returns the chart path and the
/// record that was drawn.
pub fn graph_file(csv_path: &Path, output: Option<&Path>) -> Result<(PathBuf, ProgressRecord)> {
    let record = ProgressRecord::read_csv(csv_path)
        .with_context(|| format!("Failed to read progress from {}", csv_path.display()))?;
    let output = output.map_or_else(|| default_output(csv_path), Path::to_path_buf);
    let title = csv_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("Validation accuracy");

    plot_progress(&record, &output, title)?;
    Ok((output, record))
}
