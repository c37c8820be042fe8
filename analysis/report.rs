//! Human-readable and tab-separated renderings of a [`PipelineReport`].

use crate::data::WineColor;
use crate::map::StructureSummary;
use crate::pipeline::{ColorAnalysis, ComponentRegression, PenalizedAnalysis, PipelineReport};
use crate::regress::{
    DistributionSummary, MetricKind, Penalty, ResamplingReport, SelectionStrategy, SubsetPath,
};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error while writing the report: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write table '{path}': {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

fn quantile_cells(summary: &DistributionSummary) -> String {
    summary
        .quantiles
        .iter()
        .map(|(_, v)| format!("{v:>9.4}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_subset_paths<W: Write>(out: &mut W, paths: &[SubsetPath]) -> io::Result<()> {
    for path in paths {
        writeln!(out, "  {} selection", path.strategy)?;
        write!(out, "    {:>4}", "size")?;
        for kind in MetricKind::ALL {
            write!(out, " {:>12}", kind.name())?;
        }
        writeln!(out)?;
        let series: Vec<Vec<f64>> = MetricKind::ALL
            .iter()
            .map(|&kind| path.metric_series(kind))
            .collect();
        for row in 0..path.max_size() {
            write!(out, "    {:>4}", row + 1)?;
            for values in &series {
                write!(out, " {:>12.4}", values[row])?;
            }
            writeln!(out)?;
        }
        write!(out, "    best size:")?;
        for kind in MetricKind::ALL {
            match path.best_size_by(kind) {
                Some(size) => write!(out, " {}={}", kind.name(), size)?,
                None => write!(out, " {}=-", kind.name())?,
            }
        }
        writeln!(out)?;

        writeln!(out, "    membership (columns follow the predictor legend)")?;
        for (k, row) in path.membership().rows().into_iter().enumerate() {
            let marks: Vec<&str> = row.iter().map(|&m| if m { "*" } else { "." }).collect();
            writeln!(out, "    {:>4}  {}", k + 1, marks.join("  "))?;
        }
    }
    Ok(())
}

fn write_legend<W: Write>(out: &mut W, names: &[String]) -> io::Result<()> {
    writeln!(out, "  predictors:")?;
    for (j, name) in names.iter().enumerate() {
        writeln!(out, "    {:>2}  {}", j + 1, name)?;
    }
    Ok(())
}

fn write_resampling<W: Write>(out: &mut W, report: &ResamplingReport) -> io::Result<()> {
    writeln!(
        out,
        "  resampled mean squared error over {} half/half splits (quantiles 0, .25, .5, .75, 1)",
        report.trials
    )?;
    for entry in report.summary() {
        writeln!(
            out,
            "    {:<10} {:>2} {:<5} mean {:>9.4}  {}",
            entry.strategy.name(),
            entry.size,
            entry.phase.name(),
            entry.summary.mean,
            quantile_cells(&entry.summary)
        )?;
    }
    for strategy in SelectionStrategy::ALL {
        if let Some(size) = report.best_size(strategy) {
            writeln!(out, "    lowest mean test error for {strategy}: size {size}")?;
        }
    }
    writeln!(out, "  selection frequency pooled over strategies")?;
    for (k, row) in report.pooled_membership_frequency().rows().into_iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|f| format!("{f:.2}")).collect();
        writeln!(out, "    {:>4}  {}", k + 1, cells.join(" "))?;
    }
    Ok(())
}

fn write_penalized<W: Write>(
    out: &mut W,
    names: &[String],
    analysis: &PenalizedAnalysis,
) -> io::Result<()> {
    let cv = &analysis.full_data;
    let fit = cv.fit_1se();
    writeln!(
        out,
        "  {} regression: lambda_min {:.5e}, lambda_1se {:.5e}, {} non-zero coefficients",
        analysis.penalty,
        cv.lambda_min(),
        cv.lambda_1se(),
        fit.nonzero_count()
    )?;
    writeln!(out, "    {:<24} {:>12}", "(intercept)", format!("{:.5}", fit.intercept))?;

    let resampled = &analysis.resampled;
    let per_predictor = match analysis.penalty {
        Penalty::Lasso => ("selected", resampled.selection_frequency()),
        Penalty::Ridge => ("mean |coef|", resampled.mean_abs_coefficients()),
    };
    writeln!(
        out,
        "    {:<24} {:>12} {:>12}",
        "predictor", "coef@1se", per_predictor.0
    )?;
    for ((name, coef), value) in names
        .iter()
        .zip(fit.coefficients.iter())
        .zip(per_predictor.1.iter())
    {
        writeln!(out, "    {name:<24} {coef:>12.5} {value:>12.3}")?;
    }
    let test = resampled.test_mse_summary();
    writeln!(
        out,
        "    resampled test error: mean {:.4}  {}",
        test.mean,
        quantile_cells(&test)
    )?;
    let train = resampled.train_mse_summary();
    writeln!(out, "    resampled train error: mean {:.4}", train.mean)?;
    let lambdas = resampled.lambda_summary();
    writeln!(
        out,
        "    chosen lambda_1se per trial: median {:.5e}, range {:.5e} .. {:.5e}",
        lambdas.median(),
        lambdas.quantiles.first().map_or(f64::NAN, |q| q.1),
        lambdas.quantiles.last().map_or(f64::NAN, |q| q.1)
    )?;
    Ok(())
}

fn write_color<W: Write>(out: &mut W, analysis: &ColorAnalysis) -> io::Result<()> {
    writeln!(
        out,
        "== {} wine: {} rows ({} removed as outliers) ==",
        analysis.color, analysis.rows, analysis.dropped
    )?;
    let names = analysis
        .subset_paths
        .as_ref()
        .and_then(|p| p.first().map(|path| path.feature_names.clone()))
        .or_else(|| analysis.resampling.as_ref().map(|r| r.feature_names.clone()))
        .or_else(|| {
            analysis
                .penalized
                .first()
                .map(|p| p.resampled.feature_names.clone())
        })
        .unwrap_or_default();
    write_legend(out, &names)?;
    if let Some(paths) = &analysis.subset_paths {
        write_subset_paths(out, paths)?;
    }
    if let Some(resampling) = &analysis.resampling {
        write_resampling(out, resampling)?;
    }
    for penalized in &analysis.penalized {
        write_penalized(out, &names, penalized)?;
    }
    writeln!(out)
}

fn write_structure<W: Write>(out: &mut W, summary: &StructureSummary) -> io::Result<()> {
    let pca = &summary.pca;
    writeln!(out, "== principal components of the merged data ==")?;
    writeln!(
        out,
        "    {:<6} {:>10} {:>12} {:>12}",
        "", "sdev", "proportion", "cumulative"
    )?;
    let ratio = pca.explained_variance_ratio();
    let cumulative = pca.cumulative_variance_ratio();
    for (k, name) in pca.component_names().iter().enumerate() {
        writeln!(
            out,
            "    {:<6} {:>10.4} {:>12.4} {:>12.4}",
            name,
            pca.sdev()[k],
            ratio[k],
            cumulative[k]
        )?;
    }
    writeln!(out, "  loadings of the first two components")?;
    for (name, row) in pca.feature_names().iter().zip(pca.loadings().rows()) {
        writeln!(out, "    {:<24} {:>8.4} {:>8.4}", name, row[0], row[1])?;
    }
    writeln!(out, "  centroids by color")?;
    for c in &summary.source_centroids {
        writeln!(
            out,
            "    {:<8} n={:<6} PC1 {:>8.4}  PC2 {:>8.4}",
            c.key.name(), c.count, c.pc1, c.pc2
        )?;
    }
    writeln!(out, "  centroids by quality")?;
    for c in &summary.quality_centroids {
        writeln!(
            out,
            "    {:<8} n={:<6} PC1 {:>8.4}  PC2 {:>8.4}",
            c.key, c.count, c.pc1, c.pc2
        )?;
    }
    writeln!(out)
}

fn write_component_regression<W: Write>(
    out: &mut W,
    analysis: &ComponentRegression,
) -> io::Result<()> {
    writeln!(
        out,
        "== {} wine: regression on principal components ==",
        analysis.color
    )?;
    write_subset_paths(out, &analysis.subset_paths)?;
    write_resampling(out, &analysis.resampling)?;
    writeln!(out)
}

/// Writes the plain-text report.
pub fn render_text<W: Write>(out: &mut W, report: &PipelineReport) -> Result<(), ReportError> {
    for color in &report.colors {
        write_color(out, color)?;
    }
    if let Some(structure) = &report.structure {
        write_structure(out, structure)?;
    }
    if let Some(pcr) = &report.component_regression {
        write_component_regression(out, pcr)?;
    }
    out.flush()?;
    Ok(())
}

/// Tab-separated table writer bound to one output file.
struct TableWriter {
    path: PathBuf,
    writer: csv::Writer<fs::File>,
}

impl TableWriter {
    fn create(dir: &Path, name: &str) -> Result<Self, ReportError> {
        let path = dir.join(name);
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&path)
            .map_err(|source| ReportError::Table {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, writer })
    }

    fn row<I, T>(&mut self, record: I) -> Result<(), ReportError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(record)
            .map_err(|source| ReportError::Table {
                path: self.path.clone(),
                source,
            })
    }

    fn finish(mut self) -> Result<PathBuf, ReportError> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

fn subset_metrics_table(
    dir: &Path,
    name: &str,
    paths: &[SubsetPath],
) -> Result<PathBuf, ReportError> {
    let mut table = TableWriter::create(dir, name)?;
    table.row(["strategy", "size", "metric", "value", "members"])?;
    for path in paths {
        for record in path.metric_records() {
            let members = path
                .model(record.size)
                .map(|m| {
                    m.fit
                        .members
                        .iter()
                        .map(|&j| path.feature_names[j].as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            table.row([
                record.strategy.name().to_string(),
                record.size.to_string(),
                record.metric.name().to_string(),
                record.value.to_string(),
                members,
            ])?;
        }
    }
    table.finish()
}

fn membership_table(dir: &Path, name: &str, paths: &[SubsetPath]) -> Result<PathBuf, ReportError> {
    let mut table = TableWriter::create(dir, name)?;
    let names = paths.first().map(|p| p.feature_names.clone()).unwrap_or_default();
    let mut header = vec!["strategy".to_string(), "size".to_string()];
    header.extend(names);
    table.row(&header)?;
    for path in paths {
        for (k, row) in path.membership().rows().into_iter().enumerate() {
            let mut record = vec![path.strategy.name().to_string(), (k + 1).to_string()];
            record.extend(row.iter().map(|&m| (if m { "1" } else { "0" }).to_string()));
            table.row(&record)?;
        }
    }
    table.finish()
}

fn resampling_table(
    dir: &Path,
    name: &str,
    report: &ResamplingReport,
) -> Result<PathBuf, ReportError> {
    let mut table = TableWriter::create(dir, name)?;
    table.row(["trial", "strategy", "size", "phase", "mse"])?;
    for record in &report.records {
        table.row([
            record.trial.to_string(),
            record.strategy.name().to_string(),
            record.size.to_string(),
            record.phase.name().to_string(),
            record.mse.to_string(),
        ])?;
    }
    table.finish()
}

fn penalty_path_table(
    dir: &Path,
    name: &str,
    names: &[String],
    analysis: &PenalizedAnalysis,
) -> Result<PathBuf, ReportError> {
    let mut table = TableWriter::create(dir, name)?;
    let mut header = vec![
        "lambda".to_string(),
        "cv_mean".to_string(),
        "cv_se".to_string(),
        "intercept".to_string(),
    ];
    header.extend(names.iter().cloned());
    table.row(&header)?;
    let cv = &analysis.full_data;
    let coefficients = cv.path.coefficient_matrix();
    for (l, fit) in cv.path.fits.iter().enumerate() {
        let mut record = vec![
            fit.lambda.to_string(),
            cv.cv_mean[l].to_string(),
            cv.cv_se[l].to_string(),
            fit.intercept.to_string(),
        ];
        record.extend(coefficients.row(l).iter().map(|v| v.to_string()));
        table.row(&record)?;
    }
    table.finish()
}

fn pca_scores_table(dir: &Path, summary: &StructureSummary) -> Result<PathBuf, ReportError> {
    let mut table = TableWriter::create(dir, "pca_scores.tsv")?;
    table.row(["source", "quality", "PC1", "PC2"])?;
    for row in &summary.projections {
        table.row([
            row.source.name().to_string(),
            row.quality.to_string(),
            row.pc1.to_string(),
            row.pc2.to_string(),
        ])?;
    }
    table.finish()
}

fn color_file(color: WineColor, suffix: &str) -> String {
    format!("{}_{}.tsv", color.name(), suffix)
}

/// Writes every table the report holds into `dir` and returns the written paths.
pub fn write_tables(dir: &Path, report: &PipelineReport) -> Result<Vec<PathBuf>, ReportError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for analysis in &report.colors {
        let color = analysis.color;
        if let Some(paths) = &analysis.subset_paths {
            written.push(subset_metrics_table(
                dir,
                &color_file(color, "subset_metrics"),
                paths,
            )?);
            written.push(membership_table(dir, &color_file(color, "membership"), paths)?);
        }
        if let Some(resampling) = &analysis.resampling {
            written.push(resampling_table(
                dir,
                &color_file(color, "resampling_mse"),
                resampling,
            )?);
        }
        for penalized in &analysis.penalized {
            let suffix = format!("{}_path", penalized.penalty.name());
            written.push(penalty_path_table(
                dir,
                &color_file(color, &suffix),
                &penalized.resampled.feature_names,
                penalized,
            )?);
        }
    }
    if let Some(structure) = &report.structure {
        written.push(pca_scores_table(dir, structure)?);
    }
    if let Some(pcr) = &report.component_regression {
        written.push(resampling_table(dir, "pcr_resampling_mse.tsv", &pcr.resampling)?);
    }
    for path in &written {
        log::info!("Wrote {}", path.display());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_fixtures::sparse_signal_table;
    use crate::regress::{ResamplingConfig, evaluate_subsets, run_all_strategies};
    use tempfile::tempdir;

    fn small_report() -> PipelineReport {
        let table = sparse_signal_table(60, 3);
        let paths = run_all_strategies(&table, None).unwrap();
        let resampling = evaluate_subsets(
            &table,
            &ResamplingConfig {
                trials: 2,
                seed: Some(1),
            },
        )
        .unwrap();
        PipelineReport {
            colors: vec![ColorAnalysis {
                color: WineColor::Red,
                rows: 60,
                dropped: 0,
                subset_paths: Some(paths),
                resampling: Some(resampling),
                penalized: Vec::new(),
            }],
            structure: None,
            component_regression: None,
        }
    }

    #[test]
    fn text_report_lists_membership_and_errors() {
        let report = small_report();
        let mut buffer = Vec::new();
        render_text(&mut buffer, &report).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("== red wine: 60 rows (0 removed as outliers) =="));
        assert!(text.contains("exhaustive selection"));
        assert!(text.contains("backward selection"));
        assert!(text.contains("lowest mean test error for forward"));
        assert!(text.contains(" x11"));
    }

    #[test]
    fn tables_are_tab_separated() {
        let report = small_report();
        let dir = tempdir().unwrap();
        let written = write_tables(dir.path(), &report).unwrap();
        assert_eq!(written.len(), 3);

        let metrics = fs::read_to_string(dir.path().join("red_subset_metrics.tsv")).unwrap();
        let mut lines = metrics.lines();
        assert_eq!(lines.next(), Some("strategy\tsize\tmetric\tvalue\tmembers"));
        assert_eq!(metrics.lines().count(), 1 + 3 * 11 * 5);

        let membership = fs::read_to_string(dir.path().join("red_membership.tsv")).unwrap();
        let last = membership.lines().last().unwrap();
        assert!(last.starts_with("backward\t11\t1\t1"));

        let mse = fs::read_to_string(dir.path().join("red_resampling_mse.tsv")).unwrap();
        assert_eq!(mse.lines().count(), 1 + 2 * 3 * 11 * 2);
    }
}
