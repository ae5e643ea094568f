//! Sweep result parsing and optimum selection
//!
//! HPL-AI prints one line per finished configuration:
//!
//! ```text
//! HPL_AI  WR01L2L4  141000  128  2  2  25.05  7.461e+04  6.89523  2  5.851e+04
//! ```
//!
//! The marker and a run identifier are followed by N, NB, P, Q, time, Gflops,
//! refinement residual, iterations and Gflops with refinement.

use super::types::{OptimalConfiguration, SweepResultRow};
use crate::error::{IoResultExt, Result, TuneError};
use std::path::{Path, PathBuf};

/// First token of every result line
pub const RESULT_MARKER: &str = "HPL_AI";

/// Header of the persisted sweep CSV
pub const CSV_HEADER: [&str; 9] = [
    "ProblemSize",
    "NB",
    "P",
    "Q",
    "Time",
    "Gflops",
    "Refine",
    "Iter",
    "Gflops_wrefinement",
];

const LOG_FIELDS: usize = 11;

/// Result rows of a raw benchmark log
///
/// Marker lines with the wrong field count or a non-numeric column are
/// skipped with a warning; the remaining rows are still returned.
pub fn parse_sweep_log(raw: &str) -> Vec<SweepResultRow> {
    raw.lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.first() != Some(&RESULT_MARKER) {
                return None;
            }
            if fields.len() != LOG_FIELDS {
                tracing::warn!(
                    line = idx + 1,
                    "skipping result line with {} fields, expected {}",
                    fields.len(),
                    LOG_FIELDS
                );
                return None;
            }
            parse_columns(&fields[2..])
                .map_err(|e| tracing::warn!(line = idx + 1, "skipping result line: {}", e))
                .ok()
        })
        .collect()
}

/// Rows of a sweep CSV; the header line is optional
pub fn parse_sweep_csv(raw: &str) -> Vec<SweepResultRow> {
    raw.lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty() && !line.starts_with(CSV_HEADER[0]))
        .filter_map(|(idx, line)| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != CSV_HEADER.len() {
                tracing::warn!(line = idx + 1, "skipping CSV row with {} columns", fields.len());
                return None;
            }
            parse_columns(&fields)
                .map_err(|e| tracing::warn!(line = idx + 1, "skipping CSV row: {}", e))
                .ok()
        })
        .collect()
}

fn parse_columns(cols: &[&str]) -> Result<SweepResultRow> {
    fn num<T: std::str::FromStr>(cols: &[&str], idx: usize) -> Result<T> {
        let col = cols.get(idx).copied().unwrap_or_default();
        col.parse().map_err(|_| {
            TuneError::Parse(format!("column {} is not numeric: '{}'", CSV_HEADER[idx], col))
        })
    }

    // `f64` parsing accepts `nan` and `inf`, which a failed run prints
    fn metric(cols: &[&str], idx: usize) -> Result<f64> {
        let value: f64 = num(cols, idx)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(TuneError::Parse(format!(
                "column {} is not finite: '{}'",
                CSV_HEADER[idx], value
            )))
        }
    }

    Ok(SweepResultRow {
        problem_size: num(cols, 0)?,
        block_size: num(cols, 1)?,
        p: num(cols, 2)?,
        q: num(cols, 3)?,
        elapsed_seconds: metric(cols, 4)?,
        gflops: metric(cols, 5)?,
        refinement_residual: metric(cols, 6)?,
        iterations: num(cols, 7)?,
        gflops_with_refinement: metric(cols, 8)?,
    })
}

/// Row with the highest Gflops; the first one wins a tie and rows without a
/// finite Gflops value are never chosen
pub fn select_optimal(rows: &[SweepResultRow]) -> Result<SweepResultRow> {
    let mut best: Option<&SweepResultRow> = None;
    for row in rows.iter().filter(|r| r.gflops.is_finite()) {
        match best {
            Some(b) if !(row.gflops > b.gflops) => {}
            _ => best = Some(row),
        }
    }
    best.cloned()
        .ok_or_else(|| TuneError::NoData("sweep produced no result rows".into()))
}

/// Write rows as CSV, replacing any existing file
pub async fn write_sweep_csv(rows: &[SweepResultRow], path: &Path) -> Result<()> {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            row.problem_size,
            row.block_size,
            row.p,
            row.q,
            row.elapsed_seconds,
            row.gflops,
            row.refinement_residual,
            row.iterations,
            row.gflops_with_refinement
        ));
    }
    tokio::fs::write(path, out).await.with_path(path)
}

/// Reads a finished sweep, persists it and picks the optimum
#[derive(Debug, Clone)]
pub struct ResultSelector {
    csv_path: PathBuf,
}

impl ResultSelector {
    /// Create a selector persisting rows to `csv_path`
    pub fn new(csv_path: impl Into<PathBuf>) -> Self {
        Self {
            csv_path: csv_path.into(),
        }
    }

    /// Parse a raw log, falling back to the CSV format when it has no marker lines
    pub fn parse(&self, raw: &str) -> Vec<SweepResultRow> {
        let rows = parse_sweep_log(raw);
        if rows.is_empty() {
            parse_sweep_csv(raw)
        } else {
            rows
        }
    }

    /// Read `log_path`, write the CSV and return the best configuration
    pub async fn select_from_file(&self, log_path: &Path) -> Result<OptimalConfiguration> {
        let raw = tokio::fs::read_to_string(log_path)
            .await
            .with_path(log_path)?;
        let rows = self.parse(&raw);
        tracing::info!(rows = rows.len(), log = %log_path.display(), "parsed sweep results");

        if !rows.is_empty() {
            write_sweep_csv(&rows, &self.csv_path).await?;
            tracing::info!(csv = %self.csv_path.display(), "sweep results written");
        }

        let best = select_optimal(&rows)
            .map_err(|e| e.with_context(format!("reading {}", log_path.display())))?;
        tracing::info!(
            n = best.problem_size,
            nb = best.block_size,
            p = best.p,
            q = best.q,
            gflops = best.gflops,
            "optimal configuration"
        );
        Ok(OptimalConfiguration::from_row(best))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "================================================================================
HPL-AI 1.0.0 -- High-Performance Linpack benchmark for AI
HPL_AI WRC01 1 1 1 1 0.001 10.0 1 1 9.5
\tHPL_AI WRC01 2 2 2 2 0.002 20.0 1 1 19.0
HPL_AI WRC01 3 3 3 3 0.003 30.0 1
Finished      2 tests
";

    fn row(gflops: f64, nb: u32) -> SweepResultRow {
        SweepResultRow {
            problem_size: 141000,
            block_size: nb,
            p: 2,
            q: 2,
            elapsed_seconds: 25.05,
            gflops,
            refinement_residual: 6.9,
            iterations: 2,
            gflops_with_refinement: gflops * 0.8,
        }
    }

    #[test]
    fn test_parse_log_column_order() {
        let rows = parse_sweep_log(LOG);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1],
            SweepResultRow {
                problem_size: 2,
                block_size: 2,
                p: 2,
                q: 2,
                elapsed_seconds: 0.002,
                gflops: 20.0,
                refinement_residual: 1.0,
                iterations: 1,
                gflops_with_refinement: 19.0,
            }
        );
    }

    #[test]
    fn test_parse_log_skips_non_numeric_rows() {
        let raw = "HPL_AI WRC01 141000 128 2 2 25.05 7.461e+04 6.89523 2 5.851e+04\n\
                   HPL_AI WRC01 141000 abc 2 2 26.48 7.057e+04 6.98278 2 5.584e+04\n";
        let rows = parse_sweep_log(raw);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].gflops, 7.461e4);
    }

    #[test]
    fn test_failed_run_rows_are_skipped() {
        let raw = "HPL_AI WRC01 3000 64 2 2 1.0 nan 1 1 nan\n\
                   HPL_AI WRC01 3000 128 2 2 25.05 7.461e+04 6.89523 2 5.851e+04\n\
                   HPL_AI WRC01 3000 224 2 2 inf 7.9e+04 6.9 2 5.9e+04\n";
        let rows = parse_sweep_log(raw);
        assert_eq!(rows.len(), 1);

        let best = select_optimal(&rows).unwrap();
        assert_eq!(best.block_size, 128);
        assert_eq!(best.gflops, 7.461e4);
    }

    #[test]
    fn test_select_optimal_ignores_non_finite_gflops() {
        let rows = vec![row(f64::NAN, 64), row(7.0e4, 128), row(f64::INFINITY, 224)];
        assert_eq!(select_optimal(&rows).unwrap().block_size, 128);

        assert!(matches!(
            select_optimal(&[row(f64::NAN, 64)]),
            Err(TuneError::NoData(_))
        ));
    }

    #[test]
    fn test_parse_csv_with_and_without_header() {
        let body = "141000,128,2,2,25.05,7.461e+04,6.89523,2,5.851e+04
\t141000,224,2,2,26.48,7.057e+04,6.98278,2,5.584e+04
\t141000,256,2,2,29.61,6.312e+04,6.92718,2,5.115e+04";
        assert_eq!(parse_sweep_csv(body).len(), 3);

        let with_header = format!("{}\n{}", CSV_HEADER.join(","), body);
        assert_eq!(parse_sweep_csv(&with_header).len(), 3);
    }

    #[test]
    fn test_select_optimal_first_row() {
        let rows = vec![row(7.461e4, 128), row(7.057e4, 224), row(6.312e4, 256)];
        assert_eq!(select_optimal(&rows).unwrap().block_size, 128);
    }

    #[test]
    fn test_select_optimal_tie_keeps_first() {
        let rows = vec![row(5.0e4, 64), row(8.0e4, 384), row(8.0e4, 512)];
        assert_eq!(select_optimal(&rows).unwrap().block_size, 384);
    }

    #[test]
    fn test_select_optimal_empty() {
        assert!(matches!(select_optimal(&[]), Err(TuneError::NoData(_))));
    }

    #[tokio::test]
    async fn test_csv_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("benchmark.csv");
        let rows = vec![row(7.461e4, 128), row(7.057e4, 224)];

        write_sweep_csv(&rows, &csv).await.unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        assert!(text.starts_with("ProblemSize,NB,P,Q,Time,Gflops,Refine,Iter,Gflops_wrefinement\n"));
        assert_eq!(parse_sweep_csv(&text), rows);
    }

    #[tokio::test]
    async fn test_selector_from_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("benchmark-42.log");
        std::fs::write(&log, LOG).unwrap();

        let selector = ResultSelector::new(dir.path().join("benchmark.csv"));
        let best = selector.select_from_file(&log).await.unwrap();
        assert_eq!(best.row.problem_size, 2);
        assert_eq!((best.grid.p, best.grid.q), (2, 2));
        assert!(dir.path().join("benchmark.csv").exists());
    }

    #[tokio::test]
    async fn test_selector_missing_or_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let selector = ResultSelector::new(dir.path().join("benchmark.csv"));

        let err = selector
            .select_from_file(&dir.path().join("missing.log"))
            .await
            .unwrap_err();
        assert!(matches!(err, TuneError::Io { .. }));

        let empty = dir.path().join("empty.log");
        std::fs::write(&empty, "srun: error: node failure\n").unwrap();
        let err = selector.select_from_file(&empty).await.unwrap_err();
        assert!(matches!(err.root(), TuneError::NoData(_)));
    }
}
