use crate::{
    chart::render_boxplot,
    sample::{DdlMode, RunResult},
    stats::{group_by_query, Summary},
    ReportError,
};
use std::{fs, path::PathBuf};
use tracing::{error, info, instrument};

/// Turns finished runs into logged statistics and a latency chart
#[derive(Debug, Clone)]
pub struct Reporter {
    output_dir: PathBuf,
}

impl Reporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// artifact location for a (pool size, ddl mode) combination
    pub fn chart_path(&self, num_databases: usize, mode: DdlMode) -> PathBuf {
        self.output_dir.join(format!(
            "latency_distribution_{num_databases}_dbs_{}.pdf",
            mode.as_str()
        ))
    }

    /// Log statistics and render the chart for a run, never fails
    ///
    /// Returns the chart location if one was written.
    pub fn report(&self, result: &RunResult) -> Option<PathBuf> {
        match self.create_latency_plot(result) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(
                    num_databases = result.num_databases,
                    mode = %result.ddl_mode,
                    "Failed to create latency plot: {e}"
                );

                None
            }
        }
    }

    #[instrument(skip_all, fields(num_databases = result.num_databases, mode = %result.ddl_mode))]
    pub fn create_latency_plot(&self, result: &RunResult) -> Result<PathBuf, ReportError> {
        if result.is_empty() {
            return Err(ReportError::EmptyRun);
        }

        let groups = group_by_query(result.samples());

        for (query_num, durations) in groups.iter() {
            if let Some(summary) = Summary::describe(durations) {
                info!(
                    "\nDetailed Statistics (Query {}):\n-------------------\n{summary}",
                    query_num + 1
                );
            }
        }

        let title = match result.ddl_mode {
            DdlMode::Fixed => "Query Latency Distribution After DDL on Different Database",
            DdlMode::Local => "Query Latency Distribution After DDL on Same Database",
        };
        let subtitle = format!(
            "({} iterations, uniformly choosing between {} databases)",
            result.len() / groups.len(),
            result.num_databases
        );

        fs::create_dir_all(&self.output_dir)?;
        let path = self.chart_path(result.num_databases, result.ddl_mode);
        render_boxplot(&path, title, &subtitle, &groups)?;

        info!("Created latency distribution plot: {}", path.display());

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::TimingSample;
    use chrono::Utc;

    fn run(mode: DdlMode, iterations: usize, queries: usize) -> RunResult {
        let mut result = RunResult::new(10, mode);

        for iteration in 0..iterations {
            result.push_iteration(
                (0..queries)
                    .map(|query_num| TimingSample {
                        iteration,
                        database: format!("test_database_{}", iteration % 10 + 1),
                        is_fixed_ddl: mode.is_fixed(),
                        table: format!("table_{iteration}"),
                        duration_ms: (iteration * queries + query_num) as f64 * 0.5,
                        timestamp: Utc::now(),
                        query_num,
                    })
                    .collect(),
            );
        }

        result
    }

    #[test]
    pub fn chart_named_by_pool_and_mode() {
        let reporter = Reporter::new("out");

        assert_eq!(
            reporter.chart_path(100, DdlMode::Fixed),
            PathBuf::from("out/latency_distribution_100_dbs_fixed_ddl.pdf")
        );
        assert_eq!(
            reporter.chart_path(1, DdlMode::Local),
            PathBuf::from("out/latency_distribution_1_dbs_local_ddl.pdf")
        );
    }

    #[test]
    pub fn writes_chart_for_run() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new(dir.path());

        let path = reporter.report(&run(DdlMode::Local, 20, 3)).unwrap();

        assert_eq!(path, reporter.chart_path(10, DdlMode::Local));
        let document = std::fs::read(path).unwrap();
        assert!(document.starts_with(b"%PDF"));
    }

    #[test]
    pub fn empty_run_is_logged_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new(dir.path());

        assert!(reporter.report(&run(DdlMode::Fixed, 0, 3)).is_none());
        assert!(!reporter.chart_path(10, DdlMode::Fixed).exists());
    }
}
