//! Fetch, write and prune on a fixed interval
//!
//! Points are handled one after another inside a cycle and cycles never
//! overlap. The only state kept between cycles is the retention ledger.

use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{HydrometError, Result};
use crate::models::{ForecastModel, ForecastPoint, ForecastRow, ForecastWindow};
use crate::output::{write_rows, ColumnLayout};
use crate::retention::{next_output_path, RetentionLedger};
use crate::service::OpenMeteoClient;

/// Anything able to produce daily forecast rows for a point
#[allow(async_fn_in_trait)]
pub trait ForecastSource {
    async fn fetch(&self, point: &ForecastPoint, window: &ForecastWindow) -> Result<Vec<ForecastRow>>;
}

impl ForecastSource for OpenMeteoClient {
    async fn fetch(&self, point: &ForecastPoint, window: &ForecastWindow) -> Result<Vec<ForecastRow>> {
        self.fetch_forecast(point, window).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Bounded(u64),
    Continuous,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub output_dir: PathBuf,
    pub days: u32,
    pub model: ForecastModel,
    /// Fixed first forecast day; today (UTC) at each cycle when unset
    pub start_date: Option<NaiveDate>,
    pub interval: Duration,
    pub iterations: Iterations,
    /// Number of newest files kept per point; no pruning when unset
    pub keep_last: Option<usize>,
    /// Log and skip failures instead of aborting the run
    pub keep_going: bool,
}

impl PollerConfig {
    fn validate(&self) -> Result<()> {
        ForecastWindow::new(Utc::now().date_naive(), self.days, self.model)?;
        if self.iterations == Iterations::Bounded(0) {
            return Err(HydrometError::invalid("iteration count must be at least 1"));
        }
        if self.keep_last == Some(0) {
            return Err(HydrometError::invalid("keep-last must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub cycles: u64,
    pub files_written: usize,
    pub files_removed: usize,
    pub failures: usize,
}

pub struct Poller<S> {
    source: S,
    points: Vec<ForecastPoint>,
    config: PollerConfig,
    ledger: RetentionLedger,
}

impl<S: ForecastSource> Poller<S> {
    pub fn new(source: S, points: Vec<ForecastPoint>, config: PollerConfig) -> Result<Self> {
        config.validate()?;
        if points.is_empty() {
            return Err(HydrometError::invalid("at least one point is required"));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = points.iter().map(ForecastPoint::id).find(|id| !seen.insert(id.clone())) {
            return Err(HydrometError::invalid(format!(
                "duplicate point identifier '{duplicate}'"
            )));
        }

        Ok(Self {
            source,
            points,
            config,
            ledger: RetentionLedger::new(),
        })
    }

    pub fn ledger(&self) -> &RetentionLedger {
        &self.ledger
    }

    /// Runs cycles until the iteration count is reached or `shutdown` turns
    /// true. An interrupt never cuts a cycle short.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<PollSummary> {
        if self.config.keep_last.is_some() {
            for point in &self.points {
                self.ledger.scan(&self.config.output_dir, &point.id())?;
            }
        }

        let mut summary = PollSummary::default();
        loop {
            summary.cycles += 1;
            self.run_cycle(summary.cycles, &mut summary).await?;

            if let Iterations::Bounded(total) = self.config.iterations {
                if summary.cycles >= total {
                    break;
                }
            }
            if *shutdown.borrow() {
                tracing::info!(cycles = summary.cycles, "Interrupt received, stopping");
                break;
            }

            tracing::debug!(interval_secs = self.config.interval.as_secs(), "Sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = interrupted(&mut shutdown) => {
                    tracing::info!(cycles = summary.cycles, "Interrupt received while sleeping, stopping");
                    break;
                }
            }
        }

        tracing::info!(
            cycles = summary.cycles,
            written = summary.files_written,
            removed = summary.files_removed,
            failures = summary.failures,
            "Polling finished"
        );
        Ok(summary)
    }

    async fn run_cycle(&mut self, cycle: u64, summary: &mut PollSummary) -> Result<()> {
        let start_date = self
            .config
            .start_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let window = ForecastWindow::new(start_date, self.config.days, self.config.model)?;
        tracing::info!(cycle, start = %start_date, points = self.points.len(), "Starting cycle");

        for point in &self.points {
            match self.fetch_and_write(point, &window).await {
                Ok(path) => {
                    if self.config.keep_last.is_some() {
                        self.ledger.record(&point.id(), path);
                    }
                    summary.files_written += 1;
                }
                Err(e) if self.config.keep_going => {
                    tracing::warn!(cycle, point = %point, error = %e, "Cycle step failed, continuing");
                    summary.failures += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(keep) = self.config.keep_last {
            for point in &self.points {
                match self.ledger.prune(&point.id(), keep) {
                    Ok(removed) => summary.files_removed += removed.len(),
                    Err(e) if self.config.keep_going => {
                        tracing::warn!(cycle, point = %point, error = %e, "Pruning failed, continuing");
                        summary.failures += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    async fn fetch_and_write(&self, point: &ForecastPoint, window: &ForecastWindow) -> Result<PathBuf> {
        let rows = self.source.fetch(point, window).await?;
        let path = next_output_path(&self.config.output_dir, &point.id(), Utc::now());
        write_rows(&rows, &path, ColumnLayout::Forecast)?;
        Ok(path)
    }
}

/// Resolves once `shutdown` turns true; never resolves if the sender is gone
async fn interrupted(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
