//! Command-line surface of `hydromet-fetch`

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

use crate::constants::{
    DEFAULT_FORECAST_DAYS, DEFAULT_HISTORY_TIMEZONE, DEFAULT_TIMEOUT_SECS, MAX_FORECAST_DAYS,
    OPEN_METEO_API_BASE,
};
use crate::error::HydrometError;
use crate::models::{load_points, ForecastModel, ForecastPoint, HistoryRange};
use crate::output::{write_rows, ColumnLayout};
use crate::poller::{Iterations, Poller, PollerConfig};
use crate::service::OpenMeteoClient;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Download daily precipitation and temperature from Open-Meteo as model input files"
)]
pub struct Cli {
    /// Open-Meteo API base URL
    #[arg(long, global = true, env = "OPEN_METEO_BASE_URL", default_value = OPEN_METEO_API_BASE)]
    pub base_url: String,

    /// HTTP timeout in seconds
    #[arg(long, global = true, env = "OPEN_METEO_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a daily forecast per point, optionally on a schedule
    Forecast(ForecastArgs),
    /// Download an inclusive historical range of at least 10 days
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub struct ForecastArgs {
    /// Latitude in decimal degrees
    #[arg(value_name = "LAT", allow_negative_numbers = true, requires = "lon_pos")]
    pub lat_pos: Option<f64>,

    /// Longitude in decimal degrees
    #[arg(value_name = "LON", allow_negative_numbers = true)]
    pub lon_pos: Option<f64>,

    /// Latitude in decimal degrees
    #[arg(long = "lat", visible_alias = "latitude", allow_negative_numbers = true, conflicts_with = "lat_pos", requires = "lon")]
    pub lat: Option<f64>,

    /// Longitude in decimal degrees
    #[arg(long = "lon", visible_alias = "longitude", allow_negative_numbers = true, conflicts_with = "lon_pos", requires = "lat")]
    pub lon: Option<f64>,

    /// CSV with name,lat,lon columns, one point per line
    #[arg(long, conflicts_with_all = ["lat_pos", "lat", "point_id"])]
    pub points_file: Option<PathBuf>,

    /// Identifier used in output file names instead of the coordinates
    #[arg(long)]
    pub point_id: Option<String>,

    /// First forecast day (YYYY-MM-DD); today in UTC when omitted
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Number of days to download
    #[arg(
        long,
        default_value_t = DEFAULT_FORECAST_DAYS,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_FORECAST_DAYS))
    )]
    pub forecast_days: u32,

    /// Directory receiving forecast_<point>_<timestamp>.csv files
    #[arg(long, default_value = "data")]
    pub output_dir: PathBuf,

    /// Forecast model endpoint
    #[arg(long, value_enum, default_value_t = ForecastModel::Ecmwf)]
    pub model: ForecastModel,

    /// Seconds to sleep between cycles
    #[arg(long, default_value_t = 3600)]
    pub interval_secs: u64,

    /// Number of download cycles
    #[arg(long, default_value_t = 1, conflicts_with = "continuous")]
    pub iterations: u64,

    /// Repeat until interrupted with Ctrl-C
    #[arg(long)]
    pub continuous: bool,

    /// Keep only the N newest files per point
    #[arg(long, value_name = "N")]
    pub keep_last: Option<usize>,

    /// Log failed downloads and carry on instead of aborting
    #[arg(long)]
    pub keep_going: bool,
}

impl ForecastArgs {
    /// Points to poll, from the points file or the coordinate arguments
    pub fn points(&self) -> crate::error::Result<Vec<ForecastPoint>> {
        if let Some(path) = &self.points_file {
            return load_points(path);
        }

        let coordinates = match (self.lat.or(self.lat_pos), self.lon.or(self.lon_pos)) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(HydrometError::invalid(
                    "coordinates are required: pass LAT LON, --lat/--lon or --points-file",
                ))
            }
        };

        Ok(vec![ForecastPoint::new(
            coordinates.0,
            coordinates.1,
            self.point_id.clone(),
        )?])
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            output_dir: self.output_dir.clone(),
            days: self.forecast_days,
            model: self.model,
            start_date: self.start_date,
            interval: Duration::from_secs(self.interval_secs),
            iterations: if self.continuous {
                Iterations::Continuous
            } else {
                Iterations::Bounded(self.iterations)
            },
            keep_last: self.keep_last,
            keep_going: self.keep_going,
        }
    }
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Latitude in decimal degrees
    #[arg(long = "lat", visible_alias = "latitude", allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in decimal degrees
    #[arg(long = "lon", visible_alias = "longitude", allow_negative_numbers = true)]
    pub lon: f64,

    /// First day (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub start: NaiveDate,

    /// Last day (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub end: NaiveDate,

    /// Timezone of the returned dates
    #[arg(long, default_value = DEFAULT_HISTORY_TIMEZONE)]
    pub timezone: String,

    /// Output file; .xlsx writes a spreadsheet, anything else CSV
    #[arg(long, default_value = "datos_meteo.xlsx")]
    pub out: PathBuf,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let client = OpenMeteoClient::with_base_url(
            &self.base_url,
            Duration::from_secs(self.timeout_secs),
        )
        .context("Failed to build HTTP client")?;

        match self.command {
            Command::Forecast(args) => run_forecast(client, args).await,
            Command::History(args) => run_history(client, args).await,
        }
    }
}

async fn run_forecast(client: OpenMeteoClient, args: ForecastArgs) -> Result<()> {
    let points = args.points().context("Failed to resolve forecast points")?;
    let mut poller = Poller::new(client, points, args.poller_config())
        .context("Invalid polling configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if forward_interrupts(tokio::signal::ctrl_c, shutdown_tx).await {
            tracing::warn!("Second Ctrl-C received, exiting immediately");
            std::process::exit(130);
        }
    });

    let summary = poller
        .run(shutdown_rx)
        .await
        .context("Forecast download failed")?;

    println!(
        "{} file(s) written to {} over {} cycle(s), {} removed",
        summary.files_written,
        args.output_dir.display(),
        summary.cycles,
        summary.files_removed
    );
    Ok(())
}

/// The first interrupt asks the poller to stop after the current cycle.
/// Returns true on a second interrupt, false once signals can no longer be
/// received.
async fn forward_interrupts<S, F>(mut next_signal: S, shutdown: watch::Sender<bool>) -> bool
where
    S: FnMut() -> F,
    F: Future<Output = io::Result<()>>,
{
    if next_signal().await.is_err() {
        return false;
    }
    tracing::info!("Ctrl-C received, finishing the current cycle (press again to exit now)");
    let _ = shutdown.send(true);

    next_signal().await.is_ok()
}

async fn run_history(client: OpenMeteoClient, args: HistoryArgs) -> Result<()> {
    let point = ForecastPoint::new(args.lat, args.lon, None)?;
    let range = HistoryRange::new(args.start, args.end, args.timezone)?;

    let rows = client
        .fetch_history(&point, &range)
        .await
        .context("Historical download failed")?;
    write_rows(&rows, &args.out, ColumnLayout::Historical)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    println!("Data written to {}", args.out.display());
    Ok(())
}
