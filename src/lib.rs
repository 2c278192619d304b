//! Downloads daily precipitation and temperature series from Open-Meteo and
//! stores them as CSV or XLSX input files for a rainfall-runoff model.

pub mod cli;
pub mod constants;
pub mod error;
pub mod models;
pub mod output;
pub mod poller;
pub mod retention;
pub mod service;

pub use error::{HydrometError, Result};
pub use models::{ForecastModel, ForecastPoint, ForecastRow, ForecastWindow, HistoryRange};
pub use poller::{ForecastSource, Iterations, PollSummary, Poller, PollerConfig};
pub use service::OpenMeteoClient;
