use chrono::{Days, NaiveDate};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::constants::{MAX_FORECAST_DAYS, MIN_HISTORY_DAYS};
use crate::error::{HydrometError, Result};

// ============================================================================
// Open-Meteo API Models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenMeteoResponse {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub daily: Option<DailyData>,
}

/// Daily block of an Open-Meteo response. Every variable is optional so a
/// missing key can be reported by name instead of as a decode failure.
#[derive(Debug, Default, Deserialize)]
pub struct DailyData {
    pub time: Option<Vec<String>>,
    #[serde(rename = "precipitation_sum")]
    pub precipitation_sum: Option<Vec<Option<f64>>>,
    #[serde(rename = "temperature_2m_max")]
    pub temperature_max: Option<Vec<Option<f64>>>,
    #[serde(rename = "temperature_2m_min")]
    pub temperature_min: Option<Vec<Option<f64>>>,
}

/// Error body Open-Meteo sends with 4xx responses
#[derive(Debug, Deserialize)]
pub struct OpenMeteoErrorBody {
    pub reason: String,
}

impl DailyData {
    /// Flattens the column-oriented daily block into one row per date.
    ///
    /// With `with_mean` set, each row also carries the mean of the max and
    /// min temperatures. Dates must be strictly increasing.
    pub fn into_rows(self, with_mean: bool) -> Result<Vec<ForecastRow>> {
        let mut missing = Vec::new();
        if self.time.is_none() {
            missing.push("time");
        }
        if self.precipitation_sum.is_none() {
            missing.push("precipitation_sum");
        }
        if self.temperature_max.is_none() {
            missing.push("temperature_2m_max");
        }
        if self.temperature_min.is_none() {
            missing.push("temperature_2m_min");
        }

        let (Some(time), Some(precipitation), Some(temp_max), Some(temp_min)) = (
            self.time,
            self.precipitation_sum,
            self.temperature_max,
            self.temperature_min,
        ) else {
            missing.sort_unstable();
            return Err(HydrometError::api(format!(
                "daily block is missing required keys: {}",
                missing.join(", ")
            )));
        };

        let len = time.len();
        if precipitation.len() != len || temp_max.len() != len || temp_min.len() != len {
            return Err(HydrometError::api(format!(
                "daily arrays differ in length (time={}, precipitation_sum={}, temperature_2m_max={}, temperature_2m_min={})",
                len,
                precipitation.len(),
                temp_max.len(),
                temp_min.len()
            )));
        }

        let mut rows: Vec<ForecastRow> = Vec::with_capacity(len);
        for (((day, precipitation_mm), temp_max_c), temp_min_c) in time
            .iter()
            .zip(precipitation)
            .zip(temp_max)
            .zip(temp_min)
        {
            let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .map_err(|e| HydrometError::api(format!("unparseable date '{day}': {e}")))?;

            if let Some(previous) = rows.last() {
                if previous.date >= date {
                    return Err(HydrometError::api(format!(
                        "dates are not strictly increasing: {} followed by {}",
                        previous.date, date
                    )));
                }
            }

            rows.push(ForecastRow {
                date,
                precipitation_mm,
                temp_max_c,
                temp_min_c,
                temp_mean_c: if with_mean {
                    mean_temperature(temp_max_c, temp_min_c)
                } else {
                    None
                },
            });
        }

        Ok(rows)
    }
}

/// Mean of max and min, skipping whichever side is absent
fn mean_temperature(max: Option<f64>, min: Option<f64>) -> Option<f64> {
    match (max, min) {
        (Some(max), Some(min)) => Some((max + min) / 2.0),
        (Some(value), None) | (None, Some(value)) => Some(value),
        (None, None) => None,
    }
}

// ============================================================================
// Domain Models
// ============================================================================

/// A geographic query location, optionally named
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

impl ForecastPoint {
    pub fn new(latitude: f64, longitude: f64, name: Option<String>) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(HydrometError::invalid(format!(
                "latitude {latitude} is outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(HydrometError::invalid(format!(
                "longitude {longitude} is outside [-180, 180]"
            )));
        }

        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(Self {
            latitude,
            longitude,
            name,
        })
    }

    /// Identifier used in output file names
    pub fn id(&self) -> String {
        match &self.name {
            Some(name) => sanitize_id(name),
            None => format!("{}_{}", self.latitude, self.longitude),
        }
    }
}

impl fmt::Display for ForecastPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({:.4}, {:.4})", name, self.latitude, self.longitude),
            None => write!(f, "({:.4}, {:.4})", self.latitude, self.longitude),
        }
    }
}

fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One day of precipitation and temperature values
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    pub date: NaiveDate,
    pub precipitation_mm: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub temp_min_c: Option<f64>,
    pub temp_mean_c: Option<f64>,
}

// ============================================================================
// Request Models
// ============================================================================

/// Open-Meteo endpoint serving the forecast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ForecastModel {
    /// ECMWF open data (`/ecmwf`)
    #[default]
    Ecmwf,
    /// Open-Meteo best-match blend (`/forecast`)
    BestMatch,
}

impl ForecastModel {
    pub fn endpoint(self) -> &'static str {
        match self {
            ForecastModel::Ecmwf => "ecmwf",
            ForecastModel::BestMatch => "forecast",
        }
    }
}

/// Forecast horizon starting at `start_date`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastWindow {
    pub start_date: NaiveDate,
    pub days: u32,
    pub model: ForecastModel,
}

impl ForecastWindow {
    pub fn new(start_date: NaiveDate, days: u32, model: ForecastModel) -> Result<Self> {
        if !(1..=MAX_FORECAST_DAYS).contains(&days) {
            return Err(HydrometError::invalid(format!(
                "forecast horizon must be between 1 and {MAX_FORECAST_DAYS} days, got {days}"
            )));
        }
        if start_date.checked_add_days(Days::new(u64::from(days))).is_none() {
            return Err(HydrometError::invalid(format!(
                "forecast window starting {start_date} overflows the calendar"
            )));
        }
        Ok(Self {
            start_date,
            days,
            model,
        })
    }

    /// Last requested date, inclusive
    pub fn end_date(&self) -> NaiveDate {
        self.start_date + Days::new(u64::from(self.days - 1))
    }
}

/// Inclusive historical date range
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timezone: String,
}

impl HistoryRange {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, timezone: impl Into<String>) -> Result<Self> {
        if start_date > end_date {
            return Err(HydrometError::invalid(format!(
                "start date {start_date} is after end date {end_date}"
            )));
        }

        let range = Self {
            start_date,
            end_date,
            timezone: timezone.into(),
        };
        let days = range.days();
        if days < MIN_HISTORY_DAYS {
            return Err(HydrometError::invalid(format!(
                "the range must cover at least {MIN_HISTORY_DAYS} days, it only covers {days}"
            )));
        }
        Ok(range)
    }

    /// Number of calendar days covered, both ends included
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

// ============================================================================
// Points File
// ============================================================================

#[derive(Debug, Deserialize)]
struct PointRecord {
    #[serde(default, alias = "id")]
    name: Option<String>,
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "longitude")]
    lon: f64,
}

/// Reads a `name,lat,lon` CSV into points, rejecting duplicate identifiers
pub fn load_points(path: &Path) -> Result<Vec<ForecastPoint>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| HydrometError::file_system(path, e))?;

    let mut points = Vec::new();
    let mut seen = HashSet::new();
    for (index, record) in reader.deserialize::<PointRecord>().enumerate() {
        let record = record.map_err(|e| {
            HydrometError::invalid(format!(
                "{} line {}: {}",
                path.display(),
                index + 2,
                e
            ))
        })?;
        let point = ForecastPoint::new(record.lat, record.lon, record.name)?;
        if !seen.insert(point.id()) {
            return Err(HydrometError::invalid(format!(
                "duplicate point identifier '{}' in {}",
                point.id(),
                path.display()
            )));
        }
        points.push(point);
    }

    if points.is_empty() {
        return Err(HydrometError::invalid(format!(
            "points file {} contains no points",
            path.display()
        )));
    }

    Ok(points)
}
