use reqwest::{Client, Request};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::constants::{DAILY_VARIABLES, USER_AGENT};
use crate::error::{HydrometError, Result};
use crate::models::{
    DailyData, ForecastPoint, ForecastRow, ForecastWindow, HistoryRange, OpenMeteoErrorBody,
    OpenMeteoResponse,
};

/// Read-only client for the Open-Meteo daily endpoints
#[derive(Clone)]
pub struct OpenMeteoClient {
    client: Arc<Client>,
    base_url: String,
}

impl OpenMeteoClient {
    /// Creates a client against another Open-Meteo compatible host
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Builds the GET request for a forecast window
    pub fn forecast_request(&self, point: &ForecastPoint, window: &ForecastWindow) -> Result<Request> {
        let url = format!("{}/{}", self.base_url, window.model.endpoint());
        let request = self
            .client
            .get(url)
            .query(&[
                ("latitude", point.latitude.to_string()),
                ("longitude", point.longitude.to_string()),
                ("daily", DAILY_VARIABLES.to_string()),
                ("start_date", window.start_date.to_string()),
                ("end_date", window.end_date().to_string()),
                ("timezone", "UTC".to_string()),
            ])
            .build()?;
        Ok(request)
    }

    /// Builds the GET request for a historical range
    pub fn history_request(&self, point: &ForecastPoint, range: &HistoryRange) -> Result<Request> {
        let url = format!("{}/forecast", self.base_url);
        let request = self
            .client
            .get(url)
            .query(&[
                ("latitude", point.latitude.to_string()),
                ("longitude", point.longitude.to_string()),
                ("daily", DAILY_VARIABLES.to_string()),
                ("start_date", range.start_date.to_string()),
                ("end_date", range.end_date.to_string()),
                ("timezone", range.timezone.clone()),
            ])
            .build()?;
        Ok(request)
    }

    /// Downloads daily precipitation and max/min temperature for the window
    pub async fn fetch_forecast(
        &self,
        point: &ForecastPoint,
        window: &ForecastWindow,
    ) -> Result<Vec<ForecastRow>> {
        tracing::info!(
            point = %point,
            start = %window.start_date,
            days = window.days,
            model = window.model.endpoint(),
            "Fetching forecast"
        );

        let request = self.forecast_request(point, window)?;
        let rows = self.make_request(request).await?.into_rows(false)?;
        check_coverage(&rows, window.start_date, i64::from(window.days))?;

        tracing::debug!(point = %point, rows = rows.len(), "Forecast received");
        Ok(rows)
    }

    /// Downloads daily precipitation and temperatures for an inclusive range,
    /// mean temperature included
    pub async fn fetch_history(
        &self,
        point: &ForecastPoint,
        range: &HistoryRange,
    ) -> Result<Vec<ForecastRow>> {
        tracing::info!(
            point = %point,
            start = %range.start_date,
            end = %range.end_date,
            timezone = %range.timezone,
            "Fetching historical range"
        );

        let request = self.history_request(point, range)?;
        let rows = self.make_request(request).await?.into_rows(true)?;
        check_coverage(&rows, range.start_date, range.days())?;

        tracing::debug!(point = %point, rows = rows.len(), "Historical range received");
        Ok(rows)
    }

    /// Sends the request and returns the daily block of the JSON response
    async fn make_request(&self, request: Request) -> Result<DailyData> {
        let path = request.url().path().to_string();
        let response = self.client.execute(request).await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(HydrometError::api(format!(
                "request to {} failed with status {}: {}",
                path,
                status,
                error_reason(&body)
            )));
        }

        parse_daily(&body)
    }
}

fn parse_daily(body: &str) -> Result<DailyData> {
    let payload: OpenMeteoResponse = serde_json::from_str(body)
        .map_err(|e| HydrometError::api(format!("malformed JSON response: {e}")))?;

    payload
        .daily
        .ok_or_else(|| HydrometError::api("response has no 'daily' block"))
}

/// The API must answer with exactly `days` rows beginning on `start`
fn check_coverage(rows: &[ForecastRow], start: NaiveDate, days: i64) -> Result<()> {
    if rows.len() as i64 != days {
        return Err(HydrometError::api(format!(
            "expected {days} daily rows from {start}, got {}",
            rows.len()
        )));
    }
    match rows.first() {
        Some(first) if first.date != start => Err(HydrometError::api(format!(
            "expected rows to start on {start}, first row is {}",
            first.date
        ))),
        _ => Ok(()),
    }
}

fn error_reason(body: &str) -> String {
    match serde_json::from_str::<OpenMeteoErrorBody>(body) {
        Ok(error) => error.reason,
        Err(_) => body.chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ForecastModel;
    use std::collections::HashMap;

    fn client() -> OpenMeteoClient {
        OpenMeteoClient::with_base_url("http://localhost:8080/v1/", Duration::from_secs(5)).unwrap()
    }

    fn query(request: &Request) -> HashMap<String, String> {
        request.url().query_pairs().into_owned().collect()
    }

    #[test]
    fn test_forecast_request_spans_horizon() {
        let point = ForecastPoint::new(4.6097, -74.0817, None).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let window = ForecastWindow::new(start, 10, ForecastModel::Ecmwf).unwrap();

        let request = client().forecast_request(&point, &window).unwrap();
        let params = query(&request);

        assert_eq!(request.url().path(), "/v1/ecmwf");
        assert_eq!(params["latitude"], "4.6097");
        assert_eq!(params["longitude"], "-74.0817");
        assert_eq!(params["start_date"], "2024-05-01");
        assert_eq!(params["end_date"], "2024-05-10");
        assert_eq!(params["timezone"], "UTC");
        assert_eq!(params["daily"], DAILY_VARIABLES);
    }

    #[test]
    fn test_forecast_request_best_match_endpoint() {
        let point = ForecastPoint::new(0.0, 0.0, None).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let window = ForecastWindow::new(start, 1, ForecastModel::BestMatch).unwrap();

        let request = client().forecast_request(&point, &window).unwrap();

        assert_eq!(request.url().path(), "/v1/forecast");
        assert_eq!(query(&request)["end_date"], "2024-05-01");
    }

    #[test]
    fn test_history_request_uses_timezone() {
        let point = ForecastPoint::new(-9.0, -75.0, None).unwrap();
        let range = HistoryRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
            "America/Lima",
        )
        .unwrap();

        let request = client().history_request(&point, &range).unwrap();
        let params = query(&request);

        assert_eq!(request.url().path(), "/v1/forecast");
        assert_eq!(params["timezone"], "America/Lima");
        assert_eq!(params["start_date"], "2024-01-01");
        assert_eq!(params["end_date"], "2024-01-20");
    }

    #[test]
    fn test_parse_daily_requires_daily_block() {
        let err = parse_daily(r#"{"latitude": 4.6, "longitude": -74.1}"#).unwrap_err();
        assert!(err.to_string().contains("'daily'"));
    }

    #[test]
    fn test_parse_daily_rejects_garbage() {
        assert!(matches!(
            parse_daily("<html>busy</html>"),
            Err(HydrometError::Api { .. })
        ));
    }

    #[test]
    fn test_parse_daily_ten_day_forecast() {
        let days: Vec<String> = (1..=10).map(|d| format!("\"2024-05-{d:02}\"")).collect();
        let values = vec!["1.5"; 10].join(",");
        let body = format!(
            r#"{{"latitude": 4.6, "longitude": -74.1, "timezone": "GMT",
                "daily": {{"time": [{}], "precipitation_sum": [{values}],
                "temperature_2m_max": [{values}], "temperature_2m_min": [{values}]}}}}"#,
            days.join(",")
        );

        let rows = parse_daily(&body).unwrap().into_rows(false).unwrap();

        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(rows.windows(2).all(|w| w[0].date < w[1].date));
    }

    fn rows_from(start: NaiveDate, days: u64) -> Vec<ForecastRow> {
        (0..days)
            .map(|i| ForecastRow {
                date: start + chrono::Days::new(i),
                precipitation_mm: Some(0.0),
                temp_max_c: Some(20.0),
                temp_min_c: Some(10.0),
                temp_mean_c: None,
            })
            .collect()
    }

    #[test]
    fn test_check_coverage_accepts_full_window() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert!(check_coverage(&rows_from(start, 10), start, 10).is_ok());
    }

    #[test]
    fn test_check_coverage_rejects_short_response() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let err = check_coverage(&rows_from(start, 2), start, 10).unwrap_err();

        assert!(matches!(err, HydrometError::Api { .. }));
        assert!(err.to_string().contains("expected 10 daily rows"));
    }

    #[test]
    fn test_check_coverage_rejects_shifted_response() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let shifted = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();

        let err = check_coverage(&rows_from(shifted, 10), start, 10).unwrap_err();

        assert!(matches!(err, HydrometError::Api { .. }));
        assert!(err.to_string().contains("first row is 2024-05-03"));
    }

    #[test]
    fn test_error_reason_prefers_api_reason() {
        let body = r#"{"error": true, "reason": "Parameter 'start_date' is out of allowed range"}"#;
        assert_eq!(
            error_reason(body),
            "Parameter 'start_date' is out of allowed range"
        );
        assert_eq!(error_reason("Bad Gateway"), "Bad Gateway");
    }
}
