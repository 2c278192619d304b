//! Tabular writers for fetched rows
//!
//! Two column layouts exist: the forecast layout consumed by the polling
//! loop, and the historical layout (with mean temperature) written by the
//! range downloader. The container is CSV unless the path ends in `.xlsx`.

use chrono::NaiveDate;
use rust_xlsxwriter::Workbook;
use std::fs;
use std::path::Path;

use crate::error::{HydrometError, Result};
use crate::models::ForecastRow;

/// Fixed column sets understood by the downstream model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnLayout {
    Forecast,
    Historical,
}

impl ColumnLayout {
    pub fn headers(self) -> &'static [&'static str] {
        match self {
            ColumnLayout::Forecast => &["date", "precipitation_mm", "temp_max_c", "temp_min_c"],
            ColumnLayout::Historical => &[
                "Fecha",
                "precipitacion_mm",
                "temp_max_c",
                "temp_min_c",
                "temp_media_c",
            ],
        }
    }

    fn values(self, row: &ForecastRow) -> Vec<Option<f64>> {
        let mut values = vec![row.precipitation_mm, row.temp_max_c, row.temp_min_c];
        if self == ColumnLayout::Historical {
            values.push(row.temp_mean_c);
        }
        values
    }
}

/// On-disk container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Xlsx,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => OutputFormat::Xlsx,
            _ => OutputFormat::Csv,
        }
    }
}

/// Writes `rows` to `path`, replacing any existing file. Returns the number
/// of data rows written.
pub fn write_rows(rows: &[ForecastRow], path: &Path, layout: ColumnLayout) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| HydrometError::file_system(parent, e))?;
    }

    let format = OutputFormat::from_path(path);
    tracing::info!(path = %path.display(), rows = rows.len(), ?format, "Writing output file");

    match format {
        OutputFormat::Csv => {
            write_csv(rows, path, layout).map_err(|e| HydrometError::file_system(path, e))?
        }
        OutputFormat::Xlsx => {
            write_xlsx(rows, path, layout).map_err(|e| HydrometError::file_system(path, e))?
        }
    }

    Ok(rows.len())
}

fn write_csv(rows: &[ForecastRow], path: &Path, layout: ColumnLayout) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(layout.headers())?;

    for row in rows {
        let mut record = vec![format_date(row.date)];
        record.extend(layout.values(row).into_iter().map(format_value));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

fn write_xlsx(
    rows: &[ForecastRow],
    path: &Path,
    layout: ColumnLayout,
) -> std::result::Result<(), rust_xlsxwriter::XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, header) in layout.headers().iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (index, row) in rows.iter().enumerate() {
        let excel_row = index as u32 + 1;
        worksheet.write_string(excel_row, 0, format_date(row.date))?;
        for (offset, value) in layout.values(row).into_iter().enumerate() {
            // Absent values stay as blank cells
            if let Some(value) = value {
                worksheet.write_number(excel_row, offset as u16 + 1, value)?;
            }
        }
    }

    workbook.save(path)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Shortest representation that parses back to the same `f64`
fn format_value(value: Option<f64>) -> String {
    value.map_or(String::new(), |v| v.to_string())
}

/// Reads a CSV written by [`write_rows`] back into rows. The layout is
/// recognised from the header line.
pub fn read_csv(path: &Path) -> Result<Vec<ForecastRow>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| HydrometError::file_system(path, e))?;

    let headers = reader
        .headers()
        .map_err(|e| HydrometError::file_system(path, e))?
        .clone();
    let layout = [ColumnLayout::Forecast, ColumnLayout::Historical]
        .into_iter()
        .find(|layout| headers.iter().eq(layout.headers().iter().copied()))
        .ok_or_else(|| {
            HydrometError::file_system(path, format!("unrecognised header: {headers:?}"))
        })?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| HydrometError::file_system(path, e))?;
        let parse_err = |e: &dyn std::fmt::Display| HydrometError::file_system(path, e.to_string());

        let date = NaiveDate::parse_from_str(&record[0], "%Y-%m-%d").map_err(|e| parse_err(&e))?;
        let mut values = Vec::with_capacity(4);
        for field in record.iter().skip(1) {
            let value = if field.is_empty() {
                None
            } else {
                Some(field.parse::<f64>().map_err(|e| parse_err(&e))?)
            };
            values.push(value);
        }

        rows.push(ForecastRow {
            date,
            precipitation_mm: values.first().copied().flatten(),
            temp_max_c: values.get(1).copied().flatten(),
            temp_min_c: values.get(2).copied().flatten(),
            temp_mean_c: match layout {
                ColumnLayout::Historical => values.get(3).copied().flatten(),
                ColumnLayout::Forecast => None,
            },
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{open_workbook, Data, Reader, Xlsx};
    use tempfile::TempDir;

    fn sample_rows(with_mean: bool) -> Vec<ForecastRow> {
        let values = [
            (Some(0.0), Some(18.3), Some(7.1)),
            (Some(12.4), Some(17.95), None),
            (None, Some(-0.1), Some(-3.3333)),
        ];
        values
            .iter()
            .enumerate()
            .map(|(i, &(precipitation_mm, temp_max_c, temp_min_c))| ForecastRow {
                date: NaiveDate::from_ymd_opt(2024, 5, 1 + i as u32).unwrap(),
                precipitation_mm,
                temp_max_c,
                temp_min_c,
                temp_mean_c: if with_mean { Some(5.0 + i as f64 / 3.0) } else { None },
            })
            .collect()
    }

    #[test]
    fn test_output_format_from_extension() {
        assert_eq!(OutputFormat::from_path(Path::new("datos.xlsx")), OutputFormat::Xlsx);
        assert_eq!(OutputFormat::from_path(Path::new("DATOS.XLSX")), OutputFormat::Xlsx);
        assert_eq!(OutputFormat::from_path(Path::new("out.csv")), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_path(Path::new("noext")), OutputFormat::Csv);
    }

    #[test]
    fn test_forecast_csv_header_and_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/forecast.csv");
        let rows = sample_rows(false);

        let written = write_rows(&rows, &path, ColumnLayout::Forecast).unwrap();

        assert_eq!(written, 3);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            "date,precipitation_mm,temp_max_c,temp_min_c"
        );
        assert_eq!(content.lines().nth(3).unwrap(), "2024-05-03,,-0.1,-3.3333");
        assert_eq!(read_csv(&path).unwrap(), rows);
    }

    #[test]
    fn test_historical_csv_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datos.csv");
        let rows = sample_rows(true);

        write_rows(&rows, &path, ColumnLayout::Historical).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Fecha,precipitacion_mm,temp_max_c,temp_min_c,temp_media_c\n"));
        assert_eq!(read_csv(&path).unwrap(), rows);
    }

    #[test]
    fn test_write_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forecast.csv");
        let rows = sample_rows(false);

        write_rows(&rows, &path, ColumnLayout::Forecast).unwrap();
        write_rows(&rows[..1], &path, ColumnLayout::Forecast).unwrap();

        assert_eq!(read_csv(&path).unwrap(), rows[..1].to_vec());
    }

    #[test]
    fn test_read_csv_rejects_unknown_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.csv");
        fs::write(&path, "a,b,c\n1,2,3\n").unwrap();

        assert!(matches!(
            read_csv(&path),
            Err(HydrometError::FileSystem { .. })
        ));
    }

    #[test]
    fn test_historical_xlsx_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datos_meteo.xlsx");
        let rows = sample_rows(true);

        write_rows(&rows, &path, ColumnLayout::Historical).unwrap();

        let mut workbook: Xlsx<_> = open_workbook(&path).unwrap();
        let sheet = workbook.sheet_names()[0].clone();
        let range = workbook.worksheet_range(&sheet).unwrap();
        let cells: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();

        let header: Vec<String> = cells[0].iter().map(|c| c.to_string()).collect();
        assert_eq!(header, ColumnLayout::Historical.headers());
        assert_eq!(cells.len(), rows.len() + 1);

        for (row, expected) in cells[1..].iter().zip(&rows) {
            assert_eq!(row[0], Data::String(expected.date.to_string()));
            let number = |cell: &Data| match cell {
                Data::Float(v) => Some(*v),
                Data::Int(v) => Some(*v as f64),
                _ => None,
            };
            assert_eq!(number(&row[1]), expected.precipitation_mm);
            assert_eq!(number(&row[2]), expected.temp_max_c);
            assert_eq!(number(&row[3]), expected.temp_min_c);
            assert_eq!(number(&row[4]), expected.temp_mean_c);
        }
    }
}
