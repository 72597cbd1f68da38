use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use log::{info, warn};

use crate::error::SinkError;
use crate::models::Alert;
use crate::reporter::AlertSink;

pub const CSV_HEADER: &str = "from,to,amount,usdt,timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvMode {
    /// Replace the file with the alerts of one run. Nothing is written for an
    /// empty run.
    Overwrite,
    /// Append rows, writing the header only when the file is new.
    Append,
}

pub struct CsvSink {
    path: PathBuf,
    mode: CsvMode,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, mode: CsvMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }
}

pub fn csv_row(alert: &Alert) -> String {
    let timestamp = alert
        .timestamp
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    format!(
        "{},{},{},{},{}",
        alert.sender_checksum(),
        alert.recipient_checksum(),
        alert.token_amount.normalize(),
        alert.fiat_value.normalize(),
        timestamp
    )
}

fn write_rows(writer: &mut impl Write, alerts: &[Alert], header: bool) -> std::io::Result<()> {
    if header {
        writeln!(writer, "{}", CSV_HEADER)?;
    }
    for alert in alerts {
        writeln!(writer, "{}", csv_row(alert))?;
    }
    writer.flush()
}

#[async_trait]
impl AlertSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn emit(&mut self, alerts: &[Alert]) -> Result<(), SinkError> {
        match self.mode {
            CsvMode::Overwrite => {
                if alerts.is_empty() {
                    warn!("No alerts to export, {} left untouched", self.path.display());
                    return Ok(());
                }
                let mut writer = BufWriter::new(File::create(&self.path)?);
                write_rows(&mut writer, alerts, true)?;
            }
            CsvMode::Append => {
                if alerts.is_empty() {
                    return Ok(());
                }
                let is_new = std::fs::metadata(&self.path)
                    .map(|m| m.len() == 0)
                    .unwrap_or(true);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                write_rows(&mut BufWriter::new(file), alerts, is_new)?;
            }
        }

        info!("Wrote {} alerts to {}", alerts.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::tests::sample_alert;
    use tempfile::tempdir;

    #[test]
    fn row_matches_column_order() {
        let row = csv_row(&sample_alert(9, Some(1_700_000_000)));
        let fields: Vec<&str> = row.split(',').collect();

        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0], "0xaAaAaAaaAaAaAaaAaAAAAAAAAaaaAaAaAaaAaaAa");
        assert_eq!(fields[2], "50.126");
        assert_eq!(fields[3], "100250.5");
        assert_eq!(fields[4], "2023-11-14 22:13:20");
    }

    #[tokio::test]
    async fn overwrite_writes_header_once_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.csv");
        let mut sink = CsvSink::new(&path, CsvMode::Overwrite);

        sink.emit(&[sample_alert(1, None), sample_alert(2, None)]).await.unwrap();
        sink.emit(&[sample_alert(3, None)]).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec![CSV_HEADER, csv_row(&sample_alert(3, None)).as_str()]);
    }

    #[tokio::test]
    async fn overwrite_skips_empty_runs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.csv");
        let mut sink = CsvSink::new(&path, CsvMode::Overwrite);

        sink.emit(&[]).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn append_keeps_a_single_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.csv");
        let mut sink = CsvSink::new(&path, CsvMode::Append);

        sink.emit(&[sample_alert(1, None)]).await.unwrap();
        sink.emit(&[]).await.unwrap();
        sink.emit(&[sample_alert(2, None)]).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert_eq!(contents.matches(CSV_HEADER).count(), 1);
    }

    #[tokio::test]
    async fn unwritable_path_is_an_error() {
        let dir = tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().join("missing/alerts.csv"), CsvMode::Overwrite);
        assert!(sink.emit(&[sample_alert(1, None)]).await.is_err());
    }
}
