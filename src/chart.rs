use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use plotters::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::SinkError;
use crate::models::{Alert, Kline};
use crate::price::PriceSource;
use crate::reporter::AlertSink;

const CHART_SIZE: (u32, u32) = (1280, 640);
const MARKER_DASHES: usize = 40;

/// Price series with one vertical marker per alert.
#[derive(Debug, Serialize)]
pub struct ChartOverlay {
    pub title: String,
    pub interval: String,
    pub series: Vec<Kline>,
    /// Height at which marker labels are drawn: the series maximum.
    pub label_height: Option<Decimal>,
    pub markers: Vec<Marker>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Marker {
    pub time: DateTime<Utc>,
    pub label: String,
    pub fiat_value: Decimal,
    pub block_number: u64,
}

pub fn build_overlay(
    title: &str,
    interval: &str,
    quote_currency: &str,
    series: Vec<Kline>,
    alerts: &[Alert],
) -> ChartOverlay {
    let label_height = series.iter().map(|k| k.close).max();
    let markers = alerts
        .iter()
        .filter_map(|alert| {
            let Some(time) = alert.timestamp else {
                debug!("Alert in block {} has no timestamp, no marker", alert.block_number);
                return None;
            };
            Some(Marker {
                time,
                label: format!(
                    "{} {}",
                    alert
                        .fiat_value
                        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
                    quote_currency
                ),
                fiat_value: alert.fiat_value,
                block_number: alert.block_number,
            })
        })
        .collect();

    ChartOverlay {
        title: title.to_string(),
        interval: interval.to_string(),
        series,
        label_height,
        markers,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartFormat {
    Svg,
    /// The overlay document itself.
    Json,
}

impl ChartFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ChartFormat::Json,
            _ => ChartFormat::Svg,
        }
    }
}

fn render_error(e: impl std::fmt::Display) -> SinkError {
    SinkError::Render(e.to_string())
}

fn price_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn axis_time(secs: &i64) -> String {
    DateTime::from_timestamp(*secs, 0)
        .map(|t| t.format("%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Draws the close line, a dashed red vertical line per marker and the
/// marker labels at `label_height`.
pub fn render_svg(overlay: &ChartOverlay, path: &Path) -> Result<(), SinkError> {
    let Some(label_height) = overlay.label_height else {
        return Err(SinkError::Render("no price series to plot".to_string()));
    };

    let times = overlay
        .series
        .iter()
        .map(|k| k.open_time.timestamp())
        .chain(overlay.markers.iter().map(|m| m.time.timestamp()));
    let (x_min, x_max) = times.fold((i64::MAX, i64::MIN), |(lo, hi), t| (lo.min(t), hi.max(t)));
    let x_max = x_max.max(x_min + 1);

    let top = price_f64(label_height);
    let bottom = overlay
        .series
        .iter()
        .map(|k| price_f64(k.close))
        .fold(top, f64::min);
    let pad = ((top - bottom).max(top.abs() * 0.01)).max(f64::EPSILON) * 0.1;
    let (y_min, y_max) = (bottom - pad, top + pad * 3.0);

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&overlay.title, ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .x_labels(8)
        .x_label_formatter(&axis_time)
        .y_desc(format!("Close ({})", overlay.interval))
        .draw()
        .map_err(render_error)?;

    chart
        .draw_series(LineSeries::new(
            overlay
                .series
                .iter()
                .map(|k| (k.open_time.timestamp(), price_f64(k.close))),
            &BLUE,
        ))
        .map_err(render_error)?;

    let dash = (y_max - y_min) / (MARKER_DASHES * 2) as f64;
    for marker in &overlay.markers {
        let t = marker.time.timestamp();
        chart
            .draw_series((0..MARKER_DASHES).map(|i| {
                let from = y_min + dash * (2 * i) as f64;
                PathElement::new(vec![(t, from), (t, from + dash)], RED.stroke_width(1))
            }))
            .map_err(render_error)?;
        chart
            .draw_series(std::iter::once(Text::new(
                marker.label.clone(),
                (t, top),
                ("sans-serif", 14).into_font().color(&RED),
            )))
            .map_err(render_error)?;
    }

    root.present().map_err(render_error)?;
    Ok(())
}

/// Fetches the kline series on every emit and writes the chart.
pub struct ChartSink<P> {
    source: Arc<P>,
    path: PathBuf,
    format: ChartFormat,
    title: String,
    interval: String,
    limit: u32,
    quote_currency: String,
}

impl<P: PriceSource> ChartSink<P> {
    pub fn new(
        source: Arc<P>,
        path: impl Into<PathBuf>,
        title: &str,
        interval: &str,
        limit: u32,
        quote_currency: &str,
    ) -> Self {
        let path = path.into();
        Self {
            source,
            format: ChartFormat::from_path(&path),
            path,
            title: title.to_string(),
            interval: interval.to_string(),
            limit,
            quote_currency: quote_currency.to_string(),
        }
    }
}

#[async_trait]
impl<P: PriceSource + 'static> AlertSink for ChartSink<P> {
    fn name(&self) -> &'static str {
        "chart"
    }

    async fn emit(&mut self, alerts: &[Alert]) -> Result<(), SinkError> {
        let series = self.source.fetch_klines(&self.interval, self.limit).await?;
        let overlay = build_overlay(
            &self.title,
            &self.interval,
            &self.quote_currency,
            series,
            alerts,
        );
        match self.format {
            ChartFormat::Svg => render_svg(&overlay, &self.path)?,
            ChartFormat::Json => std::fs::write(&self.path, serde_json::to_vec_pretty(&overlay)?)?,
        }

        info!(
            "Wrote chart with {} candles and {} markers to {}",
            overlay.series.len(),
            overlay.markers.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::PriceQuote;
    use crate::reporter::tests::sample_alert;
    use std::str::FromStr;
    use tempfile::tempdir;

    fn kline(secs: i64, close: &str) -> Kline {
        Kline {
            open_time: DateTime::from_timestamp(secs, 0).unwrap(),
            close: Decimal::from_str(close).unwrap(),
        }
    }

    struct Series(Result<Vec<Kline>, FetchError>);

    #[async_trait]
    impl PriceSource for Series {
        async fn fetch_price(&self) -> Result<PriceQuote, FetchError> {
            Err(FetchError::Transient("unused".into()))
        }

        async fn fetch_klines(&self, _: &str, _: u32) -> Result<Vec<Kline>, FetchError> {
            self.0.clone()
        }
    }

    #[test]
    fn overlay_marks_timestamped_alerts_only() {
        let series = vec![kline(0, "4.1"), kline(3600, "4.7"), kline(7200, "4.3")];
        let alerts = [sample_alert(1, Some(3_700)), sample_alert(2, None)];

        let overlay = build_overlay("OMUSDT", "1h", "USDT", series, &alerts);

        assert_eq!(overlay.label_height, Some(Decimal::from_str("4.7").unwrap()));
        assert_eq!(overlay.markers.len(), 1);
        assert_eq!(overlay.markers[0].block_number, 1);
        assert_eq!(overlay.markers[0].label, "100251 USDT");
    }

    #[test]
    fn empty_series_has_no_label_height() {
        let overlay = build_overlay("OMUSDT", "1h", "USDT", Vec::new(), &[]);
        assert_eq!(overlay.label_height, None);
        assert!(overlay.markers.is_empty());
    }

    #[tokio::test]
    async fn sink_writes_json_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chart.json");
        let source = Arc::new(Series(Ok(vec![kline(0, "4.1")])));
        let mut sink = ChartSink::new(source, &path, "OMUSDT", "1h", 100, "USDT");

        sink.emit(&[sample_alert(5, Some(60))]).await.unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["title"], "OMUSDT");
        assert_eq!(doc["series"].as_array().unwrap().len(), 1);
        assert_eq!(doc["markers"][0]["block_number"], 5);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ChartFormat::from_path(Path::new("om_chart.svg")), ChartFormat::Svg);
        assert_eq!(ChartFormat::from_path(Path::new("om_chart.JSON")), ChartFormat::Json);
        assert_eq!(ChartFormat::from_path(Path::new("om_chart")), ChartFormat::Svg);
    }

    #[tokio::test]
    async fn sink_draws_svg_with_marker_labels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        let series = vec![kline(0, "4.1"), kline(3600, "4.7"), kline(7200, "4.3")];
        let source = Arc::new(Series(Ok(series)));
        let mut sink = ChartSink::new(source, &path, "OMUSDT", "1h", 100, "USDT");

        sink.emit(&[sample_alert(5, Some(3_700))]).await.unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("OMUSDT"));
        assert!(svg.contains("100251 USDT"));
    }

    #[tokio::test]
    async fn empty_series_cannot_be_drawn() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        let mut sink = ChartSink::new(Arc::new(Series(Ok(Vec::new()))), &path, "t", "1h", 10, "USDT");

        assert!(matches!(sink.emit(&[]).await, Err(SinkError::Render(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn kline_failure_is_a_sink_error() {
        let dir = tempdir().unwrap();
        let source = Arc::new(Series(Err(FetchError::Transient("down".into()))));
        let mut sink = ChartSink::new(source, dir.path().join("c.json"), "t", "1h", 10, "USDT");

        assert!(matches!(sink.emit(&[]).await, Err(SinkError::Fetch(_))));
    }
}
