use async_trait::async_trait;
use log::{error, info};

use crate::error::SinkError;
use crate::models::Alert;

/// One destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn emit(&mut self, alerts: &[Alert]) -> Result<(), SinkError>;
}

/// Fans alerts out to every sink. A failing sink is logged and skipped.
#[derive(Default)]
pub struct Reporter {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl AlertSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Adds the sink when it could be opened.
    pub fn with_optional_sink(self, sink: Option<impl AlertSink + 'static>) -> Self {
        match sink {
            Some(sink) => self.with_sink(sink),
            None => self,
        }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Returns the names of the sinks that failed.
    pub async fn report(&mut self, alerts: &[Alert]) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.emit(alerts).await {
                error!("{} sink failed: {}", sink.name(), e);
                failed.push(sink.name());
            }
        }
        failed
    }
}

/// Human readable alert blocks on stdout.
pub struct ConsoleSink {
    token_symbol: String,
    quote_currency: String,
}

impl ConsoleSink {
    pub fn new(token_symbol: &str, quote_currency: &str) -> Self {
        Self {
            token_symbol: token_symbol.to_string(),
            quote_currency: quote_currency.to_string(),
        }
    }

    pub fn render(&self, alert: &Alert) -> String {
        let mut out = format!(
            "Large {} inflow to exchange\n  From:   {}\n  To:     {}\n  Amount: {:.2} {}\n  Value:  {:.2} {}\n  Block:  {}\n  Tx:     {}",
            self.token_symbol,
            alert.sender_checksum(),
            alert.recipient_checksum(),
            alert.token_amount,
            self.token_symbol,
            alert.fiat_value,
            self.quote_currency,
            alert.block_number,
            alert.transaction_hash_hex(),
        );
        if let Some(ts) = alert.timestamp {
            out.push_str(&format!("\n  Time:   {}", ts.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        out
    }
}

#[async_trait]
impl AlertSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn emit(&mut self, alerts: &[Alert]) -> Result<(), SinkError> {
        for alert in alerts {
            println!("{}\n", self.render(alert));
        }
        if !alerts.is_empty() {
            info!("Reported {} alerts to console", alerts.len());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::DateTime;
    use ethers_core::types::{Address, H256};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};

    pub(crate) fn sample_alert(block: u64, timestamp: Option<i64>) -> Alert {
        Alert {
            sender: Address::repeat_byte(0xaa),
            recipient: Address::repeat_byte(0xbb),
            token_amount: Decimal::from_str("50.126").unwrap(),
            fiat_value: Decimal::from_str("100250.5").unwrap(),
            block_number: block,
            timestamp: timestamp.and_then(|t| DateTime::from_timestamp(t, 0)),
            transaction_hash: H256::from_low_u64_be(block),
            log_index: 1,
        }
    }

    /// Records every batch it receives.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub batches: Arc<Mutex<Vec<Vec<Alert>>>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn emit(&mut self, alerts: &[Alert]) -> Result<(), SinkError> {
            self.batches.lock().unwrap().push(alerts.to_vec());
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl AlertSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn emit(&mut self, _: &[Alert]) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_others() {
        let recording = RecordingSink::default();
        let mut reporter = Reporter::new()
            .with_sink(BrokenSink)
            .with_sink(recording.clone());

        let failed = reporter.report(&[sample_alert(1, None)]).await;

        assert_eq!(failed, vec!["broken"]);
        assert_eq!(recording.batches.lock().unwrap().len(), 1);
        assert_eq!(reporter.sink_names(), vec!["broken", "recording"]);
    }

    #[test]
    fn console_render_includes_amounts_and_time() {
        let sink = ConsoleSink::new("OM", "USDT");
        let text = sink.render(&sample_alert(42, Some(1_700_000_000)));

        assert!(text.contains("Amount: 50.13 OM"));
        assert!(text.contains("Value:  100250.50 USDT"));
        assert!(text.contains("Block:  42"));
        assert!(text.contains("Time:   2023-11-14 22:13:20 UTC"));
    }
}
