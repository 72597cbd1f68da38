mod allowlist;
mod chart;
mod cli;
mod config;
mod csv_sink;
mod database;
mod decoder;
mod error;
mod ethereum;
mod filter;
mod models;
mod monitor;
mod pipeline;
mod price;
mod reporter;
mod scanner;
mod tracker;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use chart::ChartSink;
use cli::{Cli, Commands};
use config::{Config, BLOCKS_PER_DAY};
use csv_sink::{CsvMode, CsvSink};
use database::Database;
use ethereum::{ChainSource, EthereumClient};
use filter::AlertFilter;
use monitor::{Monitor, MonitorSettings};
use price::{BinanceClient, PriceOracle};
use reporter::{ConsoleSink, Reporter};
use scanner::Scanner;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch {
            start_block,
            threshold,
            csv,
        } => {
            if let Some(threshold) = threshold {
                config.threshold = threshold;
                config.validate()?;
            }
            watch_chain(&config, start_block, csv).await?;
        }
        Commands::Scan {
            lookback_blocks,
            days,
            threshold,
            csv,
            chart,
            no_chart,
        } => {
            if let Some(threshold) = threshold {
                config.threshold = threshold;
                config.validate()?;
            }
            let lookback = lookback_window(days, lookback_blocks, config.lookback_blocks);
            let chart = if no_chart {
                None
            } else {
                Some(chart.unwrap_or_else(|| config.chart_path.clone()))
            };
            let csv = csv.unwrap_or_else(|| config.csv_path.clone());
            scan_window(&config, lookback, csv, chart).await?;
        }
        Commands::Alerts {
            address,
            from_block,
            to_block,
            limit,
        } => {
            let database = Database::new(&config.database_url).await?;
            let alerts = database
                .query_alerts(address.as_deref(), from_block, to_block, limit.unwrap_or(100))
                .await?;

            for alert in alerts {
                println!("{}", serde_json::to_string_pretty(&alert)?);
            }
        }
        Commands::Stats => {
            let database = Database::new(&config.database_url).await?;
            let stats = database.get_stats().await?;
            println!("Alert history:");
            println!("Total alerts: {}", stats.total_alerts);
            println!("Unique senders: {}", stats.unique_senders);
            println!("Unique recipients: {}", stats.unique_recipients);
            println!("Latest block: {}", stats.latest_block.unwrap_or(0));
            println!("Earliest block: {}", stats.earliest_block.unwrap_or(0));
        }
    }

    Ok(())
}

/// `--days` wins over `--lookback-blocks`, which wins over the configured window.
fn lookback_window(days: Option<u64>, lookback_blocks: Option<u64>, configured: u64) -> u64 {
    days.map(|d| d.saturating_mul(BLOCKS_PER_DAY))
        .or(lookback_blocks)
        .unwrap_or(configured)
}

/// Opens the alert history. When it cannot be opened the run goes on
/// without the history sink.
async fn open_history(database_url: &str) -> Option<Database> {
    match Database::new(database_url).await {
        Ok(database) => Some(database),
        Err(e) => {
            error!("Alert history {} unavailable, not recording: {}", database_url, e);
            None
        }
    }
}

fn base_reporter(config: &Config, history: Option<Database>) -> Reporter {
    Reporter::new()
        .with_sink(ConsoleSink::new(&config.token_symbol, config.quote_currency()))
        .with_optional_sink(history)
}

fn build_filter(config: &Config) -> Result<AlertFilter> {
    Ok(AlertFilter::new(
        config.allowlist()?,
        config.threshold()?,
        config.token_decimals,
    ))
}

async fn watch_chain(config: &Config, start_block: Option<u64>, csv: Option<String>) -> Result<()> {
    let chain = Arc::new(EthereumClient::new(
        &config.rpc_url,
        config.token_address()?,
        config.request_timeout(),
    )?);
    let prices = BinanceClient::new(
        &config.price_api_url,
        &config.price_symbol,
        config.request_timeout(),
    )?;
    let filter = build_filter(config)?;

    let mut reporter = base_reporter(config, open_history(&config.database_url).await);
    if let Some(path) = csv {
        reporter = reporter.with_sink(CsvSink::new(path, CsvMode::Append));
    }

    info!(
        "Watching {} transfers into {} exchange addresses worth at least {} {} (sinks: {:?})",
        config.token_symbol,
        config.allowlist()?.len(),
        filter.threshold(),
        config.quote_currency(),
        reporter.sink_names()
    );

    let mut monitor = Monitor::new(
        chain,
        PriceOracle::new(prices),
        filter,
        reporter,
        MonitorSettings {
            poll_interval: config.poll_interval(),
            backoff: config.backoff(),
            confirmations: config.confirmations,
            dedup_alerts: config.dedup_alerts,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Cannot listen for Ctrl-C: {}", e);
                // the sender must outlive the monitor or it stops at once
                std::future::pending::<()>().await;
            }
        }
    });

    monitor.run(start_block, shutdown_rx).await?;
    Ok(())
}

async fn scan_window(
    config: &Config,
    lookback: u64,
    csv: String,
    chart: Option<String>,
) -> Result<()> {
    let chain = Arc::new(EthereumClient::new(
        &config.rpc_url,
        config.token_address()?,
        config.request_timeout(),
    )?);
    chain.verify_contract().await?;
    let history = open_history(&config.database_url).await;

    let prices = BinanceClient::new(
        &config.price_api_url,
        &config.price_symbol,
        config.request_timeout(),
    )?;
    let scanner = Scanner::new(
        chain,
        PriceOracle::new(prices.clone()),
        build_filter(config)?,
        lookback,
    );
    let report = scanner.scan().await?;

    let mut reporter = base_reporter(config, history);
    if let Some(path) = chart {
        reporter = reporter.with_sink(ChartSink::new(
            Arc::new(prices),
            path,
            &config.price_symbol,
            &config.kline_interval,
            config.kline_limit,
            config.quote_currency(),
        ));
    }
    reporter = reporter.with_sink(CsvSink::new(csv, CsvMode::Overwrite));

    let failed = reporter.report(&report.alerts).await;
    match report.quote {
        Some(quote) => println!(
            "Detected {} alerts in blocks {} to {} at {} {} ({} transfer logs, {} skipped)",
            report.alerts.len(),
            report.range.from,
            report.range.to,
            quote.price,
            config.quote_currency(),
            report.logs,
            report.skipped
        ),
        None => println!(
            "No price available, blocks {} to {} not evaluated ({} transfer logs, {} skipped)",
            report.range.from, report.range.to, report.logs, report.skipped
        ),
    }
    if !failed.is_empty() {
        error!("Some sinks failed: {:?}", failed);
    }
    Ok(())
}
