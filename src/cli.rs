use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cex-inflow-watch")]
#[command(about = "Alert on large ERC-20 transfers into exchange deposit addresses")]
pub struct Cli {
    /// Settings file (TOML). Defaults to ./cex-inflow-watch.toml when present.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll new blocks until interrupted
    Watch {
        /// First block to scan instead of the current head
        #[arg(short, long)]
        start_block: Option<u64>,
        /// Minimum fiat value that raises an alert
        #[arg(short, long)]
        threshold: Option<String>,
        /// Append alerts to this CSV file
        #[arg(long)]
        csv: Option<String>,
    },
    /// Scan a fixed window back from the head once and export the results
    Scan {
        #[arg(long, conflicts_with = "days")]
        lookback_blocks: Option<u64>,
        #[arg(long)]
        days: Option<u64>,
        #[arg(short, long)]
        threshold: Option<String>,
        #[arg(long)]
        csv: Option<String>,
        /// Chart file; SVG unless the name ends in .json
        #[arg(long)]
        chart: Option<String>,
        /// Skip the chart overlay (no kline request)
        #[arg(long, conflicts_with = "chart")]
        no_chart: bool,
    },
    /// List recorded alerts
    Alerts {
        #[arg(short, long)]
        address: Option<String>,
        #[arg(long)]
        from_block: Option<u64>,
        #[arg(long)]
        to_block: Option<u64>,
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Show alert history statistics
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_options() {
        let cli = Cli::parse_from(["cex-inflow-watch", "scan", "--days", "2", "--no-chart"]);
        match cli.command {
            Commands::Scan { days, no_chart, lookback_blocks, .. } => {
                assert_eq!(days, Some(2));
                assert!(no_chart);
                assert_eq!(lookback_blocks, None);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn days_and_lookback_conflict() {
        let result = Cli::try_parse_from([
            "cex-inflow-watch",
            "scan",
            "--days",
            "2",
            "--lookback-blocks",
            "10",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["cex-inflow-watch", "watch", "--config", "prod.toml"]);
        assert_eq!(cli.config.as_deref(), Some("prod.toml"));
    }

    #[test]
    fn every_subcommand_has_help() {
        use clap::CommandFactory;

        let command = Cli::command();
        for sub in command.get_subcommands() {
            assert!(sub.get_about().is_some(), "{} has no help text", sub.get_name());
        }
    }
}
