use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "streams",
    about = "Record market data streams and replay them over websocket",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML file with store, upstream and server settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Record the given symbols and serve them for replay
    Run(RunArgs),
    /// Replay an aggregate-trade stream as CSV on stdout
    Export(ExportArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Market symbols, e.g. BTCUSDT ETHUSDT
    #[arg(required = true)]
    pub symbols: Vec<String>,
    /// Directory holding one database per stream
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Replay server listen address
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Replay endpoint of an aggregate-trade stream
    #[arg(long, default_value = "ws://127.0.0.1:9443/ws/btcusdt@aggTrade")]
    pub url: String,
    /// Bound on the websocket handshake, in seconds
    #[arg(long, default_value_t = 60)]
    pub connect_timeout: u64,
    /// Bound on the wait for each message, in seconds
    #[arg(long, default_value_t = 600)]
    pub message_timeout: u64,
}

/// Stream names recorded for each symbol, symbol lowercased.
pub fn stream_names(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .map(|s| s.to_lowercase())
        .flat_map(|s| {
            [
                format!("{s}@aggTrade"),
                format!("{s}@depth@100ms"),
                format!("{s}@depth"),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn three_streams_per_symbol() {
        let names = stream_names(&["BTCUSDT".into(), "ethusdt".into()]);
        assert_eq!(
            names,
            vec![
                "btcusdt@aggTrade",
                "btcusdt@depth@100ms",
                "btcusdt@depth",
                "ethusdt@aggTrade",
                "ethusdt@depth@100ms",
                "ethusdt@depth",
            ]
        );
    }

    #[test]
    fn run_requires_symbols() {
        assert!(Cli::try_parse_from(["streams", "run"]).is_err());
    }

    #[test]
    fn run_with_overrides() {
        let cli = Cli::try_parse_from([
            "streams", "run", "btcusdt", "--root", "/tmp/data", "--bind", "127.0.0.1:8080", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.symbols, vec!["btcusdt"]);
        assert_eq!(args.root, Some(PathBuf::from("/tmp/data")));
        assert_eq!(args.bind.unwrap().port(), 8080);
    }

    #[test]
    fn export_defaults() {
        let cli = Cli::try_parse_from(["streams", "export"]).unwrap();
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert!(args.url.ends_with("/ws/btcusdt@aggTrade"));
        assert_eq!(args.connect_timeout, 60);
        assert_eq!(args.message_timeout, 600);
    }
}
