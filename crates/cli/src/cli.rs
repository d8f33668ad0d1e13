use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ewerelay", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long = "config", value_name = "FILE", global = true)]
    pub config_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the relay server (default)
    Serve {
        /// Listen host, overrides server.host
        #[arg(long)]
        host: Option<String>,

        /// Listen port, overrides server.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Development mode (verbose logging)
        #[arg(short, long)]
        dev: bool,
    },

    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load and validate the configuration, then print a summary
    CheckConfig,

    /// Fetch the configured device once with an access token and print it
    Fetch {
        /// Vendor access token
        #[arg(short, long)]
        token: String,

        /// Region code, defaults to oauth.default_region
        #[arg(short, long)]
        region: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_flags() {
        let cli = Cli::parse_from(["ewerelay", "serve", "--port", "9000", "--dev"]);
        match cli.command {
            Some(Commands::Serve { host, port, dev }) => {
                assert!(host.is_none());
                assert_eq!(port, Some(9000));
                assert!(dev);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_path() {
        let cli = Cli::parse_from(["ewerelay", "check-config", "-c", "relay.yaml"]);
        assert_eq!(cli.config_path.as_deref(), Some("relay.yaml"));
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
    }

    #[test]
    fn test_no_subcommand() {
        let cli = Cli::parse_from(["ewerelay"]);
        assert!(cli.command.is_none());
    }
}
