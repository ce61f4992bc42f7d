use clap::Parser;
use std::path::PathBuf;

/// Command line flags; anything set here overrides the environment
#[derive(Parser, Debug, Default)]
#[command(
    name = "tcptap",
    version,
    about = "Intercepting TCP proxy with match/replace, mirroring and AMQP ack rewriting"
)]
pub struct Cli {
    /// Local listen address (e.g. ":9999")
    #[arg(short, long)]
    pub local: Option<String>,

    /// Remote address (e.g. "localhost:80")
    #[arg(short, long)]
    pub remote: Option<String>,

    /// Display server actions
    #[arg(short, long)]
    pub verbose: bool,

    /// Display server actions and all transferred data
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Disable Nagle's algorithm
    #[arg(short = 'n', long)]
    pub nagles: bool,

    /// Output data dumps in hex
    #[arg(short = 'x', long)]
    pub hex: bool,

    /// Output ANSI colors
    #[arg(short, long)]
    pub color: bool,

    /// Speak TLS to the remote and plaintext to local clients
    #[arg(long)]
    pub unwrap_tls: bool,

    /// Name verified against the remote certificate (default: host of --remote)
    #[arg(long)]
    pub tls_server_name: Option<String>,

    /// Extra PEM root certificates trusted for the remote
    #[arg(long)]
    pub tls_ca_file: Option<PathBuf>,

    /// Match regex (log every match)
    #[arg(long = "match")]
    pub match_pattern: Option<String>,

    /// Replace regex list: "pattern~replacement[~pattern~replacement...]"
    #[arg(long)]
    pub replace: Option<String>,

    /// Mirror local->remote traffic to this address
    #[arg(long)]
    pub mirror_request: Option<String>,

    /// Mirror remote->local traffic to this address
    #[arg(long)]
    pub mirror_response: Option<String>,

    /// Rewrite AMQP basic.ack frames into basic.nack
    #[arg(long)]
    pub amqp: bool,

    /// Set the requeue flag on rewritten nacks
    #[arg(long)]
    pub nack_requeue: bool,

    /// Random delay (0..N ms, N at most 100) before each ack rewrite
    #[arg(long, value_parser = clap::value_parser!(u64).range(..=100))]
    pub nack_delay_ms: Option<u64>,

    /// Remote/mirror connect timeout in seconds (0 disables)
    #[arg(long)]
    pub connect_timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_short_flags() {
        let cli = Cli::try_parse_from([
            "tcptap", "-l", ":7000", "-r", "broker:5672", "-v", "-n", "-x", "-c",
        ])
        .unwrap();
        assert_eq!(cli.local.as_deref(), Some(":7000"));
        assert_eq!(cli.remote.as_deref(), Some("broker:5672"));
        assert!(cli.verbose && cli.nagles && cli.hex && cli.color);
        assert!(!cli.very_verbose);
    }

    #[test]
    fn test_parse_long_flags() {
        let cli = Cli::try_parse_from([
            "tcptap",
            "--vv",
            "--match",
            "password=\\w+",
            "--replace",
            "secret~XXXX",
            "--amqp",
            "--nack-requeue",
            "--nack-delay-ms",
            "100",
            "--unwrap-tls",
            "--tls-server-name",
            "broker.internal",
        ])
        .unwrap();
        assert!(cli.very_verbose);
        assert_eq!(cli.match_pattern.as_deref(), Some("password=\\w+"));
        assert_eq!(cli.replace.as_deref(), Some("secret~XXXX"));
        assert!(cli.amqp && cli.nack_requeue && cli.unwrap_tls);
        assert_eq!(cli.nack_delay_ms, Some(100));
        assert_eq!(cli.tls_server_name.as_deref(), Some("broker.internal"));
    }

    #[test]
    fn test_nack_delay_above_100_rejected() {
        assert!(Cli::try_parse_from(["tcptap", "--nack-delay-ms", "101"]).is_err());
        let cli = Cli::try_parse_from(["tcptap", "--nack-delay-ms", "0"]).unwrap();
        assert_eq!(cli.nack_delay_ms, Some(0));
    }

    #[test]
    fn test_defaults_leave_everything_unset() {
        let cli = Cli::try_parse_from(["tcptap"]).unwrap();
        assert!(cli.local.is_none());
        assert!(cli.remote.is_none());
        assert!(!cli.amqp);
    }
}
