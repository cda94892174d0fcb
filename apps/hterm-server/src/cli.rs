use clap::{Args, Parser};
use hterm_bridge::{AllowListStarter, BridgeConfig, CommandStarter, SessionStarter, StartError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "hterm-server",
    about = "Serve pseudo-terminal sessions to a browser terminal over HTTP polling",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "HTERM_ADDR",
        default_value = "localhost:8080",
        help = "Socket address to listen on, e.g. 0.0.0.0:8080 for all interfaces"
    )]
    pub addr: String,

    #[arg(
        long,
        env = "HTERM_CMD",
        default_value = "bash -l",
        help = "Command every session runs (split on whitespace, no shell expansion)"
    )]
    pub cmd: String,

    #[arg(
        long = "allow",
        value_name = "COMMAND",
        help = "Run the command named by the session's extra.command instead of --cmd, \
                but only if it matches one of these; repeatable"
    )]
    pub allow: Vec<String>,

    #[arg(
        long,
        env = "HTERM_STATIC_DIR",
        value_name = "DIR",
        help = "Serve the browser client from this directory"
    )]
    pub static_dir: Option<PathBuf>,

    #[command(flatten)]
    pub bridge: BridgeArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    pub fn starter(&self) -> Result<Arc<dyn SessionStarter>, StartError> {
        if self.allow.is_empty() {
            Ok(Arc::new(CommandStarter::from_line(&self.cmd)?))
        } else {
            Ok(Arc::new(AllowListStarter::new(self.allow.iter().cloned())))
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BridgeArgs {
    #[arg(
        long = "read-timeout-ms",
        env = "HTERM_READ_TIMEOUT_MS",
        default_value_t = 25_000,
        help = "How long a read waits for output before returning empty (0 waits forever)"
    )]
    pub read_timeout_ms: u64,

    #[arg(
        long = "start-timeout-ms",
        env = "HTERM_START_TIMEOUT_MS",
        default_value_t = 10_000,
        help = "How long starting a session may take (0 waits forever)"
    )]
    pub start_timeout_ms: u64,

    #[arg(
        long = "max-read-bytes",
        env = "HTERM_MAX_READ_BYTES",
        default_value_t = hterm_bridge::config::DEFAULT_MAX_READ_BYTES,
        help = "Most output bytes returned by one read"
    )]
    pub max_read_bytes: usize,
}

impl BridgeArgs {
    pub fn to_config(&self) -> BridgeConfig {
        BridgeConfig {
            max_read_bytes: self.max_read_bytes.max(1),
            read_timeout: millis(self.read_timeout_ms),
            start_timeout: millis(self.start_timeout_ms),
            ..BridgeConfig::default()
        }
    }
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "HTERM_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "HTERM_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn defaults_match_bridge_defaults() {
        let cli = Cli::try_parse_from(["hterm-server"]).unwrap();
        assert_eq!(cli.cmd, "bash -l");
        assert!(cli.allow.is_empty());
        assert_eq!(cli.bridge.to_config(), BridgeConfig::default());
    }

    #[test_timeout::timeout]
    fn zero_timeouts_disable_deadlines() {
        let cli = Cli::try_parse_from([
            "hterm-server",
            "--read-timeout-ms",
            "0",
            "--start-timeout-ms",
            "0",
        ])
        .unwrap();
        let config = cli.bridge.to_config();
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.start_timeout, None);
    }

    #[test_timeout::timeout]
    fn allow_flags_are_collected() {
        let cli = Cli::try_parse_from([
            "hterm-server",
            "--allow",
            "ls",
            "--allow",
            "man bash",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.allow, vec!["ls".to_string(), "man bash".to_string()]);
        assert_eq!(cli.logging.level, LogLevel::Debug);
        assert!(cli.starter().is_ok());
    }

    #[test_timeout::timeout]
    fn blank_command_is_rejected() {
        let cli = Cli::try_parse_from(["hterm-server", "--cmd", "  "]).unwrap();
        assert!(matches!(cli.starter(), Err(StartError::MissingCommand)));
    }
}
