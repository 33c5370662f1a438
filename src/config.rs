//! Process configuration.
//!
//! Every setting is a command-line flag with an environment variable
//! fallback, so the tool runs the same from a shell or a container.

use crate::service::Mode;
use crate::storage::resp::DEFAULT_POOL_SIZE;
use clap::{Parser, ValueEnum};

/// Which storage backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Redis-compatible server over RESP
    Resp,
    /// In-process counters, discarded on exit
    Memory,
}

/// Counts IPv4 addresses from a file into a key-value store and writes a report.
#[derive(Debug, Clone, Parser)]
#[command(name = "ipcounter", version)]
pub struct Config {
    /// File with one IPv4 address per line
    #[arg(short, long, env = "INPUT")]
    pub input: String,

    /// Report file to write
    #[arg(short, long, env = "OUTPUT")]
    pub output: String,

    /// "async" runs import and export concurrently, anything else sequentially
    #[arg(short, long, env = "MODE", default_value = "sync")]
    pub mode: String,

    /// Store host
    #[arg(long, env = "HOST", default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Store port
    #[arg(short, long, env = "PORT", default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Store namespace
    #[arg(long, env = "NAMESPACE", default_value = "test")]
    pub namespace: String,

    /// Store set
    #[arg(long, env = "SET", default_value = "ips")]
    pub set: String,

    /// Storage backend
    #[arg(long, env = "BACKEND", value_enum, default_value_t = Backend::Resp)]
    pub backend: Backend,

    /// Maximum concurrent tasks in async mode (unbounded when unset)
    #[arg(long, env = "CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Store connections (defaults to --concurrency, else 4)
    #[arg(long, env = "CONNECTIONS")]
    pub connections: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// The execution mode selected by `mode`.
    pub fn mode(&self) -> Mode {
        Mode::from_config(&self.mode)
    }

    /// Number of store connections to open.
    pub fn pool_size(&self) -> usize {
        self.connections
            .or(self.concurrency)
            .unwrap_or(DEFAULT_POOL_SIZE)
    }

    /// Returns the store address as `host:port`.
    pub fn store_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_and_default_flags() {
        let config = Config::try_parse_from(["ipcounter", "-i", "in.txt", "-o", "out.txt"]).unwrap();

        assert_eq!(config.input, "in.txt");
        assert_eq!(config.output, "out.txt");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_flags() {
        let config = Config::try_parse_from([
            "ipcounter",
            "--input",
            "ips.txt",
            "--output",
            "report.txt",
            "--mode",
            "async",
            "--host",
            "db",
            "--port",
            "7000",
            "--backend",
            "memory",
            "--concurrency",
            "8",
        ])
        .unwrap();

        assert_eq!(config.mode(), Mode::Async);
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.concurrency, Some(8));
        assert_eq!(config.store_address(), "db:7000");
        assert_eq!(config.pool_size(), 8);
    }

    #[test]
    fn test_connections_flag_wins() {
        let config = Config::try_parse_from([
            "ipcounter",
            "-i",
            "a",
            "-o",
            "b",
            "--concurrency",
            "32",
            "--connections",
            "2",
        ])
        .unwrap();
        assert_eq!(config.pool_size(), 2);
    }

    #[test]
    fn test_unknown_mode_is_sync() {
        let config =
            Config::try_parse_from(["ipcounter", "-i", "a", "-o", "b", "-m", "parallel"]).unwrap();
        assert_eq!(config.mode(), Mode::Sync);
    }

    #[test]
    fn test_missing_input() {
        assert!(Config::try_parse_from(["ipcounter", "-o", "out.txt"]).is_err());
    }
}
