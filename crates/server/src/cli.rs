// crates/server/src/cli.rs
//! Command-line and environment configuration for the `seqrelay` binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use seqrelay_broker::{BrokerConfig, DEFAULT_OUTBOUND_LIMIT};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, Parser)]
#[command(name = "seqrelay", version)]
#[command(about = "Sequence intake server with resumable job event streams")]
pub struct Cli {
    /// Address to bind
    #[arg(long, env = "SEQRELAY_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on (falls back to PORT, then 8000)
    #[arg(long, env = "SEQRELAY_PORT")]
    pub port: Option<u16>,

    /// Front-end directory served at `/` and `/static` (defaults to ./static if present)
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Directory holding one results folder per job
    #[arg(long, env = "SEQRELAY_RESULTS_DIR", default_value = "blast_res")]
    pub results_dir: PathBuf,

    /// Search configuration file
    #[arg(long, env = "SEQRELAY_CONFIG", default_value = "config")]
    pub config_path: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, env = "SEQRELAY_LOG_JSON")]
    pub log_json: bool,

    /// Seconds a finished job stays replayable
    #[arg(long, env = "SEQRELAY_RETENTION_SECS", default_value_t = 3600)]
    pub retention_secs: u64,

    /// Live events queued for one WebSocket client before it is disconnected
    #[arg(long, env = "SEQRELAY_OUTBOUND_LIMIT", default_value_t = DEFAULT_OUTBOUND_LIMIT)]
    pub outbound_limit: usize,
}

impl Cli {
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port())
    }

    pub fn static_dir(&self) -> Option<PathBuf> {
        self.static_dir.clone().or_else(|| {
            let dir = PathBuf::from("static");
            dir.is_dir().then_some(dir)
        })
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            retention: Duration::from_secs(self.retention_secs),
            outbound_limit: self.outbound_limit,
            ..BrokerConfig::default()
        }
    }
}
