use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Keeps player data fresh from the Riot API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Configuration file (defaults to ./orianna.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Services to run
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = ServiceName::all())]
    pub services: Vec<ServiceName>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line human readable output
    Pretty,
    /// One JSON object per line
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceName {
    /// Sweeps, worker agents and the on-demand path
    Refresh,
    /// Discord bot
    Bot,
    /// Status HTTP server
    Web,
}

impl ServiceName {
    pub fn all() -> Vec<ServiceName> {
        vec![ServiceName::Refresh, ServiceName::Bot, ServiceName::Web]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Refresh => "refresh",
            ServiceName::Bot => "bot",
            ServiceName::Web => "web",
        }
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
