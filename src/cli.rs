//! CLI argument parsing.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "route-meter",
    version,
    about = "API gateway with request instrumentation"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml", env = "ROUTE_METER_CONFIG")]
    pub config: String,

    /// Listen host
    #[arg(long, env = "ROUTE_METER_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(long, env = "ROUTE_METER_PORT")]
    pub port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info", env = "ROUTE_METER_LOG_LEVEL")]
    pub log_level: String,
}
