//! Command-line arguments for the agent binary.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "agent")]
#[command(about = "Host-resident telemetry agent", long_about = None)]
pub struct CliArgs {
    /// Path to the agent's TOML configuration file.
    #[arg(value_name = "CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Override the directory scanned for external (.mon) monitor configs.
    #[arg(long = "external-monitors-dir", value_name = "DIR")]
    pub external_monitors_dir: Option<String>,

    /// Override the CA bundle used to verify the control-plane's certificate.
    #[arg(long = "ca-bundle", value_name = "PATH")]
    pub ca_bundle_path: Option<String>,

    /// Disable TLS certificate verification (diagnostic use only).
    #[arg(long = "disable-ssl-verification")]
    pub disable_ssl_verification: bool,

    /// Directory to write daily-rolling log files into.
    #[arg(long = "log-dir", value_name = "DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Run monitors locally without bootstrapping or publishing to a bus.
    #[arg(long = "local-only")]
    pub local_only: bool,
}
