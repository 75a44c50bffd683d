//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

/// Disk write granularity for incoming upload streams.
pub const UPLOAD_BUFFER_SIZE: usize = 4 * 1024 * 1024;
/// Read granularity for outgoing download streams.
pub const DOWNLOAD_CHUNK_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_STORAGE_DIR: &str = "uploads";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 0;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "lan-share", version = VERSION_INFO, about = "LAN file sharing server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "LAN_SHARE_STORAGE_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Directory holding the shared files"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "LAN_SHARE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "LAN_SHARE_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "LAN_SHARE_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload total size in bytes per request (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "LAN_SHARE_CORS_ORIGINS",
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: Option<String>,
}
