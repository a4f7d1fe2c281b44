use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use env_logger::{Target, WriteStyle};
use log::{info, LevelFilter};

use dhcp4c::{conf::Dhcp4cConfig, http, StoreHal};

/// Records the DHCPv4 client state of the eRouter, eCM and eMTA instances and
/// serves it over HTTP.
#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
struct Args {
    /// Configuration file.
    #[clap(long, env = "DHCP4C_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[clap(long, env = "DHCP4C_LOG", default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_module_path(false)
        .target(Target::Stderr)
        .write_style(WriteStyle::Never)
        .init();

    let config = match &args.config {
        Some(path) => Dhcp4cConfig::from_path(path)?,
        None => Dhcp4cConfig::try_load()?,
    };
    let hal = StoreHal::open(&config)?;
    http::serve(config.http.addr, hal.clone()).await?;

    hal.snapshots().flush()?;
    info!("dhcp4cd stopped");
    Ok(())
}
