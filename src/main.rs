#[macro_use]
extern crate tracing;

use std::env;

use anyhow::Context;
use doks_autoscaler::cloud_provider::{CloudProvider, DoksCloudProvider};
use doks_autoscaler::manager::{Config, Manager};
use doks_autoscaler::SETTINGS;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // setup logging
    let settings = SETTINGS.read().unwrap().clone();
    match settings.get_string("log_level") {
        Ok(s) => env::set_var("RUST_LOG", s),
        Err(_) => env::set_var("RUST_LOG", "info"),
    }
    tracing_subscriber::fmt::init();

    info!(
        "doks_autoscaler {} {}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let config: Config = settings
        .try_deserialize()
        .context("invalid configuration")?;
    let manager = Manager::new(&config)
        .await
        .context("couldn't initialize DigitalOcean manager")?;
    let provider = DoksCloudProvider::new(manager);

    for group in provider.node_groups() {
        info!("discovered node group {}", group.debug());
    }
    Ok(())
}
