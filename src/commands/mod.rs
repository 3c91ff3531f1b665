pub mod backup;
pub mod compare;
pub mod deploy;
pub mod report;
pub mod validate;

use anyhow::{Context as _, Result};
use confkit::ConnectionManager;
use std::path::Path;
use std::sync::Arc;

use crate::Context;
use crate::paths;
use crate::schema::Inventory;
use crate::store::Store;
use crate::transport::RoutingConnector;

/// Load the inventory named by `--config`, `NETKEEP_CONFIG`, or the default location
pub fn load_inventory(ctx: &Context) -> Result<Inventory> {
    let path = paths::config_file(ctx.config.as_deref())?;
    if !path.exists() {
        anyhow::bail!(
            "Inventory not found at {}\nCreate it or pass --config <FILE>",
            path.display()
        );
    }
    Inventory::load(&path)
}

pub fn open_store(inventory: &Inventory) -> Result<Store> {
    let root = paths::state_dir(inventory.settings.state_dir.as_deref())?;
    Ok(Store::open(root))
}

/// Connection manager over the inventory devices with the real transports
pub fn connection_manager(inventory: &Inventory) -> Result<ConnectionManager> {
    let registry = inventory.registry().context("Invalid inventory")?;
    Ok(ConnectionManager::new(
        Arc::new(registry),
        Arc::new(RoutingConnector::new()),
        inventory.pool_settings(),
    ))
}

/// Read a configuration file given on the command line
pub fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Could not read configuration file: {}", path.display()))
}
