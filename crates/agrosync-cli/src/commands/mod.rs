pub mod config;
pub mod store;
pub mod sync;

use agrosync_core::{Config, LocalStore, StoreOptions};

/// Open and initialize the configured local database.
pub fn open_store(config: &Config) -> Result<LocalStore, Box<dyn std::error::Error>> {
    let options = StoreOptions::from_config(config)?;
    Ok(LocalStore::open(options)?)
}

/// Print a value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
