//! Local database subcommands.

use agrosync_core::storage::schema;
use agrosync_core::{Config, LocalStore, SelectQuery, StoreOptions};
use clap::Subcommand;
use serde_json::Value;

use super::{open_store, print_json};

#[derive(Subcommand)]
pub enum StoreAction {
    /// Create the local database and its schema if needed
    Init,
    /// List user tables in the local database
    Tables,
    /// Show rows waiting to be pushed
    Unsynced {
        /// Table name
        table: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show rows of a table
    Select {
        /// Table name
        table: String,
        /// Maximum number of rows
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Delete a row locally and queue the delete for the remote store
    Delete {
        /// Table name
        table: String,
        /// Row id
        id: String,
    },
    /// Print the database file location
    Path,
    /// Delete the local database file
    Reset {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

pub fn run(action: StoreAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    match action {
        StoreAction::Init => {
            let store = open_store(&config)?;
            println!("database: {}", store.options().location);
            if store.schema_creations() > 0 {
                println!("schema created");
            } else {
                println!("schema already present");
            }
        }
        StoreAction::Tables => {
            let store = open_store(&config)?;
            for table in store.list_user_tables()? {
                let marker = store.last_sync_marker(&table).unwrap_or_else(|| "never".into());
                println!("{table}\tlast sync: {marker}");
            }
        }
        StoreAction::Unsynced { table, json } => {
            let store = open_store(&config)?;
            let rows = store.unsynced_rows(&table)?;
            if json {
                print_json(&rows)?;
            } else {
                println!("{} unsynced row(s) in {table}", rows.len());
                for row in &rows {
                    let id = row.get(schema::ID_COLUMN).cloned().unwrap_or(Value::Null);
                    println!("  id={id}");
                }
            }
        }
        StoreAction::Select { table, limit } => {
            let store = open_store(&config)?;
            let rows = store.select(&table, &SelectQuery::all().order_by("rowid").limit(limit))?;
            print_json(&rows)?;
        }
        StoreAction::Delete { table, id } => {
            let store = open_store(&config)?;
            let id = parse_id(&table, &id);
            match store.delete_tracked(&table, &id)? {
                0 => return Err(format!("no row {id} in {table}").into()),
                _ => println!("deleted {table} {id}"),
            }
        }
        StoreAction::Path => {
            let options = StoreOptions::from_config(&config)?;
            println!("{}", options.location);
        }
        StoreAction::Reset { yes } => {
            if !yes {
                return Err("refusing to delete the local database without --yes".into());
            }
            let store = LocalStore::new(StoreOptions::from_config(&config)?);
            store.delete_database_file()?;
            println!("local database deleted");
        }
    }
    Ok(())
}

/// Integer ids for auto-increment tables, text otherwise.
fn parse_id(table: &str, id: &str) -> Value {
    let auto_increment = schema::table(table)
        .map(|def| def.identity == schema::IdentityKind::AutoIncrement)
        .unwrap_or(true);
    match id.parse::<i64>() {
        Ok(n) if auto_increment => Value::from(n),
        _ => Value::from(id),
    }
}
