// src/commands/init.rs
//! Database initialization

use crate::cli::DbArgs;
use anyhow::{Context, Result};
use tracing::info;

pub fn cmd_init(db: &DbArgs) -> Result<()> {
    info!("Initializing Bodhi database at: {}", db.db_path);
    bodhi::db::init(&db.db_path)
        .with_context(|| format!("Failed to initialize database at {}", db.db_path))?;
    println!("Database initialized successfully at: {}", db.db_path);
    Ok(())
}
