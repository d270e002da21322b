//! Vacuum operations for database maintenance.

use crate::storage::{ABELANA_DIR, DB_FILE, Storage};
use eyre::{Context, Result};
use std::path::Path;

/// Result of a vacuum operation.
#[derive(Debug)]
pub struct VacuumResult {
    /// Size of database before vacuum (bytes).
    pub size_before: u64,
    /// Size of database after vacuum (bytes).
    pub size_after: u64,
    pub user_count: usize,
    pub photo_count: usize,
    pub follow_count: usize,
}

/// Run SQLite VACUUM on the store at `root` and report its size and row counts.
pub fn vacuum(root: &Path) -> Result<VacuumResult> {
    let db_path = root.join(ABELANA_DIR).join(DB_FILE);
    let size_before = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let storage = Storage::open(root).context("Failed to open storage for vacuum")?;
    storage.vacuum().context("Failed to run SQLite vacuum")?;

    let db = storage.db();
    let user_count = db.count_users()?;
    let photo_count = db.count_photos()?;
    let follow_count = db.count_follows()?;

    let size_after = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    log::info!("Vacuumed {}: {} -> {} bytes", db_path.display(), size_before, size_after);

    Ok(VacuumResult {
        size_before,
        size_after,
        user_count,
        photo_count,
        follow_count,
    })
}
