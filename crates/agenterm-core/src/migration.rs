//! Schema migration registry. Grounded on the same write-to-`.tmp`-then-
//! `rename` durability pattern [`crate::store`] uses for every entity file:
//! `_meta.json` at the state dir root holds `{schema_version, applied}` and
//! is only ever replaced atomically, never edited in place.
//!
//! Migrations are plain functions `fn(&Path) -> Result<()>` that are handed
//! the state directory root and mutate project files under it directly.
//! Each is numbered, applied at most once, and recorded in `applied` so a
//! re-run of `migrate` is a no-op once every registered migration has run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub schema_version: u32,
    pub applied: Vec<u32>,
}

impl Default for Meta {
    fn default() -> Self {
        Self { schema_version: 0, applied: Vec::new() }
    }
}

type MigrationFn = fn(&Path) -> Result<()>;

/// Registered migrations in ascending id order. Empty today: the on-disk
/// layout introduced at schema version 1 is still current, so there is
/// nothing to transform. Add `(NNN, migrate_NNN)` here as the layout
/// changes; ids must stay strictly increasing.
const MIGRATIONS: &[(u32, MigrationFn)] = &[];

/// Highest schema version this binary knows how to produce.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
}

fn meta_path(state_dir: &Path) -> PathBuf {
    state_dir.join("_meta.json")
}

async fn read_meta(state_dir: &Path) -> Result<Meta> {
    let path = meta_path(state_dir);
    if !path.exists() {
        return Ok(Meta::default());
    }
    let raw = tokio::fs::read_to_string(&path).await?;
    if raw.trim().is_empty() {
        return Ok(Meta::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

async fn write_meta(state_dir: &Path, meta: &Meta) -> Result<()> {
    tokio::fs::create_dir_all(state_dir).await?;
    let raw = serde_json::to_string_pretty(meta)?;
    let tmp = meta_path(state_dir).with_extension("json.tmp");
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, meta_path(state_dir)).await?;
    Ok(())
}

/// Applies every registered migration not yet recorded in `_meta.json`, in
/// ascending id order, then records the new high-water mark. Idempotent:
/// running this twice in a row with no new migrations registered is a no-op.
pub async fn migrate(state_dir: &Path) -> Result<MigrationReport> {
    let mut meta = read_meta(state_dir).await?;
    let from_version = meta.schema_version;
    let mut newly_applied = Vec::new();

    for (id, migration) in MIGRATIONS {
        if meta.applied.contains(id) {
            continue;
        }
        migration(state_dir)?;
        meta.applied.push(*id);
        newly_applied.push(*id);
    }

    meta.applied.sort_unstable();
    meta.schema_version = CURRENT_SCHEMA_VERSION;
    write_meta(state_dir, &meta).await?;

    Ok(MigrationReport {
        from_version,
        to_version: meta.schema_version,
        applied: newly_applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_on_fresh_dir_records_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let report = migrate(dir.path()).await.unwrap();
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
        assert!(report.applied.is_empty());

        let meta = read_meta(dir.path()).await.unwrap();
        assert_eq!(meta.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        migrate(dir.path()).await.unwrap();
        let second = migrate(dir.path()).await.unwrap();
        assert!(second.applied.is_empty());
    }
}
