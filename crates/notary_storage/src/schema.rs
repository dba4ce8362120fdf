//! Table layout.
//!
//! Values are JSON. Rows that need a stable order carry a sequence number
//! drawn from the `meta` table inside the inserting transaction.

use crate::error::{db_err, StorageResult};
use notary_log::DocumentEntity;
use notary_queue::Job;
use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

/// entity id -> [`EntityRow`]
pub const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

/// job id -> [`JobRow`]
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// dedupe key -> job id of the non-terminal job holding it
pub const ACTIVE_DEDUPE: TableDefinition<&str, &str> = TableDefinition::new("active_dedupe");

/// (available_at ms, job seq) -> job id, for every non-terminal job
pub const CLAIMABLE: TableDefinition<(i64, u64), &str> = TableDefinition::new("claimable");

/// job id -> JSON list of runs
pub const JOB_RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("job_runs");

/// flag name -> enabled
pub const FLAGS: TableDefinition<&str, bool> = TableDefinition::new("flags");

/// counter name -> last value
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Stored entity with its creation order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow {
    /// Insertion order
    pub seq: u64,
    /// Entity snapshot
    pub entity: DocumentEntity,
}

/// Stored job with its insertion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    /// Insertion order
    pub seq: u64,
    /// Job record
    pub job: Job,
}

/// Take the next value of a named counter
///
/// # Errors
///
/// Returns error if the meta table cannot be read or written
pub fn next_seq(txn: &WriteTransaction, counter: &str) -> StorageResult<u64> {
    let mut meta = txn.open_table(META).map_err(db_err)?;
    let next = meta
        .get(counter)
        .map_err(db_err)?
        .map_or(0, |v| v.value())
        + 1;
    meta.insert(counter, next).map_err(db_err)?;
    Ok(next)
}

/// Create every table so read transactions never see a missing one
///
/// # Errors
///
/// Returns error if a table cannot be opened
pub fn create_tables(txn: &WriteTransaction) -> StorageResult<()> {
    txn.open_table(ENTITIES).map_err(db_err)?;
    txn.open_table(JOBS).map_err(db_err)?;
    txn.open_table(ACTIVE_DEDUPE).map_err(db_err)?;
    txn.open_table(CLAIMABLE).map_err(db_err)?;
    txn.open_table(JOB_RUNS).map_err(db_err)?;
    txn.open_table(FLAGS).map_err(db_err)?;
    txn.open_table(META).map_err(db_err)?;
    Ok(())
}
