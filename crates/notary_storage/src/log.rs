//! `EventLog` on redb.

use crate::error::{db_err, StorageError};
use crate::schema::{next_seq, EntityRow, ENTITIES};
use crate::store::RedbStore;
use async_trait::async_trait;
use notary_core::EntityId;
use notary_log::{
    validate_append, validate_new_entity, DocumentEntity, Event, EventLog, LogError, LogResult,
};
use redb::{ReadableTable, Table};

fn load_entity(
    table: &Table<'_, &'static str, &'static [u8]>,
    entity_id: EntityId,
) -> LogResult<EntityRow> {
    let key = entity_id.to_string();
    let guard = table
        .get(key.as_str())
        .map_err(db_err)?
        .ok_or(LogError::EntityNotFound { entity_id })?;
    Ok(serde_json::from_slice(guard.value()).map_err(StorageError::from)?)
}

#[async_trait]
impl EventLog for RedbStore {
    async fn create(&self, entity: DocumentEntity) -> LogResult<()> {
        validate_new_entity(&entity)?;
        self.write_txn(move |txn| {
            let seq = next_seq(txn, "entities")?;
            let mut table = txn.open_table(ENTITIES).map_err(db_err)?;
            let key = entity.id.to_string();
            if table.get(key.as_str()).map_err(db_err)?.is_some() {
                return Err(LogError::AlreadyExists {
                    entity_id: entity.id,
                });
            }
            let bytes = serde_json::to_vec(&EntityRow { seq, entity }).map_err(StorageError::from)?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn read(&self, entity_id: EntityId) -> LogResult<DocumentEntity> {
        self.read_txn(move |txn| {
            let table = txn.open_table(ENTITIES).map_err(db_err)?;
            let key = entity_id.to_string();
            let guard = table
                .get(key.as_str())
                .map_err(db_err)?
                .ok_or(LogError::EntityNotFound { entity_id })?;
            let row: EntityRow = serde_json::from_slice(guard.value()).map_err(StorageError::from)?;
            Ok(row.entity)
        })
        .await
    }

    async fn append(
        &self,
        entity_id: EntityId,
        expected_version: u64,
        event: Event,
    ) -> LogResult<u64> {
        self.write_txn(move |txn| {
            let mut table = txn.open_table(ENTITIES).map_err(db_err)?;
            let mut row = load_entity(&table, entity_id)?;

            if row.entity.version != expected_version {
                return Err(LogError::ConcurrentAppendConflict {
                    entity_id,
                    expected: expected_version,
                    actual: row.entity.version,
                });
            }
            validate_append(&row.entity, &event)?;
            let version = row.entity.push(event);

            let key = entity_id.to_string();
            let bytes = serde_json::to_vec(&row).map_err(StorageError::from)?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(db_err)?;
            Ok(version)
        })
        .await
    }

    async fn entity_ids(&self) -> LogResult<Vec<EntityId>> {
        self.read_txn(|txn| {
            let table = txn.open_table(ENTITIES).map_err(db_err)?;
            let mut rows: Vec<(u64, EntityId)> = Vec::new();
            for item in table.iter().map_err(db_err)? {
                let (_, value) = item.map_err(db_err)?;
                let row: EntityRow = serde_json::from_slice(value.value()).map_err(StorageError::from)?;
                rows.push((row.seq, row.entity.id));
            }
            rows.sort_unstable_by_key(|(seq, _)| *seq);
            Ok(rows.into_iter().map(|(_, id)| id).collect())
        })
        .await
    }
}
