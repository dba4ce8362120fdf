//! In-memory event log.

use crate::entity::DocumentEntity;
use crate::error::{LogError, LogResult};
use crate::event::Event;
use crate::log::EventLog;
use crate::validate::{validate_append, validate_new_entity};
use async_trait::async_trait;
use indexmap::IndexMap;
use notary_core::EntityId;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Event log held in process memory. Each operation runs under one lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    entities: Arc<RwLock<IndexMap<EntityId, DocumentEntity>>>,
}

impl InMemoryEventLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered entities
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    /// Check if no entity is registered
    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn create(&self, entity: DocumentEntity) -> LogResult<()> {
        validate_new_entity(&entity)?;
        let mut entities = self.entities.write().await;
        if entities.contains_key(&entity.id) {
            return Err(LogError::AlreadyExists {
                entity_id: entity.id,
            });
        }
        entities.insert(entity.id, entity);
        Ok(())
    }

    async fn read(&self, entity_id: EntityId) -> LogResult<DocumentEntity> {
        self.entities
            .read()
            .await
            .get(&entity_id)
            .cloned()
            .ok_or(LogError::EntityNotFound { entity_id })
    }

    async fn append(
        &self,
        entity_id: EntityId,
        expected_version: u64,
        event: Event,
    ) -> LogResult<u64> {
        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(&entity_id)
            .ok_or(LogError::EntityNotFound { entity_id })?;

        if entity.version != expected_version {
            return Err(LogError::ConcurrentAppendConflict {
                entity_id,
                expected: expected_version,
                actual: entity.version,
            });
        }
        validate_append(entity, &event)?;
        Ok(entity.push(event))
    }

    async fn entity_ids(&self) -> LogResult<Vec<EntityId>> {
        Ok(self.entities.read().await.keys().copied().collect())
    }
}
