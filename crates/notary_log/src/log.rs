//! The event log contract shared by every backend.

use crate::entity::DocumentEntity;
use crate::error::LogResult;
use crate::event::Event;
use async_trait::async_trait;
use notary_core::EntityId;

/// Append-only event log keyed by entity.
///
/// Implementations must make `append` atomic: the version check, the
/// validation and the write happen as one step, so two writers holding
/// the same version cannot both succeed.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Register a new entity. Its log must hold exactly one
    /// `document.created` event.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the id is taken, `Rejected` if the
    /// initial log is malformed
    async fn create(&self, entity: DocumentEntity) -> LogResult<()>;

    /// Read a full snapshot of the entity
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` for unknown ids
    async fn read(&self, entity_id: EntityId) -> LogResult<DocumentEntity>;

    /// Append one event if the stored version equals `expected_version`.
    /// Returns the new event count.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentAppendConflict` on version mismatch and
    /// `Rejected` if the event fails validation
    async fn append(
        &self,
        entity_id: EntityId,
        expected_version: u64,
        event: Event,
    ) -> LogResult<u64>;

    /// Every registered entity, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    async fn entity_ids(&self) -> LogResult<Vec<EntityId>>;
}
