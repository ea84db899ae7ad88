//! Storage seam: an append-only, multi-stream event store.
//!
//! The one non-negotiable property of any implementation is the atomicity of
//! [`EventStore::append`]: a batch of writes spanning several streams either
//! commits as a whole or not at all, and every per-stream expected version
//! must hold at commit time. Order placement leans on this for its
//! "check stock, debit stock, record order, clear cart" step, which must
//! never be partially visible.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StoreResult;
use crate::types::{EventId, StreamId, StreamVersion, Timestamp};

/// An event as it exists in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent<E> {
    /// Globally unique, time-ordered identifier.
    pub event_id: EventId,
    /// The stream this event was appended to.
    pub stream_id: StreamId,
    /// Position of this event within its stream (1-based).
    pub version: StreamVersion,
    /// When the store accepted the event.
    pub recorded_at: Timestamp,
    /// The domain payload.
    pub payload: E,
}

impl<E> StoredEvent<E> {
    /// Assembles a stored event; used by store implementations.
    pub const fn new(
        event_id: EventId,
        stream_id: StreamId,
        version: StreamVersion,
        recorded_at: Timestamp,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_id,
            version,
            recorded_at,
            payload,
        }
    }
}

/// An event not yet accepted by the store.
#[derive(Debug, Clone)]
pub struct EventToWrite<E> {
    /// Pre-minted identifier (UUIDv7).
    pub event_id: EventId,
    /// The domain payload.
    pub payload: E,
}

impl<E> EventToWrite<E> {
    /// Wraps a payload with a fresh event id.
    pub fn new(payload: E) -> Self {
        Self {
            event_id: EventId::new(),
            payload,
        }
    }
}

/// Version precondition attached to a single-stream write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist yet.
    New,
    /// The stream must be at exactly this version.
    Exact(StreamVersion),
    /// No precondition. Audit-style streams only; never stock or orders.
    Any,
}

/// Events destined for one stream, with the precondition that guards them.
#[derive(Debug, Clone)]
pub struct StreamEvents<E> {
    /// Target stream.
    pub stream_id: StreamId,
    /// Version precondition.
    pub expected: ExpectedVersion,
    /// Events to append, in order.
    pub events: Vec<EventToWrite<E>>,
}

impl<E> StreamEvents<E> {
    /// Groups events for a stream under one precondition.
    pub const fn new(
        stream_id: StreamId,
        expected: ExpectedVersion,
        events: Vec<EventToWrite<E>>,
    ) -> Self {
        Self {
            stream_id,
            expected,
            events,
        }
    }
}

/// Everything read back from a set of streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamData<E> {
    /// Events from all requested streams, merged and ordered by event id
    /// (UUIDv7, so effectively by creation time).
    pub events: Vec<StoredEvent<E>>,
    /// The version each requested stream was at, including version zero for
    /// streams that do not exist yet.
    pub versions: HashMap<StreamId, StreamVersion>,
}

impl<E> StreamData<E> {
    /// Bundles events with the versions they were read at.
    pub const fn new(
        events: Vec<StoredEvent<E>>,
        versions: HashMap<StreamId, StreamVersion>,
    ) -> Self {
        Self { events, versions }
    }

    /// The version a given stream was read at (zero when absent).
    pub fn version_of(&self, stream_id: &StreamId) -> StreamVersion {
        self.versions
            .get(stream_id)
            .copied()
            .unwrap_or_else(StreamVersion::initial)
    }

    /// Whether the given stream had any events.
    pub fn stream_exists(&self, stream_id: &StreamId) -> bool {
        self.version_of(stream_id) > StreamVersion::initial()
    }

    /// Events belonging to one of the requested streams.
    pub fn events_for_stream<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> impl Iterator<Item = &'a StoredEvent<E>> + 'a {
        self.events
            .iter()
            .filter(move |event| &event.stream_id == stream_id)
    }
}

/// Options for a read. The defaults read everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Skip events at or below this version.
    pub after_version: Option<StreamVersion>,
    /// Stop after this many events (applied to the merged result).
    pub max_events: Option<usize>,
}

impl ReadOptions {
    /// Read everything.
    pub const fn all() -> Self {
        Self {
            after_version: None,
            max_events: None,
        }
    }

    /// Only events strictly after the given version.
    #[must_use]
    pub const fn after(mut self, version: StreamVersion) -> Self {
        self.after_version = Some(version);
        self
    }

    /// Cap the merged result.
    #[must_use]
    pub const fn limit(mut self, max: usize) -> Self {
        self.max_events = Some(max);
        self
    }
}

/// The storage contract.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The event payload type this store persists.
    type Event: Send + Sync;

    /// Reads all requested streams in one call.
    ///
    /// Returns the merged events plus the version each stream was at, which
    /// callers thread back into [`EventStore::append`] preconditions.
    async fn read_streams(
        &self,
        stream_ids: &[StreamId],
        options: &ReadOptions,
    ) -> StoreResult<StreamData<Self::Event>>;

    /// Appends to any number of streams atomically.
    ///
    /// Every precondition is checked before anything is written; one stale
    /// version fails the whole batch with
    /// [`StoreError::VersionConflict`](crate::errors::StoreError::VersionConflict).
    /// On success, returns the new version of each written stream.
    async fn append(
        &self,
        writes: Vec<StreamEvents<Self::Event>>,
    ) -> StoreResult<HashMap<StreamId, StreamVersion>>;

    /// Current version of a stream, or `None` if it has never been written.
    async fn stream_version(&self, stream_id: &StreamId) -> StoreResult<Option<StreamVersion>>;
}
