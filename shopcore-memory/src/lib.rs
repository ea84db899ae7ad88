//! In-memory implementation of the ShopCore storage seam.
//!
//! Single-process and lock-based: one `RwLock` pair guards the stream map
//! and the version map. `append` takes both write locks, checks every
//! precondition, and only then writes, so a multi-stream batch is atomic
//! and readers can never observe a torn write.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use shopcore::errors::{StoreError, StoreResult};
use shopcore::store::{
    EventStore, ExpectedVersion, ReadOptions, StoredEvent, StreamData, StreamEvents,
};
use shopcore::types::{StreamId, StreamVersion, Timestamp};

/// Thread-safe in-memory event store.
///
/// Cloning shares storage, so a clone handed to a task sees the same
/// streams — which is what concurrency tests want.
#[derive(Debug)]
pub struct InMemoryEventStore<E> {
    streams: Arc<RwLock<HashMap<StreamId, Vec<StoredEvent<E>>>>>,
    versions: Arc<RwLock<HashMap<StreamId, StreamVersion>>>,
}

impl<E> Clone for InMemoryEventStore<E> {
    fn clone(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
            versions: Arc::clone(&self.versions),
        }
    }
}

impl<E> InMemoryEventStore<E> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            versions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EventStore for InMemoryEventStore<E>
where
    E: Send + Sync + Clone + 'static,
{
    type Event = E;

    async fn read_streams(
        &self,
        stream_ids: &[StreamId],
        options: &ReadOptions,
    ) -> StoreResult<StreamData<E>> {
        let streams = self.streams.read().expect("lock poisoned");
        let versions = self.versions.read().expect("lock poisoned");

        let mut events = Vec::new();
        let mut read_versions = HashMap::new();

        for stream_id in stream_ids {
            let version = versions
                .get(stream_id)
                .copied()
                .unwrap_or_else(StreamVersion::initial);
            read_versions.insert(stream_id.clone(), version);

            if let Some(stored) = streams.get(stream_id) {
                for event in stored {
                    if let Some(after) = options.after_version {
                        if event.version <= after {
                            continue;
                        }
                    }
                    events.push(event.clone());
                }
            }
        }

        // Event ids are UUIDv7, so this is creation-time order across
        // streams.
        events.sort_by_key(|event| event.event_id);

        if let Some(max) = options.max_events {
            events.truncate(max);
        }

        Ok(StreamData::new(events, read_versions))
    }

    async fn append(
        &self,
        writes: Vec<StreamEvents<E>>,
    ) -> StoreResult<HashMap<StreamId, StreamVersion>> {
        let mut streams = self.streams.write().expect("lock poisoned");
        let mut versions = self.versions.write().expect("lock poisoned");

        // Check every precondition before touching anything.
        for write in &writes {
            let current = versions
                .get(&write.stream_id)
                .copied()
                .unwrap_or_else(StreamVersion::initial);

            match write.expected {
                ExpectedVersion::New => {
                    if versions.contains_key(&write.stream_id) {
                        return Err(StoreError::VersionConflict {
                            stream: write.stream_id.clone(),
                            expected: StreamVersion::initial(),
                            current,
                        });
                    }
                }
                ExpectedVersion::Exact(expected) => {
                    if current != expected {
                        return Err(StoreError::VersionConflict {
                            stream: write.stream_id.clone(),
                            expected,
                            current,
                        });
                    }
                }
                ExpectedVersion::Any => {}
            }
        }

        let mut new_versions = HashMap::new();
        for write in writes {
            let entries = streams.entry(write.stream_id.clone()).or_default();
            let mut version = versions
                .get(&write.stream_id)
                .copied()
                .unwrap_or_else(StreamVersion::initial);

            for event in write.events {
                version = version.next();
                entries.push(StoredEvent::new(
                    event.event_id,
                    write.stream_id.clone(),
                    version,
                    Timestamp::now(),
                    event.payload,
                ));
            }

            versions.insert(write.stream_id.clone(), version);
            new_versions.insert(write.stream_id, version);
        }

        Ok(new_versions)
    }

    async fn stream_version(&self, stream_id: &StreamId) -> StoreResult<Option<StreamVersion>> {
        let versions = self.versions.read().expect("lock poisoned");
        Ok(versions.get(stream_id).copied())
    }
}
