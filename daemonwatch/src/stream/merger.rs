//! Event log merging
//!
//! Backfill batches and live messages both land here. Events are keyed by
//! snowflake id, so duplicates collapse (first seen wins) and iteration is
//! always ascending by id, whichever side arrived first.

use crate::data::{DisplayFilter, EventEnvelope, SnowflakeId, StreamEvent};

use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct StreamMerger {
    events: BTreeMap<SnowflakeId, StreamEvent>,
    history_limit: Option<usize>,
    discarded: u64,
}

impl StreamMerger {
    pub fn new() -> StreamMerger {
        StreamMerger::default()
    }

    /// Keeps at most `limit` events, dropping the lowest ids first.
    pub fn with_history_limit(limit: Option<usize>) -> StreamMerger {
        StreamMerger {
            history_limit: limit,
            ..Default::default()
        }
    }

    /// Merges a batch of envelopes, discarding anything that is not console
    /// output. Returns how many new events were retained.
    pub fn merge<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = EventEnvelope>,
    {
        let mut added = 0;
        for envelope in batch {
            match envelope.into_stream_event() {
                Some(event) => {
                    if self.insert(event) {
                        added += 1;
                    }
                }
                None => self.discarded += 1,
            }
        }
        self.enforce_limit();
        added
    }

    /// Returns false when an event with the same id is already retained.
    pub fn insert(&mut self, event: StreamEvent) -> bool {
        use std::collections::btree_map::Entry;
        match self.events.entry(event.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(event);
                true
            }
        }
    }

    fn enforce_limit(&mut self) {
        let Some(limit) = self.history_limit else {
            return;
        };
        while self.events.len() > limit {
            self.events.pop_first();
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Envelopes dropped because they were not console output.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn last_id(&self) -> Option<SnowflakeId> {
        self.events.keys().next_back().copied()
    }

    pub fn events(&self) -> impl DoubleEndedIterator<Item = &StreamEvent> + '_ {
        self.events.values()
    }

    pub fn visible<'a>(
        &'a self,
        filter: &'a DisplayFilter,
    ) -> impl DoubleEndedIterator<Item = &'a StreamEvent> + 'a {
        self.events.values().filter(|e| filter.shows(&e.message))
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
