//! Log-lifetime action storage.
//!
//! An [`ActionArena`] owns every [`ActionEvent`] of one log, in log order,
//! along with the indexes replay needs: event time to position, and root or
//! nested call-begin to its matching call-end. Actions are never freed one
//! by one; [`ActionArena::release`] drops them all together.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use ttlog_codec::{LogReader, LogWriter};
use ttlog_core::EventTime;

use crate::action::{ActionEvent, ActionPayload};
use crate::error::LogError;
use crate::source::SourceStore;

/// Owned, append-only sequence of actions.
#[derive(Debug, Default)]
pub struct ActionArena {
    events: Vec<ActionEvent>,
    by_time: HashMap<EventTime, usize>,
    /// Call-begin time -> index of its call-end.
    call_ends: HashMap<EventTime, usize>,
    payload_bytes: usize,
}

impl ActionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ActionEvent> {
        self.events.get(index)
    }

    pub fn events(&self) -> &[ActionEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ActionEvent> {
        self.events.iter()
    }

    /// Position of the action recorded at `time`.
    pub fn index_of(&self, time: EventTime) -> Option<usize> {
        self.by_time.get(&time).copied()
    }

    /// The call-end matching the call begun at `begin`, with its position.
    pub fn matching_end(&self, begin: EventTime) -> Option<(usize, &ActionEvent)> {
        let idx = *self.call_ends.get(&begin)?;
        self.events.get(idx).map(|e| (idx, e))
    }

    /// Heap bytes held by action payloads.
    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    /// Appends an action, returning its position.
    pub fn push(&mut self, event: ActionEvent) -> usize {
        let idx = self.events.len();
        self.by_time.insert(event.time, idx);
        if let ActionPayload::CallEnd(end) = &event.payload {
            self.call_ends.insert(end.matching_begin, idx);
        }
        self.payload_bytes += event.payload.payload_bytes();
        self.events.push(event);
        idx
    }

    /// Drops every action at once, returning the payload bytes released.
    pub fn release(&mut self) -> usize {
        let released = self.payload_bytes;
        tracing::debug!(actions = self.events.len(), bytes = released, "releasing action arena");
        self.events = Vec::new();
        self.by_time = HashMap::new();
        self.call_ends = HashMap::new();
        self.payload_bytes = 0;
        released
    }

    // -------------------------------------------------------------------
    // Log I/O
    // -------------------------------------------------------------------

    /// Parses the next record from `reader` into the arena.
    ///
    /// Returns `None` once the end marker has been read.
    pub fn read_next<R: BufRead>(
        &mut self,
        reader: &mut LogReader<R>,
        sources: &dyn SourceStore,
    ) -> Result<Option<&ActionEvent>, LogError> {
        match ActionEvent::deserialize(reader, sources)? {
            Some(event) => {
                let idx = self.push(event);
                Ok(self.events.get(idx))
            }
            None => Ok(None),
        }
    }

    /// Parses a complete log.
    pub fn read_log<R: BufRead>(input: R, sources: &dyn SourceStore) -> Result<Self, LogError> {
        let mut reader = LogReader::new(input);
        reader.begin_log()?;
        let mut arena = ActionArena::new();
        while arena.read_next(&mut reader, sources)?.is_some() {}
        tracing::debug!(
            actions = arena.len(),
            bytes = arena.payload_bytes(),
            "parsed action log"
        );
        Ok(arena)
    }

    /// Serializes every action as a complete log, returning the transport.
    pub fn write_log<W: Write>(
        &self,
        out: W,
        sources: &mut dyn SourceStore,
    ) -> Result<W, LogError> {
        let mut writer = LogWriter::new(out);
        writer.begin_log()?;
        for event in &self.events {
            event.serialize(&mut writer, sources)?;
        }
        writer.end_log()?;
        Ok(writer.into_inner())
    }
}

impl<'a> IntoIterator for &'a ActionArena {
    type Item = &'a ActionEvent;
    type IntoIter = std::slice::Iter<'a, ActionEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
