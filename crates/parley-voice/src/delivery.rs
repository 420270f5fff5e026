//! In-order delivery of synthesized audio to the transport.
//!
//! Synthesis requests run in parallel and finish in any order. The queue
//! holds early fragments until every lower index has been delivered, so the
//! caller hears replies in the order they were produced.

use std::collections::BTreeMap;

use base64::Engine;
use parley_types::{AudioFragment, OutboundFrame};
use uuid::Uuid;

/// One delivered fragment: the media frame, then the mark frame that the
/// transport echoes back once the audio has played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub token: String,
    pub media: OutboundFrame,
    pub mark: OutboundFrame,
}

impl Delivery {
    pub fn into_frames(self) -> [OutboundFrame; 2] {
        [self.media, self.mark]
    }
}

#[derive(Debug, Default)]
pub struct AudioDeliveryQueue {
    stream_sid: String,
    next_expected: u64,
    /// `None` marks an index whose synthesis produced nothing.
    pending: BTreeMap<u64, Option<Vec<u8>>>,
}

impl AudioDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stream id stamped on outbound frames.
    pub fn bind_stream(&mut self, stream_sid: impl Into<String>) {
        self.stream_sid = stream_sid.into();
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Accepts a fragment and returns everything that became deliverable,
    /// in delivery order.
    ///
    /// Unindexed fragments are delivered at once. Fragments below the next
    /// expected index are stale and dropped.
    pub fn enqueue(&mut self, fragment: AudioFragment) -> Vec<Delivery> {
        match fragment.sequence_index {
            None => vec![self.deliver(&fragment.payload)],
            Some(index) => self.accept(index, Some(fragment.payload)),
        }
    }

    /// Records that `index` has no audio, releasing any fragments queued
    /// behind it.
    pub fn skip(&mut self, index: u64) -> Vec<Delivery> {
        self.accept(index, None)
    }

    /// Drops every buffered fragment and moves past `highest_issued`, so
    /// audio still being synthesized for earlier replies arrives stale.
    /// Returns how many buffered fragments were discarded.
    pub fn interrupt(&mut self, highest_issued: Option<u64>) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        if let Some(highest) = highest_issued {
            self.next_expected = self.next_expected.max(highest + 1);
        }
        dropped
    }

    fn accept(&mut self, index: u64, slot: Option<Vec<u8>>) -> Vec<Delivery> {
        if index < self.next_expected {
            tracing::debug!(index, next = self.next_expected, "dropping stale audio fragment");
            return Vec::new();
        }
        if index > self.next_expected {
            self.pending.entry(index).or_insert(slot);
            return Vec::new();
        }

        let mut out = Vec::new();
        if let Some(payload) = slot {
            out.push(self.deliver(&payload));
        }
        self.next_expected += 1;
        while let Some(slot) = self.pending.remove(&self.next_expected) {
            if let Some(payload) = slot {
                out.push(self.deliver(&payload));
            }
            self.next_expected += 1;
        }
        out
    }

    fn deliver(&self, payload: &[u8]) -> Delivery {
        let token = Uuid::new_v4().to_string();
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        Delivery {
            media: OutboundFrame::media(&self.stream_sid, encoded),
            mark: OutboundFrame::mark(&self.stream_sid, &token),
            token,
        }
    }
}
