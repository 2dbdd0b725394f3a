//! Ownership of buffers handed across the party boundary.
//!
//! Every buffer a processor returns is an [`EncodedBuffer`]: an owned byte
//! vector the caller holds until it gives the buffer back through
//! `Processor::free_buffer`. The buffer is moved on release, so releasing
//! twice does not compile. The [`BufferLedger`] records what is still out so
//! a host or test harness can detect leaks; the codecs never fail because
//! of outstanding buffers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LEDGER: AtomicU64 = AtomicU64::new(1);

/// Identity of a buffer: issuing ledger plus sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    ledger: u64,
    seq: u64,
}

/// Opaque bytes owned by the caller until released.
///
/// Not `Clone`: there is exactly one owner.
pub struct EncodedBuffer {
    id: BufferId,
    bytes: Vec<u8>,
}

impl EncodedBuffer {
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Explicit byte length of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl AsRef<[u8]> for EncodedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncodedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedBuffer")
            .field("id", &self.id)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

/// Outcome of handing a buffer back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The buffer was not issued by this ledger, or was already accounted.
    Unknown,
}

/// Counters exposed for leak instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct LedgerStats {
    pub issued: u64,
    pub released: u64,
    pub outstanding: usize,
}

/// Tracks buffers a processor has issued and not yet got back.
#[derive(Debug)]
pub struct BufferLedger {
    ledger: u64,
    next_seq: u64,
    outstanding: HashSet<u64>,
    issued: u64,
    released: u64,
}

impl BufferLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: NEXT_LEDGER.fetch_add(1, Ordering::Relaxed),
            next_seq: 0,
            outstanding: HashSet::new(),
            issued: 0,
            released: 0,
        }
    }

    /// Take ownership of `bytes` and hand them out as a tracked buffer.
    pub fn issue(&mut self, bytes: Vec<u8>) -> EncodedBuffer {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outstanding.insert(seq);
        self.issued += 1;
        EncodedBuffer {
            id: BufferId {
                ledger: self.ledger,
                seq,
            },
            bytes,
        }
    }

    /// Accept a buffer back and drop its bytes.
    pub fn release(&mut self, buffer: EncodedBuffer) -> Release {
        let id = buffer.id;
        drop(buffer);

        if id.ledger != self.ledger || !self.outstanding.remove(&id.seq) {
            return Release::Unknown;
        }
        self.released += 1;
        Release::Released
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            issued: self.issued,
            released: self.released,
            outstanding: self.outstanding.len(),
        }
    }
}

impl Default for BufferLedger {
    fn default() -> Self {
        Self::new()
    }
}
