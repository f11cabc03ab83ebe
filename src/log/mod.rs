//! Per-slot prepare/commit accounting.
//!
//! A `BatchKey` names a consensus slot; `MessageBatch` is the ledger of
//! per-slot vote counters the core state machine drives through its three
//! phases.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::Digest;
use crate::error::*;
use crate::ordering::SeqN;

/// Identifies a consensus slot: the content hash of the operation being
/// ordered, the sequence number assigned to it, and the view under which
/// it was proposed.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BatchKey {
    ops_hash: Digest,
    seq_n: SeqN,
    view_number: u32,
}

impl BatchKey {
    /// Builds a new `BatchKey`.
    pub fn new(ops_hash: Digest, seq_n: SeqN, view_number: u32) -> Self {
        Self {
            ops_hash,
            seq_n,
            view_number,
        }
    }

    /// The operation hash this slot orders.
    pub fn ops_hash(&self) -> Digest {
        self.ops_hash
    }

    /// The sequence number assigned to this slot.
    pub fn seq_n(&self) -> SeqN {
        self.seq_n
    }

    /// The view under which this slot was opened.
    pub fn view_number(&self) -> u32 {
        self.view_number
    }

    /// Hashes this key's fields into the identifier used to index
    /// `MessageBatch`.
    pub fn digest(&self) -> Digest {
        let mut buf = Vec::with_capacity(Digest::LENGTH + 4 + 4 + 4);
        buf.extend_from_slice(self.ops_hash.as_ref());
        buf.extend_from_slice(&self.seq_n.counter().to_be_bytes());
        buf.extend_from_slice(&self.view_number.to_be_bytes());
        Digest::of(&buf)
    }
}

/// The lifecycle state of a single consensus slot.
///
/// Deliberately does not record *which* hosts voted — a Byzantine replica
/// sending multiple `Prepare`/`Commit` messages for the same slot will
/// inflate these counters. Keying the counters on sender identity would
/// fix this; this crate keeps the behavior observable instead of silently
/// patching it, matching the source this spec is modeled on.
#[derive(Debug, Copy, Clone, Default)]
pub struct SlotEntry {
    prepare_count: u32,
    commit_count: u32,
    prepare_sent: bool,
    commit_sent: bool,
    committed: bool,
}

impl SlotEntry {
    /// Number of `Prepare` messages accounted for so far.
    pub fn prepare_count(&self) -> u32 {
        self.prepare_count
    }

    /// Number of `Commit` messages accounted for so far.
    pub fn commit_count(&self) -> u32 {
        self.commit_count
    }

    /// Whether this replica has already broadcast its own `Prepare` for
    /// this slot.
    pub fn prepare_sent(&self) -> bool {
        self.prepare_sent
    }

    /// Whether this replica has already broadcast its own `Commit` for
    /// this slot.
    pub fn commit_sent(&self) -> bool {
        self.commit_sent
    }

    /// Whether this slot has already reached commit quorum.
    pub fn committed(&self) -> bool {
        self.committed
    }
}

/// The per-slot vote ledger. Keyed by `BatchKey::digest()`.
#[derive(Default)]
pub struct MessageBatch {
    slots: HashMap<Digest, SlotEntry>,
    bindings: HashMap<(SeqN, u32), Digest>,
}

impl MessageBatch {
    /// Builds an empty `MessageBatch`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforces the "no equivocation" invariant: a `(seqN, view)` pair may
    /// only ever be bound to one `opsHash`.
    ///
    /// `BatchKey::digest()` folds `opsHash` into the slot identifier, so a
    /// second `PrePrepare` for the same `(seqN, view)` but a *different*
    /// `opsHash` hashes to a distinct slot digest and would otherwise sail
    /// straight past `add_message`/`contains_message` as if it named a
    /// brand-new slot. This binding table is the independent index callers
    /// must consult first; see `consensus::Replica::handle_pre_prepare`.
    ///
    /// Idempotent for a repeated `PrePrepare` of the same `(seqN, view,
    /// opsHash)`. Fails with `ErrorKind::DuplicateSlot` if `(seqN, view)`
    /// is already bound to a different `opsHash`.
    pub fn bind_ops_hash(&mut self, key: &BatchKey) -> Result<()> {
        let index = (key.seq_n(), key.view_number());
        match self.bindings.get(&index) {
            Some(bound) if *bound != key.ops_hash() => Err("(seqN, view) already bound to a different opsHash")
                .simple_msg(ErrorKind::DuplicateSlot, "equivocating pre-prepare"),
            Some(_) => Ok(()),
            None => {
                self.bindings.insert(index, key.ops_hash());
                Ok(())
            }
        }
    }

    /// Opens a new slot for `key`.
    ///
    /// Fails with `ErrorKind::DuplicateSlot` if the slot is already open.
    /// Does not itself enforce no-equivocation — callers must call
    /// `bind_ops_hash` first, see `consensus::Replica::handle_pre_prepare`.
    pub fn add_message(&mut self, key: &BatchKey) -> Result<()> {
        let digest = key.digest();
        if self.slots.contains_key(&digest) {
            return Err("slot already open")
                .simple_msg(ErrorKind::DuplicateSlot, "slot already open");
        }
        self.slots.insert(digest, SlotEntry::default());
        Ok(())
    }

    /// Whether a slot has been opened for `key`.
    pub fn contains_message(&self, key: &BatchKey) -> bool {
        self.slots.contains_key(&key.digest())
    }

    /// Returns the current entry for `key`, if the slot is open.
    pub fn entry(&self, key: &BatchKey) -> Option<&SlotEntry> {
        self.slots.get(&key.digest())
    }

    /// Marks this replica as having broadcast its `Prepare` for `key`.
    pub fn mark_prepare_sent(&mut self, key: &BatchKey) -> Result<()> {
        let entry = self.entry_mut(key)?;
        entry.prepare_sent = true;
        Ok(())
    }

    /// Marks this replica as having broadcast its `Commit` for `key`.
    pub fn mark_commit_sent(&mut self, key: &BatchKey) -> Result<()> {
        let entry = self.entry_mut(key)?;
        entry.commit_sent = true;
        Ok(())
    }

    /// Marks `key`'s slot as committed. Idempotent only at the call site:
    /// callers must check `committed()` before invoking this, since the
    /// spec requires single-shot emission of `CommittedNotification`.
    pub fn mark_committed(&mut self, key: &BatchKey) -> Result<()> {
        let entry = self.entry_mut(key)?;
        entry.committed = true;
        Ok(())
    }

    /// Accounts for an inbound `Prepare` for `key`, returning the new
    /// count.
    ///
    /// Fails with `ErrorKind::UnknownSlot` if the slot hasn't been opened
    /// yet (the `Prepare` arrived before its `PrePrepare`).
    pub fn add_prepare_message(&mut self, key: &BatchKey) -> Result<u32> {
        let entry = self.entry_mut(key)?;
        entry.prepare_count += 1;
        Ok(entry.prepare_count)
    }

    /// Accounts for an inbound `Commit` for `key`, returning the new
    /// count. Same failure mode as `add_prepare_message`.
    pub fn add_commit_message(&mut self, key: &BatchKey) -> Result<u32> {
        let entry = self.entry_mut(key)?;
        entry.commit_count += 1;
        Ok(entry.commit_count)
    }

    fn entry_mut(&mut self, key: &BatchKey) -> Result<&mut SlotEntry> {
        self.slots
            .get_mut(&key.digest())
            .ok_or(())
            .simple_msg(ErrorKind::UnknownSlot, "slot not open")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use crate::view::Host;

    fn host(port: u16) -> Host {
        Host::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn key(counter: u32, view_number: u32) -> BatchKey {
        BatchKey::new(Digest::of(b"op"), SeqN::new(counter, host(1)), view_number)
    }

    #[test]
    fn opening_twice_fails() {
        let mut mb = MessageBatch::new();
        let k = key(1, 1);
        mb.add_message(&k).unwrap();
        assert_eq!(
            mb.add_message(&k).unwrap_err().kind(),
            ErrorKind::DuplicateSlot
        );
    }

    #[test]
    fn prepare_before_preprepare_fails() {
        let mut mb = MessageBatch::new();
        let k = key(1, 1);
        assert_eq!(
            mb.add_prepare_message(&k).unwrap_err().kind(),
            ErrorKind::UnknownSlot
        );
    }

    #[test]
    fn counts_accumulate_independently_per_slot() {
        let mut mb = MessageBatch::new();
        let k = key(1, 1);
        mb.add_message(&k).unwrap();
        assert_eq!(mb.add_prepare_message(&k).unwrap(), 1);
        assert_eq!(mb.add_prepare_message(&k).unwrap(), 2);
        assert_eq!(mb.add_commit_message(&k).unwrap(), 1);
        assert_eq!(mb.entry(&k).unwrap().prepare_count(), 2);
        assert_eq!(mb.entry(&k).unwrap().commit_count(), 1);
    }

    #[test]
    fn differing_view_numbers_hash_to_distinct_slots() {
        let mut mb = MessageBatch::new();
        mb.add_message(&key(1, 1)).unwrap();
        // same seqN counter and ops hash, different view: distinct slot
        assert!(mb.add_message(&key(1, 2)).is_ok());
    }

    #[test]
    fn binding_rejects_a_second_ops_hash_for_the_same_slot() {
        let mut mb = MessageBatch::new();
        let k1 = key(1, 1);
        let k2 = BatchKey::new(Digest::of(b"different-op"), k1.seq_n(), k1.view_number());

        mb.bind_ops_hash(&k1).unwrap();
        assert_eq!(
            mb.bind_ops_hash(&k2).unwrap_err().kind(),
            ErrorKind::DuplicateSlot
        );
    }

    #[test]
    fn binding_is_idempotent_for_a_repeated_ops_hash() {
        let mut mb = MessageBatch::new();
        let k = key(1, 1);
        mb.bind_ops_hash(&k).unwrap();
        assert!(mb.bind_ops_hash(&k).is_ok());
    }
}
