//! Continuation-signature backup across history edits.
//!
//! Editing a message and regenerating truncates the conversation from a
//! cut point, and the truncated turns may carry opaque continuation
//! signatures the provider expects to see again if the edit is undone.
//! The store stashes those signatures keyed by the cut index; restoring
//! consumes the backup, so a stale second restore cannot resurrect
//! signatures that were already reapplied.

use std::collections::HashMap;

use polylm_core::SignatureMergePolicy;

/// One backed-up signature with enough addressing to reattach it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureBackup {
    /// Index of the turn the signature belonged to.
    pub turn_index: usize,
    /// Index of the content part it was scoped to, if part-scoped.
    pub part_index: Option<usize>,
    /// The merge policy the signature carried.
    pub policy: SignatureMergePolicy,
    /// The opaque signature blob.
    pub data: String,
}

/// Signature backups keyed by history cut point.
#[derive(Debug, Default)]
pub struct SignatureStore {
    backups: HashMap<usize, Vec<SignatureBackup>>,
}

impl SignatureStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stashes the signatures removed by a truncation at `cut_index`.
    ///
    /// A repeated truncation at the same cut replaces the previous
    /// backup; the newer edit's view of history wins.
    pub fn backup(&mut self, cut_index: usize, entries: Vec<SignatureBackup>) {
        if entries.is_empty() {
            self.backups.remove(&cut_index);
            return;
        }
        self.backups.insert(cut_index, entries);
    }

    /// Takes the backup for `cut_index`, consuming it.
    ///
    /// Returns `None` when there is nothing to restore, including after
    /// a previous restore of the same cut.
    pub fn restore(&mut self, cut_index: usize) -> Option<Vec<SignatureBackup>> {
        self.backups.remove(&cut_index)
    }

    /// Discards a backup without restoring it.
    pub fn discard(&mut self, cut_index: usize) {
        self.backups.remove(&cut_index);
    }

    /// Drops all backups, for a session switch.
    pub fn clear(&mut self) {
        self.backups.clear();
    }

    /// Whether a backup exists for `cut_index`.
    pub fn has_backup(&self, cut_index: usize) -> bool {
        self.backups.contains_key(&cut_index)
    }
}
