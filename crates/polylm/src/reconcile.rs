//! Cross-provider tool-call identifier reconciliation.
//!
//! Conversation history can contain tool calls recorded under one
//! provider's ID scheme while the active request targets another. The
//! reconciler keeps a bidirectional mapping between sibling IDs so a
//! call keeps one identity across formats: resolving `toolu_abc` for the
//! OpenAI wire yields `call_abc`, and resolving that back yields the
//! original.
//!
//! IDs with no recognized prefix are treated as belonging to the
//! JSON-array dialect, which historically issued bare identifiers; they
//! are preserved verbatim in that column.
//!
//! The table is bounded. Entries are touched on every resolution and the
//! oldest tenth is evicted when the capacity is exceeded, so IDs from
//! long-dead turns cannot grow the table without bound.

use std::collections::HashMap;

use rand::Rng;
use rand::distributions::Alphanumeric;

use polylm_core::WireFormat;

/// Default maximum number of reconciled call identities.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
struct Entry {
    ids: HashMap<WireFormat, String>,
    last_touch: u64,
}

/// Bidirectional, bounded ID mapping across the three wire formats.
#[derive(Debug)]
pub struct IdReconciler {
    entries: HashMap<String, Entry>,
    reverse: HashMap<String, String>,
    capacity: usize,
    touch: u64,
    minted: u64,
}

impl Default for IdReconciler {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl IdReconciler {
    /// Creates a reconciler bounded to `capacity` call identities.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            reverse: HashMap::new(),
            capacity: capacity.max(1),
            touch: 0,
            minted: 0,
        }
    }

    /// Resolves `id` into its sibling for `target`, registering the
    /// identity on first sight.
    ///
    /// Resolution is idempotent: the same input always maps to the same
    /// sibling, and resolving a derived sibling back returns the
    /// original.
    pub fn resolve(&mut self, id: &str, target: WireFormat) -> String {
        self.touch += 1;
        let touch = self.touch;

        let canonical = match self.reverse.get(id) {
            Some(c) => c.clone(),
            None => {
                let (source, canonical) = split_id(id);
                let entry = self.entries.entry(canonical.clone()).or_insert(Entry {
                    ids: HashMap::new(),
                    last_touch: touch,
                });
                entry.ids.entry(source).or_insert_with(|| id.to_string());
                self.reverse.insert(id.to_string(), canonical.clone());
                canonical
            }
        };

        let entry = self
            .entries
            .entry(canonical.clone())
            .or_insert(Entry {
                ids: HashMap::new(),
                last_touch: touch,
            });
        entry.last_touch = touch;

        let resolved = entry
            .ids
            .entry(target)
            .or_insert_with(|| format!("{}{}", target.id_prefix(), canonical))
            .clone();
        self.reverse.entry(resolved.clone()).or_insert(canonical);

        self.evict_if_over_capacity();
        resolved
    }

    /// Mints a fresh, unique ID in `format`, registering it so siblings
    /// resolve consistently.
    ///
    /// Used for fallback-markup calls (which carry no provider ID) and
    /// for dialects that stream calls without identifiers.
    pub fn mint(&mut self, format: WireFormat) -> String {
        self.minted += 1;
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let id = format!("{}{millis:x}{}{suffix}", format.id_prefix(), self.minted);
        // Register so cross-format resolution works from the start.
        let _ = self.resolve(&id, format);
        id
    }

    /// Drops every mapping and resets the touch and mint counters, for a
    /// session switch.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.reverse.clear();
        self.touch = 0;
        self.minted = 0;
    }

    /// Number of IDs minted since the last clear.
    pub fn mint_count(&self) -> u64 {
        self.minted
    }

    /// Number of tracked call identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identities are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_over_capacity(&mut self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let evict_count = (self.capacity / 10).max(1);
        let mut by_age: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_touch))
            .collect();
        by_age.sort_by_key(|(_, touch)| *touch);
        for (canonical, _) in by_age.into_iter().take(evict_count) {
            if let Some(entry) = self.entries.remove(&canonical) {
                for id in entry.ids.values() {
                    self.reverse.remove(id);
                }
            }
        }
        tracing::debug!(len = self.entries.len(), "evicted stale call-id mappings");
    }
}

/// Splits an ID into its source format and canonical remainder.
fn split_id(id: &str) -> (WireFormat, String) {
    match WireFormat::detect(id) {
        Some(format) => (format, id[format.id_prefix().len()..].to_string()),
        None => (WireFormat::Gemini, id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_derivation() {
        let mut r = IdReconciler::default();
        assert_eq!(r.resolve("toolu_abc", WireFormat::OpenAi), "call_abc");
        assert_eq!(r.resolve("toolu_abc", WireFormat::Gemini), "fn_abc");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut r = IdReconciler::default();
        let first = r.resolve("toolu_abc", WireFormat::OpenAi);
        let second = r.resolve("toolu_abc", WireFormat::OpenAi);
        assert_eq!(first, second);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_derived_sibling_resolves_back() {
        let mut r = IdReconciler::default();
        let sibling = r.resolve("toolu_abc", WireFormat::OpenAi);
        assert_eq!(r.resolve(&sibling, WireFormat::Anthropic), "toolu_abc");
    }

    #[test]
    fn test_same_format_returns_original() {
        let mut r = IdReconciler::default();
        assert_eq!(r.resolve("call_xyz", WireFormat::OpenAi), "call_xyz");
    }

    #[test]
    fn test_unprefixed_id_preserved_in_home_column() {
        let mut r = IdReconciler::default();
        // Bare IDs belong to the JSON-array dialect and round-trip as-is.
        assert_eq!(r.resolve("bare123", WireFormat::Gemini), "bare123");
        let sibling = r.resolve("bare123", WireFormat::Anthropic);
        assert_eq!(sibling, "toolu_bare123");
        assert_eq!(r.resolve(&sibling, WireFormat::Gemini), "bare123");
    }

    #[test]
    fn test_mint_is_unique_and_prefixed() {
        let mut r = IdReconciler::default();
        let a = r.mint(WireFormat::Gemini);
        let b = r.mint(WireFormat::Gemini);
        assert!(a.starts_with("fn_"));
        assert!(b.starts_with("fn_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_minted_id_resolves_across_formats() {
        let mut r = IdReconciler::default();
        let id = r.mint(WireFormat::Gemini);
        let sibling = r.resolve(&id, WireFormat::OpenAi);
        assert!(sibling.starts_with("call_"));
        assert_eq!(r.resolve(&sibling, WireFormat::Gemini), id);
    }

    #[test]
    fn test_eviction_bounds_table() {
        let mut r = IdReconciler::with_capacity(10);
        for i in 0..50 {
            let _ = r.resolve(&format!("toolu_{i}"), WireFormat::OpenAi);
        }
        assert!(r.len() <= 10 + 1);
    }

    #[test]
    fn test_touched_entry_survives_eviction() {
        let mut r = IdReconciler::with_capacity(10);
        let _ = r.resolve("toolu_keepme", WireFormat::OpenAi);
        for i in 0..20 {
            // Touch the protected entry between inserts.
            let _ = r.resolve("toolu_keepme", WireFormat::OpenAi);
            let _ = r.resolve(&format!("toolu_{i}"), WireFormat::OpenAi);
        }
        assert_eq!(r.resolve("toolu_keepme", WireFormat::OpenAi), "call_keepme");
        // Still only one identity for it: the mapping was never rebuilt
        // from scratch with a different sibling.
        let again = r.resolve("call_keepme", WireFormat::Anthropic);
        assert_eq!(again, "toolu_keepme");
    }

    #[test]
    fn test_clear_drops_mappings_and_resets_counters() {
        let mut r = IdReconciler::default();
        let _ = r.resolve("toolu_abc", WireFormat::OpenAi);
        let _ = r.mint(WireFormat::Gemini);
        let _ = r.mint(WireFormat::Gemini);
        r.clear();
        assert!(r.is_empty());
        assert_eq!(r.mint_count(), 0);
        let _ = r.mint(WireFormat::Gemini);
        assert_eq!(r.mint_count(), 1);
    }
}
