//! Channel mapping table
//!
//! A directed adjacency structure from source channels to ordered sets of
//! destination channels. Entries are created lazily on the first mapping for
//! a source, destinations keep insertion order, and the table is only ever
//! released in bulk at teardown.

use std::collections::HashMap;

use crate::channel::ChannelId;
use crate::error::RouterError;

/// Directed channel routing graph
#[derive(Debug, Default)]
pub struct MappingTable {
    map: HashMap<ChannelId, Vec<ChannelId>>,
}

impl MappingTable {
    /// Create an empty mapping table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping edge from `from` to `to`
    ///
    /// Idempotent: mapping the same pair twice leaves a single destination
    /// entry. A source may fan out to any number of destinations; the
    /// destination list keeps insertion order. On allocation failure the
    /// affected destination list is reset to empty and the error is fatal
    /// for the caller.
    pub fn map_channel(&mut self, from: ChannelId, to: ChannelId) -> Result<(), RouterError> {
        if let Some(destinations) = self.map.get_mut(&from) {
            if destinations.contains(&to) {
                return Ok(());
            }
            if let Err(e) = destinations.try_reserve(1) {
                destinations.clear();
                return Err(e.into());
            }
            destinations.push(to);
            return Ok(());
        }

        self.map.try_reserve(1)?;
        let mut destinations = Vec::new();
        destinations.try_reserve(1)?;
        destinations.push(to);
        self.map.insert(from, destinations);
        Ok(())
    }

    /// Look up the destinations mapped to a source channel
    ///
    /// A channel without a mapping entry is a valid sink-only channel; the
    /// lookup returns an empty slice, not an error.
    pub fn lookup(&self, from: ChannelId) -> &[ChannelId] {
        self.map.get(&from).map_or(&[], Vec::as_slice)
    }

    /// Number of distinct source channels with at least one destination
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the table holds no mappings
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Release all entries
    pub fn clear(&mut self) {
        self.map = HashMap::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::BackendId;

    fn ch(token: u64) -> ChannelId {
        ChannelId::new(BackendId(0), token)
    }

    #[test]
    fn test_map_is_idempotent() {
        let mut table = MappingTable::new();

        table.map_channel(ch(1), ch(2)).unwrap();
        table.map_channel(ch(1), ch(2)).unwrap();

        assert_eq!(table.lookup(ch(1)), &[ch(2)]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_destinations_keep_insertion_order() {
        let mut table = MappingTable::new();

        table.map_channel(ch(1), ch(3)).unwrap();
        table.map_channel(ch(1), ch(2)).unwrap();
        table.map_channel(ch(1), ch(4)).unwrap();

        assert_eq!(table.lookup(ch(1)), &[ch(3), ch(2), ch(4)]);
    }

    #[test]
    fn test_unmapped_source_yields_empty_set() {
        let table = MappingTable::new();
        assert!(table.lookup(ch(9)).is_empty());
    }

    #[test]
    fn test_clear_releases_all_entries() {
        let mut table = MappingTable::new();
        table.map_channel(ch(1), ch(2)).unwrap();
        table.map_channel(ch(3), ch(4)).unwrap();

        table.clear();

        assert!(table.is_empty());
        assert!(table.lookup(ch(1)).is_empty());
    }
}
