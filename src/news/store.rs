use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use super::item::NewsItem;
use crate::common::crypto::{Digest, Hashable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("item {0:?} is already committed")]
    Duplicate(String),
    #[error("out of order append: expected sequence {expected}, got {got:?}")]
    OutOfOrder { expected: u64, got: Option<u64> },
}

/// Committed items, gap-free from 0 and unique by title.
#[derive(Debug, Default)]
pub struct NewsLog {
    items: Vec<NewsItem>,
    index: HashMap<Digest, u64>,
}

impl NewsLog {
    pub fn new() -> Self {
        NewsLog::default()
    }

    pub fn len(&self) -> u64 {
        self.items.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: &NewsItem) -> bool {
        self.index.contains_key(&item.digest())
    }

    pub fn append(&mut self, item: NewsItem) -> Result<(), LogError> {
        let expected = self.len();
        if item.sequence != Some(expected) {
            return Err(LogError::OutOfOrder {
                expected,
                got: item.sequence,
            });
        }
        if self.contains(&item) {
            return Err(LogError::Duplicate(item.title));
        }
        self.index.insert(item.digest(), expected);
        self.items.push(item);
        Ok(())
    }

    pub fn get(&self, sequence: u64) -> Option<&NewsItem> {
        self.items.get(sequence as usize)
    }

    /// Committed items from `sequence` to the end, in order.
    pub fn since(&self, sequence: u64) -> &[NewsItem] {
        let start = (sequence as usize).min(self.items.len());
        &self.items[start..]
    }

    pub fn titles(&self) -> Vec<String> {
        self.items.iter().map(|item| item.title.clone()).collect()
    }
}

/// Sequenced items received ahead of a gap, keyed by sequence number.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    items: BTreeMap<u64, NewsItem>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        PendingBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns false if the slot is already taken. The first item seen for a
    /// sequence number keeps it.
    pub fn insert(&mut self, item: NewsItem) -> bool {
        let Some(sequence) = item.sequence else {
            return false;
        };
        if self.items.contains_key(&sequence) {
            return false;
        }
        self.items.insert(sequence, item);
        true
    }

    pub fn take(&mut self, sequence: u64) -> Option<NewsItem> {
        self.items.remove(&sequence)
    }

    /// Drops everything below `sequence`.
    pub fn prune_below(&mut self, sequence: u64) {
        self.items = self.items.split_off(&sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_enforces_order_and_uniqueness() {
        let mut log = NewsLog::new();

        assert_eq!(log.append(NewsItem::sequenced("a", 0)), Ok(()));
        assert_eq!(
            log.append(NewsItem::sequenced("b", 2)),
            Err(LogError::OutOfOrder { expected: 1, got: Some(2) })
        );
        assert_eq!(
            log.append(NewsItem::new("b")),
            Err(LogError::OutOfOrder { expected: 1, got: None })
        );
        assert_eq!(log.append(NewsItem::sequenced("a", 1)), Err(LogError::Duplicate("a".into())));
        assert_eq!(log.append(NewsItem::sequenced("b", 1)), Ok(()));

        assert_eq!(log.len(), 2);
        assert!(log.contains(&NewsItem::new("b")));
        assert_eq!(log.titles(), vec!["a", "b"]);
    }

    #[test]
    fn test_since_clamps_past_the_end() {
        let mut log = NewsLog::new();
        log.append(NewsItem::sequenced("a", 0)).unwrap();
        log.append(NewsItem::sequenced("b", 1)).unwrap();

        assert_eq!(log.since(1).len(), 1);
        assert_eq!(log.since(1)[0].title, "b");
        assert!(log.since(9).is_empty());
    }

    #[test]
    fn test_pending_keeps_first_item_per_slot() {
        let mut pending = PendingBuffer::new();

        assert!(pending.insert(NewsItem::sequenced("x", 4)));
        assert!(!pending.insert(NewsItem::sequenced("y", 4)));
        assert!(!pending.insert(NewsItem::new("unsequenced")));

        assert_eq!(pending.take(4).map(|item| item.title), Some("x".to_string()));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_prune_below() {
        let mut pending = PendingBuffer::new();
        for (title, sequence) in [("a", 1), ("b", 3), ("c", 5)] {
            pending.insert(NewsItem::sequenced(title, sequence));
        }

        pending.prune_below(3);

        assert_eq!(pending.len(), 2);
        assert!(pending.take(1).is_none());
        assert!(pending.take(3).is_some());
    }
}
