//! Back-forward list
//!
//! Session history shared by item id between processes. The renderer
//! creates items when a navigation commits; the canonical item payloads
//! live in the process proxy's store, so this list only orders ids and
//! tracks the current index. Going to an item round-trips only the id.

/// Ordered history of back-forward item ids for one page.
#[derive(Debug, Default)]
pub struct BackForwardList {
    entries: Vec<u64>,
    current: Option<usize>,
}

impl BackForwardList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A freshly committed navigation: drop the forward tail, append, and
    /// point at the new item. Ids are unique in the list; a relaunched
    /// renderer restarts its id mint, and the re-minted id replaces the
    /// stale entry it collides with.
    pub fn add_item(&mut self, item_id: u64) {
        if let Some(current) = self.current {
            self.entries.truncate(current + 1);
        }
        if let Some(stale) = self.entries.iter().position(|&id| id == item_id) {
            self.entries.remove(stale);
        }
        self.entries.push(item_id);
        self.current = Some(self.entries.len() - 1);
    }

    /// The renderer committed an existing item (back/forward traversal):
    /// re-point the current index. Unknown ids are tolerated as no-ops.
    pub fn went_to_item(&mut self, item_id: u64) -> bool {
        match self.entries.iter().position(|&id| id == item_id) {
            Some(index) => {
                self.current = Some(index);
                true
            }
            None => false,
        }
    }

    pub fn current_item(&self) -> Option<u64> {
        self.current.map(|index| self.entries[index])
    }

    pub fn back_item(&self) -> Option<u64> {
        let current = self.current?;
        (current > 0).then(|| self.entries[current - 1])
    }

    pub fn forward_item(&self) -> Option<u64> {
        let current = self.current?;
        self.entries.get(current + 1).copied()
    }

    pub fn back_count(&self) -> usize {
        self.current.unwrap_or(0)
    }

    pub fn forward_count(&self) -> usize {
        match self.current {
            Some(current) => self.entries.len() - current - 1,
            None => 0,
        }
    }

    /// Up to `limit` items behind the current one, oldest first.
    pub fn back_list(&self, limit: usize) -> Vec<u64> {
        let Some(current) = self.current else {
            return Vec::new();
        };
        let start = current.saturating_sub(limit);
        self.entries[start..current].to_vec()
    }

    /// Up to `limit` items ahead of the current one, nearest first.
    pub fn forward_list(&self, limit: usize) -> Vec<u64> {
        let Some(current) = self.current else {
            return Vec::new();
        };
        self.entries
            .iter()
            .skip(current + 1)
            .take(limit)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_items_advances_current() {
        let mut list = BackForwardList::new();
        list.add_item(1);
        list.add_item(2);
        list.add_item(3);
        assert_eq!(list.current_item(), Some(3));
        assert_eq!(list.back_item(), Some(2));
        assert_eq!(list.forward_item(), None);
        assert_eq!(list.back_count(), 2);
    }

    #[test]
    fn test_went_to_repoints_index() {
        let mut list = BackForwardList::new();
        list.add_item(1);
        list.add_item(2);
        list.add_item(3);
        assert!(list.went_to_item(1));
        assert_eq!(list.current_item(), Some(1));
        assert_eq!(list.back_item(), None);
        assert_eq!(list.forward_item(), Some(2));
        assert_eq!(list.forward_count(), 2);
    }

    #[test]
    fn test_unknown_item_is_noop() {
        let mut list = BackForwardList::new();
        list.add_item(1);
        assert!(!list.went_to_item(99));
        assert_eq!(list.current_item(), Some(1));
    }

    #[test]
    fn test_commit_after_going_back_truncates_forward_tail() {
        let mut list = BackForwardList::new();
        list.add_item(1);
        list.add_item(2);
        list.add_item(3);
        list.went_to_item(1);
        list.add_item(4);
        assert_eq!(list.current_item(), Some(4));
        assert_eq!(list.forward_item(), None);
        assert_eq!(list.len(), 2);
        assert_eq!(list.back_list(10), vec![1]);
    }

    #[test]
    fn test_colliding_id_replaces_stale_entry() {
        let mut list = BackForwardList::new();
        list.add_item(1);
        list.add_item(2);
        list.add_item(1);
        assert_eq!(list.len(), 2);
        assert_eq!(list.current_item(), Some(1));
        assert_eq!(list.back_item(), Some(2));
    }

    #[test]
    fn test_list_slices() {
        let mut list = BackForwardList::new();
        for id in 1..=5 {
            list.add_item(id);
        }
        list.went_to_item(3);
        assert_eq!(list.back_list(1), vec![2]);
        assert_eq!(list.back_list(10), vec![1, 2]);
        assert_eq!(list.forward_list(10), vec![4, 5]);
    }
}
