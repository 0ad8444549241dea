//! Selected segment ids

use std::collections::BTreeSet;

/// Ordered set of selected segment ids.
///
/// Id `0` is background and is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSelection {
    ids: BTreeSet<u32>,
}

impl SegmentSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the set changed
    pub fn insert(&mut self, id: u32) -> bool {
        id != 0 && self.ids.insert(id)
    }

    /// Returns `true` if the set changed
    pub fn remove(&mut self, id: u32) -> bool {
        self.ids.remove(&id)
    }

    /// Flip membership of `id`; returns whether it is now selected
    pub fn toggle(&mut self, id: u32) -> bool {
        if self.ids.remove(&id) {
            false
        } else {
            self.insert(id)
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<u32> for SegmentSelection {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut selection = Self::new();
        for id in iter {
            selection.insert(id);
        }
        selection
    }
}
