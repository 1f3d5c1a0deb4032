//! Run-scoped identity tag table.
//!
//! [`IdentityTagTable`] maps stable logical tags to live runtime handles for
//! one session (recording or replay). Tags are issued in strictly increasing
//! order as previously unseen complex values are first observed. Because
//! recording and a faithful replay observe complex values in the same order,
//! the same tag names the same logical value in both runs even though the
//! underlying handles differ.

use std::collections::HashMap;
use std::hash::Hash;

use indexmap::IndexMap;

use crate::error::CoreError;
use crate::id::IdentityTag;

/// The first tag issued by a fresh table. Tag 0 is never issued.
pub const FIRST_TAG: IdentityTag = IdentityTag(1);

/// Bidirectional tag <-> handle mapping owned by one session.
///
/// Entries are kept in assignment order so two tables can be compared
/// structurally with [`IdentityTagTable::is_isomorphic`].
#[derive(Debug, Clone)]
pub struct IdentityTagTable<H> {
    next: IdentityTag,
    by_tag: IndexMap<IdentityTag, H>,
    by_handle: HashMap<H, IdentityTag>,
}

impl<H: Clone + Eq + Hash> IdentityTagTable<H> {
    /// Creates an empty table.
    pub fn new() -> Self {
        IdentityTagTable {
            next: FIRST_TAG,
            by_tag: IndexMap::new(),
            by_handle: HashMap::new(),
        }
    }

    /// Issues the next tag in strictly increasing order.
    pub fn assign_tag(&mut self) -> IdentityTag {
        let tag = self.next;
        self.next = IdentityTag(tag.0 + 1);
        tag
    }

    /// Registers `handle` under a previously assigned `tag`.
    ///
    /// Tags are never reassigned within a session.
    pub fn bind(&mut self, tag: IdentityTag, handle: H) -> Result<(), CoreError> {
        if tag.0 < FIRST_TAG.0 || tag >= self.next {
            return Err(CoreError::TagOutOfOrder {
                tag,
                expected: self.next,
            });
        }
        if self.by_tag.contains_key(&tag) {
            return Err(CoreError::TagAlreadyBound { tag });
        }
        self.by_handle.entry(handle.clone()).or_insert(tag);
        self.by_tag.insert(tag, handle);
        Ok(())
    }

    /// Returns the tag of `handle`, assigning and binding a new one if the
    /// handle has not been observed before.
    pub fn track(&mut self, handle: H) -> IdentityTag {
        if let Some(tag) = self.by_handle.get(&handle) {
            return *tag;
        }
        let tag = self.assign_tag();
        self.by_handle.insert(handle.clone(), tag);
        self.by_tag.insert(tag, handle);
        tag
    }

    /// Looks up the live handle registered for `tag`.
    pub fn resolve(&self, tag: IdentityTag) -> Result<&H, CoreError> {
        self.by_tag.get(&tag).ok_or(CoreError::UnresolvedTag { tag })
    }

    /// Returns the tag previously registered for `handle`.
    pub fn tag_of(&self, handle: &H) -> Option<IdentityTag> {
        self.by_handle.get(handle).copied()
    }

    /// Tags in the order they were first bound.
    pub fn assignment_order(&self) -> impl Iterator<Item = IdentityTag> + '_ {
        self.by_tag.keys().copied()
    }

    /// The tag the next call to [`assign_tag`](Self::assign_tag) will issue.
    pub fn next_tag(&self) -> IdentityTag {
        self.next
    }

    /// Number of bound tags.
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    /// Whether no tag has been bound.
    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    /// Whether `other` assigned the same tags in the same order.
    ///
    /// Handles are ignored; tables from independent sessions over the same
    /// log are isomorphic even though their handles differ.
    pub fn is_isomorphic<O: Clone + Eq + Hash>(&self, other: &IdentityTagTable<O>) -> bool {
        self.next == other.next && self.assignment_order().eq(other.assignment_order())
    }

    /// Drops every entry. Only called at session teardown.
    pub fn clear(&mut self) {
        self.next = FIRST_TAG;
        self.by_tag.clear();
        self.by_handle.clear();
    }
}

impl<H: Clone + Eq + Hash> Default for IdentityTagTable<H> {
    fn default() -> Self {
        Self::new()
    }
}
