//! Fixed-capacity hash tables with a stable insertion-order cursor.
//!
//! Every node lives in an arena and is linked into two chains at once:
//!
//! ```text
//!  buckets[i] ──► node ──► node ──► None        (bucket chain, head insert)
//!
//!  first ──► node ◄──► node ◄──► node ◄── last  (insertion order, tail insert)
//!                        ▲
//!                     cursor
//! ```
//!
//! Unlinking patches both chains through slot indices, so deleting the
//! element under the cursor is O(1) and never leaves a dangling link.
//! The bucket array is sized once at construction and never rehashed.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{CollectionErrorKind, Result};

/// Maps a key to a bucket in a table of `capacity` buckets.
///
/// Implementations must return a value below `capacity`; reducing an
/// integer form of the key modulo `capacity` is the usual approach.
pub trait HashIndex {
    fn bucket_index(&self, capacity: usize) -> usize;
}

impl HashIndex for u32 {
    fn bucket_index(&self, capacity: usize) -> usize {
        *self as usize % capacity
    }
}

impl HashIndex for Ipv4Addr {
    fn bucket_index(&self, capacity: usize) -> usize {
        u32::from(*self) as usize % capacity
    }
}

impl HashIndex for Ipv6Addr {
    fn bucket_index(&self, capacity: usize) -> usize {
        let folded = self
            .segments()
            .iter()
            .fold(0u32, |acc, s| acc.wrapping_mul(31).wrapping_add(*s as u32));
        folded as usize % capacity
    }
}

impl HashIndex for IpAddr {
    fn bucket_index(&self, capacity: usize) -> usize {
        match self {
            IpAddr::V4(ip) => ip.bucket_index(capacity),
            IpAddr::V6(ip) => ip.bucket_index(capacity),
        }
    }
}

/// Bucket index function supplied as table configuration.
pub type IndexFn<K> = Box<dyn Fn(&K, usize) -> usize + Send + Sync>;

#[derive(Debug)]
struct Node<E> {
    entry: E,
    bucket: usize,
    bucket_prev: Option<usize>,
    bucket_next: Option<usize>,
    list_prev: Option<usize>,
    list_next: Option<usize>,
}

/// Arena shared by [`HashTable`] and [`KeyHashTable`].
#[derive(Debug)]
struct Chains<E> {
    slots: Vec<Option<Node<E>>>,
    free: Vec<usize>,
    buckets: Vec<Option<usize>>,
    first: Option<usize>,
    last: Option<usize>,
    current: Option<usize>,
    len: usize,
}

impl<E> Chains<E> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: vec![None; capacity.max(1)],
            first: None,
            last: None,
            current: None,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn node(&self, slot: usize) -> Option<&Node<E>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<E>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn check_bucket(&self, bucket: usize) -> Result<usize> {
        if bucket >= self.capacity() {
            return Err(CollectionErrorKind::InvalidHashIndex.into());
        }
        Ok(bucket)
    }

    fn find(&self, bucket: usize, matches: impl Fn(&E) -> bool) -> Option<usize> {
        let mut cursor = self.buckets.get(bucket).copied().flatten();
        while let Some(slot) = cursor {
            let node = self.node(slot)?;
            if matches(&node.entry) {
                return Some(slot);
            }
            cursor = node.bucket_next;
        }
        None
    }

    fn insert(&mut self, bucket: usize, entry: E) -> usize {
        let head = self.buckets[bucket];
        let node = Node {
            entry,
            bucket,
            bucket_prev: None,
            bucket_next: head,
            list_prev: self.last,
            list_next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        if let Some(head) = head.and_then(|h| self.node_mut(h)) {
            head.bucket_prev = Some(slot);
        }
        self.buckets[bucket] = Some(slot);

        match self.last {
            Some(tail) => {
                if let Some(tail) = self.node_mut(tail) {
                    tail.list_next = Some(slot);
                }
            }
            None => self.first = Some(slot),
        }
        self.last = Some(slot);
        self.len += 1;
        slot
    }

    /// Unlink `slot` from both chains. A cursor on the removed node moves
    /// to its insertion-order successor.
    fn remove(&mut self, slot: usize) -> Option<E> {
        let node = self.slots.get_mut(slot)?.take()?;

        match node.bucket_prev {
            Some(prev) => {
                if let Some(prev) = self.node_mut(prev) {
                    prev.bucket_next = node.bucket_next;
                }
            }
            None => self.buckets[node.bucket] = node.bucket_next,
        }
        if let Some(next) = node.bucket_next.and_then(|n| self.node_mut(n)) {
            next.bucket_prev = node.bucket_prev;
        }

        match node.list_prev {
            Some(prev) => {
                if let Some(prev) = self.node_mut(prev) {
                    prev.list_next = node.list_next;
                }
            }
            None => self.first = node.list_next,
        }
        match node.list_next {
            Some(next) => {
                if let Some(next) = self.node_mut(next) {
                    next.list_prev = node.list_prev;
                }
            }
            None => self.last = node.list_prev,
        }

        if self.current == Some(slot) {
            self.current = node.list_next;
        }
        self.free.push(slot);
        self.len -= 1;
        Some(node.entry)
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.first = None;
        self.last = None;
        self.current = None;
        self.len = 0;
    }

    fn current_entry(&self) -> Option<&E> {
        self.current.and_then(|s| self.node(s)).map(|n| &n.entry)
    }

    fn current_entry_mut(&mut self) -> Option<&mut E> {
        let slot = self.current?;
        self.node_mut(slot).map(|n| &mut n.entry)
    }

    fn goto_first(&mut self) {
        self.current = self.first;
    }

    fn goto_last(&mut self) {
        self.current = self.last;
    }

    fn goto_next(&mut self) {
        self.current = self
            .current
            .and_then(|s| self.node(s))
            .and_then(|n| n.list_next);
    }

    fn goto_previous(&mut self) {
        self.current = self
            .current
            .and_then(|s| self.node(s))
            .and_then(|n| n.list_prev);
    }

    fn iter(&self) -> ChainIter<'_, E> {
        ChainIter {
            chains: self,
            next: self.first,
        }
    }
}

struct ChainIter<'a, E> {
    chains: &'a Chains<E>,
    next: Option<usize>,
}

impl<'a, E> Iterator for ChainIter<'a, E> {
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.chains.node(self.next?)?;
        self.next = node.list_next;
        Some(&node.entry)
    }
}

/// Hash table keyed by element equality.
///
/// Used for destination sets and multicast group memberships.
pub struct HashTable<T> {
    chains: Chains<T>,
    index: IndexFn<T>,
}

impl<T: PartialEq + HashIndex + 'static> HashTable<T> {
    /// Create a table with `capacity` buckets using the element's
    /// [`HashIndex`] implementation.
    pub fn new(capacity: usize) -> Self {
        Self::with_index_fn(capacity, |e: &T, cap| e.bucket_index(cap))
    }
}

impl<T: PartialEq> HashTable<T> {
    /// Create a table with a custom bucket index function.
    pub fn with_index_fn(
        capacity: usize,
        index: impl Fn(&T, usize) -> usize + Send + Sync + 'static,
    ) -> Self {
        Self {
            chains: Chains::new(capacity),
            index: Box::new(index),
        }
    }

    fn bucket_of(&self, element: &T) -> Result<usize> {
        self.chains
            .check_bucket((self.index)(element, self.chains.capacity()))
    }

    pub fn add_element(&mut self, element: T) -> Result<()> {
        let bucket = self.bucket_of(&element)?;
        if self.chains.find(bucket, |e| *e == element).is_some() {
            return Err(CollectionErrorKind::ElementAlreadyExists.into());
        }
        self.chains.insert(bucket, element);
        Ok(())
    }

    /// Position the cursor on `element`.
    pub fn goto_element(&mut self, element: &T) -> Result<()> {
        let bucket = self.bucket_of(element)?;
        let slot = self
            .chains
            .find(bucket, |e| e == element)
            .ok_or(CollectionErrorKind::ElementNotFound)?;
        self.chains.current = Some(slot);
        Ok(())
    }

    pub fn has_element(&self, element: &T) -> bool {
        self.bucket_of(element)
            .map(|bucket| self.chains.find(bucket, |e| e == element).is_some())
            .unwrap_or(false)
    }

    pub fn delete_element(&mut self, element: &T) -> Result<()> {
        let bucket = self.bucket_of(element)?;
        let slot = self
            .chains
            .find(bucket, |e| e == element)
            .ok_or(CollectionErrorKind::ElementNotFound)?;
        self.chains.remove(slot);
        Ok(())
    }

    /// Remove the element under the cursor; the cursor moves to the next
    /// element in insertion order.
    pub fn delete_current_element(&mut self) -> Result<T> {
        let slot = self
            .chains
            .current
            .ok_or(CollectionErrorKind::NoCurrentElement)?;
        self.chains
            .remove(slot)
            .ok_or_else(|| CollectionErrorKind::NoCurrentElement.into())
    }

    pub fn current_element(&self) -> Option<&T> {
        self.chains.current_entry()
    }

    pub fn has_current_element(&self) -> bool {
        self.chains.current.is_some()
    }

    pub fn goto_first_element(&mut self) {
        self.chains.goto_first();
    }

    pub fn goto_last_element(&mut self) {
        self.chains.goto_last();
    }

    pub fn goto_next_element(&mut self) {
        self.chains.goto_next();
    }

    pub fn goto_previous_element(&mut self) {
        self.chains.goto_previous();
    }

    pub fn clear(&mut self) {
        self.chains.clear();
    }

    pub fn len(&self) -> usize {
        self.chains.len
    }

    pub fn is_empty(&self) -> bool {
        self.chains.len == 0
    }

    /// Iterate in insertion order without moving the cursor.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chains.iter()
    }
}

/// Hash table keyed by an explicit key.
///
/// Used for the accept/ignore filter and the source table.
pub struct KeyHashTable<K, V> {
    chains: Chains<(K, V)>,
    index: IndexFn<K>,
}

impl<K: PartialEq + HashIndex + 'static, V> KeyHashTable<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self::with_index_fn(capacity, |k: &K, cap| k.bucket_index(cap))
    }
}

impl<K: PartialEq, V> KeyHashTable<K, V> {
    pub fn with_index_fn(
        capacity: usize,
        index: impl Fn(&K, usize) -> usize + Send + Sync + 'static,
    ) -> Self {
        Self {
            chains: Chains::new(capacity),
            index: Box::new(index),
        }
    }

    fn bucket_of(&self, key: &K) -> Result<usize> {
        self.chains
            .check_bucket((self.index)(key, self.chains.capacity()))
    }

    fn slot_of(&self, key: &K) -> Result<Option<usize>> {
        let bucket = self.bucket_of(key)?;
        Ok(self.chains.find(bucket, |(k, _)| k == key))
    }

    pub fn add_element(&mut self, key: K, value: V) -> Result<()> {
        let bucket = self.bucket_of(&key)?;
        if self.chains.find(bucket, |(k, _)| *k == key).is_some() {
            return Err(CollectionErrorKind::KeyAlreadyExists.into());
        }
        self.chains.insert(bucket, (key, value));
        Ok(())
    }

    pub fn goto_element(&mut self, key: &K) -> Result<()> {
        let slot = self
            .slot_of(key)?
            .ok_or(CollectionErrorKind::KeyNotFound)?;
        self.chains.current = Some(slot);
        Ok(())
    }

    pub fn has_element(&self, key: &K) -> bool {
        matches!(self.slot_of(key), Ok(Some(_)))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let slot = self.slot_of(key).ok()??;
        self.chains.node(slot).map(|n| &n.entry.1)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = self.slot_of(key).ok()??;
        self.chains.node_mut(slot).map(|n| &mut n.entry.1)
    }

    pub fn delete_element(&mut self, key: &K) -> Result<V> {
        let slot = self
            .slot_of(key)?
            .ok_or(CollectionErrorKind::KeyNotFound)?;
        self.chains
            .remove(slot)
            .map(|(_, v)| v)
            .ok_or_else(|| CollectionErrorKind::KeyNotFound.into())
    }

    pub fn delete_current_element(&mut self) -> Result<(K, V)> {
        let slot = self
            .chains
            .current
            .ok_or(CollectionErrorKind::NoCurrentElement)?;
        self.chains
            .remove(slot)
            .ok_or_else(|| CollectionErrorKind::NoCurrentElement.into())
    }

    pub fn current_key(&self) -> Option<&K> {
        self.chains.current_entry().map(|(k, _)| k)
    }

    pub fn current_element(&self) -> Option<&V> {
        self.chains.current_entry().map(|(_, v)| v)
    }

    pub fn current_element_mut(&mut self) -> Option<&mut V> {
        self.chains.current_entry_mut().map(|(_, v)| v)
    }

    pub fn has_current_element(&self) -> bool {
        self.chains.current.is_some()
    }

    pub fn goto_first_element(&mut self) {
        self.chains.goto_first();
    }

    pub fn goto_last_element(&mut self) {
        self.chains.goto_last();
    }

    pub fn goto_next_element(&mut self) {
        self.chains.goto_next();
    }

    pub fn goto_previous_element(&mut self) {
        self.chains.goto_previous();
    }

    pub fn clear(&mut self) {
        self.chains.clear();
    }

    pub fn len(&self) -> usize {
        self.chains.len
    }

    pub fn is_empty(&self) -> bool {
        self.chains.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.chains.iter().map(|(k, v)| (k, v))
    }
}
