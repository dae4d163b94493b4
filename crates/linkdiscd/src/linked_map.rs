//! Insertion-ordered map with O(1) reordering.
//!
//! `LinkedMap` keeps a doubly linked list threaded through a `HashMap`:
//! every node stores the keys of its neighbours, so `remove`, `prepend`,
//! `append`, `move_to_front` and `move_to_back` are all O(1) and iteration
//! follows list order.
//!
//! Lookups never create entries; every mutation of an absent key is
//! reported back to the caller instead of being applied.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Node<K, V> {
    value: V,
    prev: Option<K>,
    next: Option<K>,
}

/// Hash map whose iteration order is an explicit, reorderable list.
///
/// # Example
///
/// ```
/// use sonic_linkdiscd::LinkedMap;
///
/// let mut map = LinkedMap::new();
/// map.append("a", 1);
/// map.append("b", 2);
/// map.prepend("c", 3);
/// assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["c", "a", "b"]);
///
/// map.move_to_back(&"c");
/// assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);
/// ```
#[derive(Debug, Clone)]
pub struct LinkedMap<K, V> {
    nodes: HashMap<K, Node<K, V>>,
    head: Option<K>,
    tail: Option<K>,
}

impl<K, V> LinkedMap<K, V>
where
    K: Copy + Eq + Hash,
{
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the map contains the given key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// Returns a reference to the value for the given key.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.nodes.get(key).map(|n| &n.value)
    }

    /// Returns a mutable reference to the value for the given key.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.nodes.get_mut(key).map(|n| &mut n.value)
    }

    /// Returns the first entry in list order.
    pub fn front(&self) -> Option<(&K, &V)> {
        let key = self.head.as_ref()?;
        self.nodes.get(key).map(|n| (key, &n.value))
    }

    /// Inserts at the front. An existing key has its value replaced and is
    /// moved to the front; the old value is returned.
    pub fn prepend(&mut self, key: K, value: V) -> Option<V> {
        let old = self.remove(&key);
        self.nodes.insert(
            key,
            Node {
                value,
                prev: None,
                next: None,
            },
        );
        self.link_front(key);
        old
    }

    /// Inserts at the back. An existing key has its value replaced and is
    /// moved to the back; the old value is returned.
    pub fn append(&mut self, key: K, value: V) -> Option<V> {
        let old = self.remove(&key);
        self.nodes.insert(
            key,
            Node {
                value,
                prev: None,
                next: None,
            },
        );
        self.link_back(key);
        old
    }

    /// Removes a key, returning its value if it was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.nodes.contains_key(key) {
            return None;
        }
        self.unlink(key);
        self.nodes.remove(key).map(|n| n.value)
    }

    /// Moves an existing key to the front. Returns false if absent.
    pub fn move_to_front(&mut self, key: &K) -> bool {
        if !self.nodes.contains_key(key) {
            return false;
        }
        if self.head.as_ref() != Some(key) {
            self.unlink(key);
            self.link_front(*key);
        }
        true
    }

    /// Moves an existing key to the back. Returns false if absent.
    pub fn move_to_back(&mut self, key: &K) -> bool {
        if !self.nodes.contains_key(key) {
            return false;
        }
        if self.tail.as_ref() != Some(key) {
            self.unlink(key);
            self.link_back(*key);
        }
        true
    }

    /// Iterates entries in list order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            cursor: self.head,
            remaining: self.nodes.len(),
        }
    }

    /// Iterates keys in list order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    // Detach a present node from its neighbours; the node itself stays in
    // `nodes` with stale links until relinked or removed.
    fn unlink(&mut self, key: &K) {
        let (prev, next) = match self.nodes.get(key) {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes.get_mut(&n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn link_front(&mut self, key: K) {
        let old_head = self.head;
        if let Some(node) = self.nodes.get_mut(&key) {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.nodes.get_mut(&h) {
                    node.prev = Some(key);
                }
            }
            None => self.tail = Some(key),
        }
        self.head = Some(key);
    }

    fn link_back(&mut self, key: K) {
        let old_tail = self.tail;
        if let Some(node) = self.nodes.get_mut(&key) {
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(node) = self.nodes.get_mut(&t) {
                    node.next = Some(key);
                }
            }
            None => self.head = Some(key),
        }
        self.tail = Some(key);
    }
}

impl<K, V> Default for LinkedMap<K, V>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [`LinkedMap`] in list order.
pub struct Iter<'a, K, V> {
    map: &'a LinkedMap<K, V>,
    cursor: Option<K>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Copy + Eq + Hash,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let (k, node) = self.map.nodes.get_key_value(&key)?;
        self.cursor = node.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((k, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
