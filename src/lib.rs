//! # lazy-tree
//!
//! An ordered set backed by an unbalanced binary search tree with lazy
//! deletion.
//!
//! Removing an element only tombstones its node: the node stays in the tree
//! at its ordered position and is skipped by every soft (caller-visible)
//! operation. The physical ("hard") structure is reclaimed later, in one
//! pass, by [`LazyTree::collect_garbage`].
//!
//! ## Example
//!
//! ```rust
//! use lazy_tree::LazyTree;
//!
//! let mut tree = LazyTree::new();
//! for x in [5, 3, 8, 1, 4] {
//!     tree.insert(x);
//! }
//!
//! tree.remove(&3).unwrap();
//! assert!(!tree.contains(&3));
//! assert_eq!(tree.len(), 4);
//! assert_eq!(tree.hard_len(), 5);
//!
//! assert_eq!(tree.collect_garbage(), 1);
//! assert_eq!(tree.hard_len(), 4);
//! assert_eq!(tree.iter().copied().collect::<Vec<_>>(), [1, 4, 5, 8]);
//! ```

mod error;

pub use error::{LazyTreeError, Result};

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::iter::FusedIterator;

use tracing::{debug, instrument, trace};

// =============================================================================
// Pointer type
// =============================================================================

/// Index of a node slot in the arena. `NULL` marks an absent child.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Ptr(u32);

impl Ptr {
    const NULL: Ptr = Ptr(u32::MAX);

    #[inline]
    fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    #[inline]
    fn idx(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Side {
    Left,
    Right,
}

impl Side {
    #[inline]
    fn flip(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

// =============================================================================
// Node Arena
// =============================================================================

#[derive(Clone)]
struct Node<T> {
    value: T,
    left: Ptr,
    right: Ptr,
    /// Logically removed, still physically linked.
    tombstone: bool,
}

impl<T> Node<T> {
    #[inline]
    fn child(&self, side: Side) -> Ptr {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    #[inline]
    fn child_mut(&mut self, side: Side) -> &mut Ptr {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Slab of node slots. Every occupied slot is reachable from the tree root
/// exactly once; released slots go on the free list and are reused first.
#[derive(Clone)]
struct NodeArena<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<u32>,
}

impl<T> NodeArena<T> {
    fn new() -> Self {
        Self::with_capacity(0)
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, value: T) -> Ptr {
        let node = Node {
            value,
            left: Ptr::NULL,
            right: Ptr::NULL,
            tombstone: false,
        };

        if let Some(idx) = self.free.pop() {
            debug_assert!(self.slots[idx as usize].is_none());
            self.slots[idx as usize] = Some(node);
            return Ptr(idx);
        }

        let idx = self.slots.len();
        assert!(idx < Ptr::NULL.0 as usize, "node arena exhausted");
        self.slots.push(Some(node));
        Ptr(idx as u32)
    }

    fn release(&mut self, ptr: Ptr) -> Node<T> {
        let node = self.slots[ptr.idx()]
            .take()
            .expect("released node must be occupied");
        self.free.push(ptr.0);
        node
    }

    #[inline]
    fn get(&self, ptr: Ptr) -> &Node<T> {
        self.slots[ptr.idx()]
            .as_ref()
            .expect("linked node must be occupied")
    }

    #[inline]
    fn get_mut(&mut self, ptr: Ptr) -> &mut Node<T> {
        self.slots[ptr.idx()]
            .as_mut()
            .expect("linked node must be occupied")
    }

    /// Push `ptr` and every node reached by repeatedly following `side`.
    fn push_spine(&self, stack: &mut Vec<Ptr>, mut ptr: Ptr, side: Side) {
        while !ptr.is_null() {
            stack.push(ptr);
            ptr = self.get(ptr).child(side);
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    fn shrink_to_fit(&mut self) {
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        let len = self.slots.len();
        self.free.retain(|&idx| (idx as usize) < len);
        self.slots.shrink_to_fit();
        self.free.shrink_to_fit();
    }

    fn memory_usage(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Option<Node<T>>>()
            + self.free.capacity() * std::mem::size_of::<u32>()
    }
}

// =============================================================================
// LazyTree
// =============================================================================

/// An ordered set with lazy deletion.
///
/// - `len()` counts live elements (the soft view)
/// - `hard_len()` counts physical nodes, tombstoned or not (the hard view)
///
/// The tree does no balancing: its shape depends only on insertion order.
/// All walks use explicit stacks, so list-shaped trees are safe at any depth.
pub struct LazyTree<T> {
    nodes: NodeArena<T>,
    root: Ptr,
    len: usize,
    hard_len: usize,
}

impl<T> LazyTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: NodeArena::new(),
            root: Ptr::NULL,
            len: 0,
            hard_len: 0,
        }
    }

    /// Create an empty tree with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: NodeArena::with_capacity(capacity),
            ..Self::new()
        }
    }

    /// Number of live elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of physical nodes, including tombstoned ones.
    #[inline]
    pub fn hard_len(&self) -> usize {
        self.hard_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        trace!(hard_len = self.hard_len, "clearing tree");
        self.nodes.clear();
        self.root = Ptr::NULL;
        self.len = 0;
        self.hard_len = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.nodes.memory_usage()
    }

    /// Release arena capacity left over by [`collect_garbage`](Self::collect_garbage).
    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
    }

    /// Smallest live element.
    ///
    /// Tombstoned nodes are skipped: when the leftmost node is dead, the
    /// search continues into its right subtree, then up to its parent.
    pub fn find_min(&self) -> Result<&T> {
        self.value_at(self.extreme_live(Side::Left))
            .ok_or(LazyTreeError::EmptyTree)
    }

    /// Largest live element.
    pub fn find_max(&self) -> Result<&T> {
        self.value_at(self.extreme_live(Side::Right))
            .ok_or(LazyTreeError::EmptyTree)
    }

    /// Smallest physical element, tombstoned or not.
    pub fn find_min_hard(&self) -> Result<&T> {
        self.value_at(self.extreme_hard(Side::Left))
            .ok_or(LazyTreeError::EmptyTree)
    }

    /// Largest physical element, tombstoned or not.
    pub fn find_max_hard(&self) -> Result<&T> {
        self.value_at(self.extreme_hard(Side::Right))
            .ok_or(LazyTreeError::EmptyTree)
    }

    /// Call `visit` on every live element in ascending order.
    pub fn traverse_soft<F: FnMut(&T)>(&self, mut visit: F) {
        for value in self.iter() {
            visit(value);
        }
    }

    /// Call `visit` on every physical element in ascending order, including
    /// tombstoned ones.
    pub fn traverse_hard<F: FnMut(&T)>(&self, mut visit: F) {
        for (value, _) in self.iter_hard() {
            visit(value);
        }
    }

    /// Ascending iterator over live elements.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            walk: InOrder::new(self),
            remaining: self.len,
        }
    }

    /// Ascending iterator over every physical element, paired with whether
    /// it is live.
    pub fn iter_hard(&self) -> HardIter<'_, T> {
        HardIter {
            walk: InOrder::new(self),
            remaining: self.hard_len,
        }
    }

    /// Physically remove every tombstoned node.
    ///
    /// Nodes are visited post-order. A dead node with at most one child is
    /// replaced by that child. A dead node with two children takes over the
    /// value of the smallest node of its right subtree, which is unlinked in
    /// its place. Returns the number of nodes freed; afterwards
    /// `hard_len() == len()`.
    #[instrument(level = "trace", skip_all)]
    pub fn collect_garbage(&mut self) -> usize {
        // Every physical node beyond the live count is a tombstone.
        if self.hard_len == self.len {
            return 0;
        }

        struct Frame {
            ptr: Ptr,
            parent: Option<(Ptr, Side)>,
            expanded: bool,
        }

        let before = self.hard_len;
        let mut stack: Vec<Frame> = Vec::with_capacity(64);
        stack.push(Frame {
            ptr: self.root,
            parent: None,
            expanded: false,
        });

        while let Some(frame) = stack.last_mut() {
            if !frame.expanded {
                frame.expanded = true;
                let ptr = frame.ptr;
                let node = self.nodes.get(ptr);
                for side in [Side::Right, Side::Left] {
                    let child = node.child(side);
                    if !child.is_null() {
                        stack.push(Frame {
                            ptr: child,
                            parent: Some((ptr, side)),
                            expanded: false,
                        });
                    }
                }
                continue;
            }

            let Frame { ptr, parent, .. } = stack.pop().expect("stack non-empty");
            if !self.nodes.get(ptr).tombstone {
                continue;
            }

            let replacement = self.unlink(ptr);
            match parent {
                None => self.root = replacement,
                Some((parent, side)) => *self.nodes.get_mut(parent).child_mut(side) = replacement,
            }
        }

        debug_assert_eq!(self.hard_len, self.len);
        let reclaimed = before - self.hard_len;
        debug!(reclaimed, len = self.len, hard_len = self.hard_len, "collected garbage");
        reclaimed
    }

    /// Resolve the dead node at `ptr` whose subtrees are already compacted.
    /// Returns the node that now occupies its slot in the parent.
    fn unlink(&mut self, ptr: Ptr) -> Ptr {
        let node = self.nodes.get(ptr);
        let (left, right) = (node.left, node.right);

        if !left.is_null() && !right.is_null() {
            let successor = self.take_min_right(ptr);
            debug_assert!(!successor.tombstone, "compacted subtree holds a tombstone");
            let node = self.nodes.get_mut(ptr);
            node.value = successor.value;
            node.tombstone = false;
            return ptr;
        }

        self.nodes.release(ptr);
        self.hard_len -= 1;
        if left.is_null() {
            right
        } else {
            left
        }
    }

    /// Unlink and return the leftmost node of the right subtree of `ptr`.
    fn take_min_right(&mut self, ptr: Ptr) -> Node<T> {
        let mut link = (ptr, Side::Right);
        let mut cur = self.nodes.get(ptr).right;
        loop {
            let left = self.nodes.get(cur).left;
            if left.is_null() {
                break;
            }
            link = (cur, Side::Left);
            cur = left;
        }

        let min = self.nodes.release(cur);
        *self.nodes.get_mut(link.0).child_mut(link.1) = min.right;
        self.hard_len -= 1;
        min
    }

    /// In-order (or reverse in-order, for `Side::Right`) first live node.
    fn extreme_live(&self, toward: Side) -> Ptr {
        let away = toward.flip();
        let mut stack = Vec::new();
        self.nodes.push_spine(&mut stack, self.root, toward);
        while let Some(ptr) = stack.pop() {
            let node = self.nodes.get(ptr);
            if !node.tombstone {
                return ptr;
            }
            self.nodes.push_spine(&mut stack, node.child(away), toward);
        }
        Ptr::NULL
    }

    fn extreme_hard(&self, toward: Side) -> Ptr {
        let mut cur = self.root;
        while !cur.is_null() {
            let next = self.nodes.get(cur).child(toward);
            if next.is_null() {
                break;
            }
            cur = next;
        }
        cur
    }

    #[inline]
    fn value_at(&self, ptr: Ptr) -> Option<&T> {
        (!ptr.is_null()).then(|| &self.nodes.get(ptr).value)
    }
}

impl<T: Ord> LazyTree<T> {
    /// Insert `value`, returning whether a new live element resulted.
    ///
    /// A tombstoned node holding an equal value is revived in place instead
    /// of allocating, so `hard_len()` is unchanged in that case.
    pub fn insert(&mut self, value: T) -> bool {
        let mut link: Option<(Ptr, Side)> = None;
        let mut cur = self.root;
        while !cur.is_null() {
            let node = self.nodes.get(cur);
            let side = match value.cmp(&node.value) {
                Ordering::Less => Side::Left,
                Ordering::Greater => Side::Right,
                Ordering::Equal => {
                    if !node.tombstone {
                        return false;
                    }
                    self.nodes.get_mut(cur).tombstone = false;
                    self.len += 1;
                    return true;
                }
            };
            link = Some((cur, side));
            cur = node.child(side);
        }

        let ptr = self.nodes.alloc(value);
        match link {
            None => self.root = ptr,
            Some((parent, side)) => *self.nodes.get_mut(parent).child_mut(side) = ptr,
        }
        self.len += 1;
        self.hard_len += 1;
        true
    }

    /// Live element equal to `key`.
    pub fn find<Q>(&self, key: &Q) -> Result<&T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.value_at(self.locate_live(key))
            .ok_or(LazyTreeError::NotFound)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        !self.locate_live(key).is_null()
    }

    /// Tombstone the live element equal to `key`.
    ///
    /// The node stays linked until the next
    /// [`collect_garbage`](Self::collect_garbage).
    pub fn remove<Q>(&mut self, key: &Q) -> Result<()>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let ptr = self.locate_live(key);
        if ptr.is_null() {
            return Err(LazyTreeError::NotFound);
        }
        self.nodes.get_mut(ptr).tombstone = true;
        self.len -= 1;
        Ok(())
    }

    /// Physical node equal to `key`, dead or alive.
    fn locate<Q>(&self, key: &Q) -> Ptr
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root;
        while !cur.is_null() {
            let node = self.nodes.get(cur);
            cur = match key.cmp(node.value.borrow()) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return cur,
            };
        }
        Ptr::NULL
    }

    fn locate_live<Q>(&self, key: &Q) -> Ptr
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let ptr = self.locate(key);
        if ptr.is_null() || self.nodes.get(ptr).tombstone {
            Ptr::NULL
        } else {
            ptr
        }
    }
}

impl<T> Default for LazyTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies the physical structure exactly: tombstones and both counts carry
/// over, so the clone behaves identically under every operation, including
/// [`LazyTree::collect_garbage`].
impl<T: Clone> Clone for LazyTree<T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            root: self.root,
            len: self.len,
            hard_len: self.hard_len,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LazyTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Ord> FromIterator<T> for LazyTree<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tree = Self::new();
        tree.extend(iter);
        tree
    }
}

impl<T: Ord> Extend<T> for LazyTree<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<'a, T> IntoIterator for &'a LazyTree<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// In-order walk over physical nodes.
struct InOrder<'a, T> {
    nodes: &'a NodeArena<T>,
    stack: Vec<Ptr>,
}

impl<'a, T> InOrder<'a, T> {
    fn new(tree: &'a LazyTree<T>) -> Self {
        let mut stack = Vec::new();
        tree.nodes.push_spine(&mut stack, tree.root, Side::Left);
        Self {
            nodes: &tree.nodes,
            stack,
        }
    }

    fn next_node(&mut self) -> Option<&'a Node<T>> {
        let nodes = self.nodes;
        let ptr = self.stack.pop()?;
        let node = nodes.get(ptr);
        nodes.push_spine(&mut self.stack, node.right, Side::Left);
        Some(node)
    }
}

impl<T> Clone for InOrder<'_, T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes,
            stack: self.stack.clone(),
        }
    }
}

/// Iterator over live elements, created by [`LazyTree::iter`].
pub struct Iter<'a, T> {
    walk: InOrder<'a, T>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        while let Some(node) = self.walk.next_node() {
            if node.tombstone {
                continue;
            }
            self.remaining -= 1;
            return Some(&node.value);
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            walk: self.walk.clone(),
            remaining: self.remaining,
        }
    }
}

/// Iterator over every physical element, created by [`LazyTree::iter_hard`].
///
/// Yields `(value, live)`.
pub struct HardIter<'a, T> {
    walk: InOrder<'a, T>,
    remaining: usize,
}

impl<'a, T> Iterator for HardIter<'a, T> {
    type Item = (&'a T, bool);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.walk.next_node()?;
        self.remaining -= 1;
        Some((&node.value, !node.tombstone))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for HardIter<'_, T> {}
impl<T> FusedIterator for HardIter<'_, T> {}

impl<T> Clone for HardIter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            walk: self.walk.clone(),
            remaining: self.remaining,
        }
    }
}


#[cfg(test)]
mod proptests;
