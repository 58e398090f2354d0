//! Positional Scheduler
//!
//! Ordered multi-map from an integer position to the items added at that
//! position. Decides in which order enlisted resources take part in each
//! 2PC phase.
//!
//! ## Ordering
//! ```text
//! natural:  ALWAYS_FIRST ... -1  0  1 ... ALWAYS_LAST   (insertion order inside a position)
//! reverse:  ALWAYS_LAST ... 1  0  -1 ... ALWAYS_FIRST   (reversed inside a position too)
//! ```
//!
//! Items are `Arc`s and are removed by identity (`Arc::ptr_eq`), never by
//! value equality.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CoordError, Result};

/// Position that always comes first in natural order
pub const ALWAYS_FIRST_POSITION: i32 = i32::MIN;

/// Position that always comes last in natural order
pub const ALWAYS_LAST_POSITION: i32 = i32::MAX;

pub const DEFAULT_POSITION: i32 = 0;

struct Slots<T> {
    by_position: BTreeMap<i32, Vec<Arc<T>>>,
    /// Item address → position, so removal finds the right bucket directly
    positions: HashMap<usize, i32>,
}

/// Position-ordered collection of shared items
pub struct PositionalScheduler<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> PositionalScheduler<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                by_position: BTreeMap::new(),
                positions: HashMap::new(),
            }),
        }
    }

    /// Add `item` at `position`. Adding the same `Arc` twice is a no-op.
    pub fn add(&self, item: Arc<T>, position: i32) {
        let mut slots = self.slots.lock();
        let key = address(&item);
        if slots.positions.contains_key(&key) {
            return;
        }
        slots.positions.insert(key, position);
        slots.by_position.entry(position).or_default().push(item);
    }

    /// Remove `item` by identity; returns whether it was present
    pub fn remove(&self, item: &Arc<T>) -> bool {
        let mut slots = self.slots.lock();
        let position = match slots.positions.remove(&address(item)) {
            Some(position) => position,
            None => return false,
        };

        let now_empty = match slots.by_position.get_mut(&position) {
            Some(items) => {
                items.retain(|candidate| !Arc::ptr_eq(candidate, item));
                items.is_empty()
            }
            None => false,
        };
        if now_empty {
            slots.by_position.remove(&position);
        }
        true
    }

    pub fn size(&self) -> usize {
        self.slots.lock().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Positions ascending
    pub fn natural_order_positions(&self) -> Vec<i32> {
        self.slots.lock().by_position.keys().copied().collect()
    }

    /// Positions descending
    pub fn reverse_order_positions(&self) -> Vec<i32> {
        self.slots.lock().by_position.keys().rev().copied().collect()
    }

    /// Items at `position`, in insertion order or reversed
    pub fn by_position(&self, position: i32, reverse: bool) -> Vec<Arc<T>> {
        let slots = self.slots.lock();
        let mut items = slots.by_position.get(&position).cloned().unwrap_or_default();
        if reverse {
            items.reverse();
        }
        items
    }

    /// Snapshot of every item in natural order
    pub fn to_vec(&self) -> Vec<Arc<T>> {
        self.iter().collect()
    }

    /// Natural-order iterator that tolerates removal mid-traversal
    pub fn iter(&self) -> SchedulerIter<'_, T> {
        SchedulerIter::new(self, false)
    }

    /// Reverse-order iterator that tolerates removal mid-traversal
    pub fn reverse_iter(&self) -> SchedulerIter<'_, T> {
        SchedulerIter::new(self, true)
    }
}

impl<T> Default for PositionalScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PositionalScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        let sizes: Vec<(i32, usize)> = slots
            .by_position
            .iter()
            .map(|(position, items)| (*position, items.len()))
            .collect();
        f.debug_struct("PositionalScheduler").field("positions", &sizes).finish()
    }
}

fn address<T>(item: &Arc<T>) -> usize {
    Arc::as_ptr(item) as *const () as usize
}

// =============================================================================
// Iterator
// =============================================================================

/// Iterator over a scheduler.
///
/// Each position is snapshotted when the iterator reaches it, so the
/// scheduler stays unlocked while callers work on the yielded item and
/// [`SchedulerIter::remove`] can drop the item just returned.
pub struct SchedulerIter<'a, T> {
    scheduler: &'a PositionalScheduler<T>,
    reverse: bool,
    positions: Vec<i32>,
    next_position: usize,
    current: std::vec::IntoIter<Arc<T>>,
    last: Option<Arc<T>>,
}

impl<'a, T> SchedulerIter<'a, T> {
    fn new(scheduler: &'a PositionalScheduler<T>, reverse: bool) -> Self {
        let positions = if reverse {
            scheduler.reverse_order_positions()
        } else {
            scheduler.natural_order_positions()
        };
        Self {
            scheduler,
            reverse,
            positions,
            next_position: 0,
            current: Vec::new().into_iter(),
            last: None,
        }
    }

    /// Remove the item most recently returned by `next`
    pub fn remove(&mut self) -> Result<()> {
        match self.last.take() {
            Some(item) => {
                self.scheduler.remove(&item);
                Ok(())
            }
            None => Err(CoordError::IllegalState(
                "remove() called before next() or twice for the same item".to_string(),
            )),
        }
    }
}

impl<'a, T> Iterator for SchedulerIter<'a, T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                self.last = Some(Arc::clone(&item));
                return Some(item);
            }
            let position = *self.positions.get(self.next_position)?;
            self.next_position += 1;
            self.current = self.scheduler.by_position(position, self.reverse).into_iter();
        }
    }
}
