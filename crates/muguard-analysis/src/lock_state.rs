//! Per-path lock-state lattice.
//!
//! Tracks which locks are held at a program point, in which mode, and which
//! of them have a deferred release attached to the current path. The walker
//! forks this state at branches and meets it at merges.

use muguard_ir::ir::Span;
use std::collections::{BTreeMap, BTreeSet};

/// Acquisition mode. Shared is only valid for dual-mode (RW) mutexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Exclusive,
    Shared,
}

/// Identifies a specific lock instance within one function: the canonical
/// base value of the struct holding the mutex, plus the mutex field index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockRef {
    pub base: u32,
    pub field_index: u32,
}

/// A held lock: reference, mode, and where it was acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    pub lock: LockRef,
    pub mode: LockMode,
    pub acquired_at: Option<Span>,
}

/// Lock state for a single control-flow path.
#[derive(Debug, Clone, Default)]
pub struct LockState {
    held: BTreeMap<LockRef, HeldLock>,
    deferred_unlocks: BTreeSet<LockRef>,
}

impl LockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a held-lock record. The caller has already checked for
    /// double-acquire.
    pub fn acquire(&mut self, lock: LockRef, mode: LockMode, acquired_at: Option<Span>) {
        self.held.insert(
            lock,
            HeldLock {
                lock,
                mode,
                acquired_at,
            },
        );
    }

    /// Remove a lock; no-op if absent. The caller decides whether absence
    /// is a diagnostic.
    pub fn release(&mut self, lock: &LockRef) {
        self.held.remove(lock);
    }

    /// Mark a pending scoped release. The lock stays in the held set for
    /// the rest of the body; the marker suppresses leak reports at returns
    /// on this path.
    pub fn defer_release(&mut self, lock: LockRef) {
        self.deferred_unlocks.insert(lock);
    }

    pub fn get(&self, lock: &LockRef) -> Option<&HeldLock> {
        self.held.get(lock)
    }

    pub fn is_held(&self, lock: &LockRef) -> bool {
        self.held.contains_key(lock)
    }

    pub fn has_deferred_unlock(&self, lock: &LockRef) -> bool {
        self.deferred_unlocks.contains(lock)
    }

    /// Held locks in deterministic (LockRef) order.
    pub fn held(&self) -> impl Iterator<Item = &HeldLock> {
        self.held.values()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Independent copy for a branch.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Conservative merge: keep only locks held in both states with the
    /// same mode. A lock held in different modes on the two paths is
    /// dropped rather than guessed at. Deferred releases are intersected.
    pub fn meet(&self, other: &Self) -> Self {
        let mut held = BTreeMap::new();
        for (lock, hl) in &self.held {
            if let Some(other_hl) = other.held.get(lock) {
                if other_hl.mode == hl.mode {
                    held.insert(*lock, hl.clone());
                }
            }
        }
        let deferred_unlocks = self
            .deferred_unlocks
            .intersection(&other.deferred_unlocks)
            .copied()
            .collect();
        Self {
            held,
            deferred_unlocks,
        }
    }

    /// Same held key set and same deferred set. Modes and acquisition
    /// positions are not compared; key equality is what loop convergence
    /// needs.
    pub fn equal_held(&self, other: &Self) -> bool {
        self.held.len() == other.held.len()
            && self.held.keys().eq(other.held.keys())
            && self.deferred_unlocks == other.deferred_unlocks
    }

    /// Locks present in exactly one of the two states, each side sorted.
    pub fn diff(&self, other: &Self) -> (Vec<LockRef>, Vec<LockRef>) {
        let only_self = self
            .held
            .keys()
            .filter(|k| !other.held.contains_key(k))
            .copied()
            .collect();
        let only_other = other
            .held
            .keys()
            .filter(|k| !self.held.contains_key(k))
            .copied()
            .collect();
        (only_self, only_other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(base: u32, field_index: u32) -> LockRef {
        LockRef { base, field_index }
    }

    #[test]
    fn test_acquire_release() {
        let mut ls = LockState::new();
        let mu = lock(1, 0);
        assert!(!ls.is_held(&mu));

        ls.acquire(mu, LockMode::Exclusive, Some(Span::new("a.go", 5, 2)));
        assert!(ls.is_held(&mu));
        assert_eq!(ls.get(&mu).unwrap().mode, LockMode::Exclusive);
        assert_eq!(
            ls.get(&mu).unwrap().acquired_at.as_ref().unwrap().start_line,
            5
        );

        ls.release(&mu);
        assert!(!ls.is_held(&mu));
        ls.release(&mu); // releasing an absent lock is a no-op
    }

    #[test]
    fn test_fork_is_independent() {
        let mut ls = LockState::new();
        ls.acquire(lock(1, 0), LockMode::Exclusive, None);

        let mut forked = ls.fork();
        forked.acquire(lock(2, 0), LockMode::Shared, None);

        assert_eq!(ls.held_count(), 1);
        assert_eq!(forked.held_count(), 2);
    }

    #[test]
    fn test_meet_intersects() {
        let mu = lock(1, 0);
        let other = lock(2, 3);

        let mut a = LockState::new();
        a.acquire(mu, LockMode::Exclusive, None);
        a.acquire(other, LockMode::Exclusive, None);

        let mut b = LockState::new();
        b.acquire(mu, LockMode::Exclusive, None);

        let met = a.meet(&b);
        assert!(met.is_held(&mu));
        assert!(!met.is_held(&other));
    }

    #[test]
    fn test_meet_drops_conflicting_modes() {
        let mu = lock(1, 0);

        let mut a = LockState::new();
        a.acquire(mu, LockMode::Exclusive, None);
        let mut b = LockState::new();
        b.acquire(mu, LockMode::Shared, None);

        let met = a.meet(&b);
        assert!(!met.is_held(&mu));
    }

    #[test]
    fn test_meet_intersects_deferred() {
        let mu = lock(1, 0);
        let other = lock(1, 4);

        let mut a = LockState::new();
        a.acquire(mu, LockMode::Exclusive, None);
        a.defer_release(mu);
        a.defer_release(other);

        let mut b = LockState::new();
        b.acquire(mu, LockMode::Exclusive, None);
        b.defer_release(mu);

        let met = a.meet(&b);
        assert!(met.has_deferred_unlock(&mu));
        assert!(!met.has_deferred_unlock(&other));
    }

    #[test]
    fn test_equal_held() {
        let mu = lock(1, 0);

        let mut a = LockState::new();
        a.acquire(mu, LockMode::Exclusive, None);
        let mut b = LockState::new();
        b.acquire(mu, LockMode::Exclusive, Some(Span::new("x.go", 9, 9)));

        // Acquisition positions don't affect key equality.
        assert!(a.equal_held(&b));

        b.defer_release(mu);
        assert!(!a.equal_held(&b));
    }

    #[test]
    fn test_diff_sorted() {
        let mut a = LockState::new();
        a.acquire(lock(3, 1), LockMode::Exclusive, None);
        a.acquire(lock(1, 0), LockMode::Exclusive, None);

        let mut b = LockState::new();
        b.acquire(lock(2, 0), LockMode::Shared, None);

        let (only_a, only_b) = a.diff(&b);
        assert_eq!(only_a, vec![lock(1, 0), lock(3, 1)]);
        assert_eq!(only_b, vec![lock(2, 0)]);
    }
}
