//! Fault injection for crash-safety testing.
//!
//! [`ChaosStore`] wraps any [`DocumentStore`] and, around each write, may
//! delay the caller or "kill" it. A kill surfaces as
//! [`StoreError::Killed`]; the runner turns it into
//! [`crate::TxnError::Chaos`] and returns immediately, without running any
//! cleanup. Whatever the store already holds stays there, and only
//! [`crate::Runner::resume`] or [`crate::Runner::resume_all_with_summary`] can finish
//! the transaction.
//!
//! ## Usage
//!
//! ```rust
//! use doctxn_core::{Chaos, ChaosStore};
//! use doctxn_store::InMemoryStore;
//! use std::time::Duration;
//!
//! let store = ChaosStore::new(
//!     InMemoryStore::new(),
//!     Chaos::new()
//!         .kill_chance(0.01)
//!         .slowdown_chance(0.3)
//!         .slowdown(Duration::from_millis(1))
//!         .seed(7),
//! );
//! store.reset();
//! assert!(!store.chaos().is_enabled());
//! ```

use doctxn_store::{DocId, Document, DocumentStore, Filter, Mutation, StoreError, StoreResult};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Fault injection settings. The default injects nothing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Chaos {
    /// Probability of killing the caller before, and again after, a write.
    pub kill_chance: f64,
    /// Probability of delaying the caller before a write.
    pub slowdown_chance: f64,
    /// Length of an injected delay.
    pub slowdown: Duration,
    /// Seed for fault decisions; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Chaos {
    /// Creates settings that inject nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the kill probability.
    #[must_use]
    pub const fn kill_chance(mut self, chance: f64) -> Self {
        self.kill_chance = chance;
        self
    }

    /// Sets the slowdown probability.
    #[must_use]
    pub const fn slowdown_chance(mut self, chance: f64) -> Self {
        self.slowdown_chance = chance;
        self
    }

    /// Sets the slowdown length.
    #[must_use]
    pub const fn slowdown(mut self, delay: Duration) -> Self {
        self.slowdown = delay;
        self
    }

    /// Makes fault decisions reproducible.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Returns true if any fault can be injected.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.kill_chance > 0.0 || (self.slowdown_chance > 0.0 && !self.slowdown.is_zero())
    }
}

/// A document store wrapper that injects kills and delays around writes.
///
/// Reads are passed through untouched.
pub struct ChaosStore<S> {
    inner: S,
    chaos: RwLock<Chaos>,
    rng: Mutex<StdRng>,
    kill_at_write: AtomicU64,
    writes: AtomicU64,
    kills: AtomicU64,
    fail_writes: AtomicBool,
}

impl<S: DocumentStore> ChaosStore<S> {
    /// Wraps `inner` with the given settings.
    pub fn new(inner: S, chaos: Chaos) -> Self {
        Self {
            inner,
            rng: Mutex::new(rng_for(&chaos)),
            chaos: RwLock::new(chaos),
            kill_at_write: AtomicU64::new(u64::MAX),
            writes: AtomicU64::new(0),
            kills: AtomicU64::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Wraps `inner` without injecting anything yet.
    pub fn disabled(inner: S) -> Self {
        Self::new(inner, Chaos::default())
    }

    /// Returns the current settings.
    pub fn chaos(&self) -> Chaos {
        *self.chaos.read()
    }

    /// Replaces the settings. A seeded configuration restarts its sequence.
    pub fn set_chaos(&self, chaos: Chaos) {
        *self.rng.lock() = rng_for(&chaos);
        *self.chaos.write() = chaos;
    }

    /// Stops all fault injection, including scheduled kills and failures.
    pub fn reset(&self) {
        self.set_chaos(Chaos::default());
        self.kill_at_write.store(u64::MAX, Ordering::SeqCst);
        self.fail_writes.store(false, Ordering::SeqCst);
    }

    /// Kills the caller of the `n`-th write from now (1 = the next write),
    /// after that write has reached the store.
    pub fn kill_after_writes(&self, n: u64) {
        let seen = self.writes.load(Ordering::SeqCst);
        self.kill_at_write.store(seen.saturating_add(n), Ordering::SeqCst);
    }

    /// Makes every write fail with [`StoreError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of kills injected so far.
    pub fn kills(&self) -> u64 {
        self.kills.load(Ordering::SeqCst)
    }

    /// Returns the number of writes that reached the store.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn roll(&self, chance: f64) -> bool {
        chance > 0.0 && self.rng.lock().gen::<f64>() < chance
    }

    fn kill(&self, when: &str) -> StoreError {
        let kills = self.kills.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(when, kills, "fault injection killed worker");
        StoreError::Killed
    }

    fn before_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("writes disabled by fault injection"));
        }
        let chaos = self.chaos();
        if self.roll(chaos.slowdown_chance) {
            std::thread::sleep(chaos.slowdown);
        }
        if self.roll(chaos.kill_chance) {
            return Err(self.kill("before write"));
        }
        Ok(())
    }

    fn after_write<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        let value = result?;
        let count = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if count == self.kill_at_write.load(Ordering::SeqCst) {
            return Err(self.kill("scheduled"));
        }
        if self.roll(self.chaos().kill_chance) {
            return Err(self.kill("after write"));
        }
        Ok(value)
    }
}

fn rng_for(chaos: &Chaos) -> StdRng {
    match chaos.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl<S: DocumentStore> DocumentStore for ChaosStore<S> {
    fn insert_if_absent(&self, collection: &str, doc: Document) -> StoreResult<bool> {
        self.before_write()?;
        self.after_write(self.inner.insert_if_absent(collection, doc))
    }

    fn update_if(
        &self,
        collection: &str,
        id: &DocId,
        filter: &Filter,
        mutation: &Mutation,
    ) -> StoreResult<bool> {
        self.before_write()?;
        self.after_write(self.inner.update_if(collection, id, filter, mutation))
    }

    fn remove_if(&self, collection: &str, id: &DocId, filter: &Filter) -> StoreResult<bool> {
        self.before_write()?;
        self.after_write(self.inner.remove_if(collection, id, filter))
    }

    fn get(&self, collection: &str, id: &DocId) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id)
    }

    fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        self.inner.find(collection, filter)
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        self.inner.count(collection, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctxn_store::InMemoryStore;

    fn store(chaos: Chaos) -> ChaosStore<InMemoryStore> {
        ChaosStore::new(InMemoryStore::new(), chaos)
    }

    #[test]
    fn disabled_chaos_passes_writes_through() {
        let store = ChaosStore::disabled(InMemoryStore::new());
        for i in 0..100 {
            assert!(store.insert_if_absent("c", Document::new(i)).unwrap());
        }
        assert_eq!(store.kills(), 0);
        assert_eq!(store.writes(), 100);
    }

    #[test]
    fn certain_kill_fires_before_the_write() {
        let store = store(Chaos::new().kill_chance(1.0).seed(1));
        let result = store.insert_if_absent("c", Document::new(1));
        assert!(matches!(result, Err(StoreError::Killed)));
        assert!(store.inner().get("c", &DocId::from(1)).unwrap().is_none());
        assert_eq!(store.kills(), 1);
    }

    #[test]
    fn scheduled_kill_fires_after_the_write_lands() {
        let store = ChaosStore::disabled(InMemoryStore::new());
        store.kill_after_writes(2);
        assert!(store.insert_if_absent("c", Document::new(1)).is_ok());
        assert!(matches!(
            store.insert_if_absent("c", Document::new(2)),
            Err(StoreError::Killed)
        ));
        assert_eq!(store.inner().len(), 2);
        assert!(store.insert_if_absent("c", Document::new(3)).is_ok());
    }

    #[test]
    fn reads_are_never_faulted() {
        let store = store(Chaos::new().kill_chance(1.0));
        store.inner().insert_if_absent("c", Document::new(1)).unwrap();
        for _ in 0..10 {
            assert!(store.get("c", &DocId::from(1)).unwrap().is_some());
        }
        assert_eq!(store.kills(), 0);
    }

    #[test]
    fn failing_writes_are_unavailable() {
        let store = ChaosStore::disabled(InMemoryStore::new());
        store.fail_writes(true);
        assert!(matches!(
            store.remove_if("c", &DocId::from(1), &Filter::new()),
            Err(StoreError::Unavailable { .. })
        ));
        store.reset();
        assert!(store.remove_if("c", &DocId::from(1), &Filter::new()).is_ok());
    }

    #[test]
    fn seeded_chaos_is_reproducible() {
        let pattern = |seed| {
            let store = store(Chaos::new().kill_chance(0.5).seed(seed));
            (0..32)
                .map(|i| store.insert_if_absent("c", Document::new(i)).is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(pattern(42), pattern(42));
    }

    #[test]
    fn reset_disables_chaos() {
        let store = store(Chaos::new().kill_chance(1.0));
        store.reset();
        assert!(!store.chaos().is_enabled());
        assert!(store.insert_if_absent("c", Document::new(1)).unwrap());
    }
}
