// Shared model - Double-buffered engine state
//
// One mutable "working" copy lives behind a mutex and is edited by control
// threads. `publish` clones it into a new immutable snapshot and swaps that in
// with arc-swap. The audio thread reads the current snapshot wait-free for the
// duration of one render call.
//
// Reclamation: the audio thread must never be the last owner of a snapshot,
// otherwise it would run the deallocation. Replaced snapshots are dropped on
// the publishing thread once the renderer has been seen idle, or parked in a
// retired list and freed later by `collect`.

use arc_swap::{ArcSwap, Guard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

/// How long a HARD publish waits for an in-flight render before deferring
/// reclamation of the old snapshot.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Severity of a model update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapType {
    /// No audio-visible effect. Listeners are not notified.
    None,
    /// Safe incremental change (play status, flags).
    Soft,
    /// Structural change (channel list, buffers). The old snapshot is only
    /// reclaimed after the renderer has drained.
    Hard,
}

/// Models that can be marked as mid structural edit. A locked model tells
/// the renderer to leave shared data (waves, actions) alone.
pub trait Lockable {
    fn is_locked(&self) -> bool;
    fn set_locked(&mut self, locked: bool);
}

/// Snapshot as published to readers
#[derive(Debug)]
pub struct Published<T> {
    generation: u64,
    value: T,
}

impl<T> Published<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T> Deref for Published<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

type SwapListener<T> = Box<dyn Fn(&T, SwapType) + Send + Sync>;

pub struct SharedModel<T> {
    working: Mutex<T>,
    live: ArcSwap<Published<T>>,
    retired: Mutex<Vec<Arc<Published<T>>>>,
    render_busy: AtomicBool,
    generation: AtomicU64,
    drain_timeout: Duration,
    on_swap: RwLock<Option<SwapListener<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SharedModel<T> {
    pub fn new(initial: T) -> Self {
        let live = Arc::new(Published {
            generation: 0,
            value: initial.clone(),
        });
        Self {
            working: Mutex::new(initial),
            live: ArcSwap::new(live),
            retired: Mutex::new(Vec::new()),
            render_busy: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            on_swap: RwLock::new(None),
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Install the listener called after every SOFT or HARD publish.
    ///
    /// The listener runs on the publishing thread while the working copy is
    /// still locked: it must not call back into this model.
    pub fn set_on_swap<F>(&self, listener: F)
    where
        F: Fn(&T, SwapType) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_swap.write() {
            *slot = Some(Box::new(listener));
        }
    }

    /// Exclusive access to the working copy. Control threads only.
    pub fn working(&self) -> Working<'_, T> {
        Working {
            model: self,
            guard: lock_ignoring_poison(&self.working),
        }
    }

    /// Edit the working copy and publish it in one go
    pub fn mutate<R>(&self, swap: SwapType, f: impl FnOnce(&mut T) -> R) -> R {
        let mut working = self.working();
        let out = f(&mut working);
        working.publish(swap);
        out
    }

    /// Snapshot for the audio thread, valid until dropped.
    ///
    /// Wait-free, never allocates. Only one renderer may hold a live
    /// snapshot at a time.
    pub fn acquire_live(&self) -> LiveSnapshot<'_, T> {
        // Raise the flag before loading: a publisher that swaps after this
        // point will see us busy and hold on to the snapshot we load.
        self.render_busy.store(true, Ordering::SeqCst);
        let guard = self.live.load();
        LiveSnapshot {
            guard,
            _busy: BusyToken {
                flag: &self.render_busy,
            },
        }
    }

    /// Read the current snapshot from a non-real-time thread
    pub fn peek(&self) -> Arc<Published<T>> {
        self.live.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_render_busy(&self) -> bool {
        self.render_busy.load(Ordering::SeqCst)
    }

    /// Spin until the renderer is idle. Returns false on timeout.
    /// Never call from the audio thread.
    pub fn drain_render(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut spins = 0u32;
        while self.is_render_busy() {
            if start.elapsed() >= timeout {
                return false;
            }
            if spins < 64 {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
        true
    }

    /// Free retired snapshots nobody references any more
    pub fn collect(&self) -> usize {
        let mut retired = lock_ignoring_poison(&self.retired);
        let before = retired.len();
        retired.retain(|snapshot| Arc::strong_count(snapshot) > 1);
        before - retired.len()
    }

    pub fn retired_count(&self) -> usize {
        lock_ignoring_poison(&self.retired).len()
    }

    fn publish_value(&self, value: &T, swap: SwapType) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let next = Arc::new(Published {
            generation,
            value: value.clone(),
        });
        let previous = self.live.swap(next);

        if swap == SwapType::Hard {
            self.drain_render(self.drain_timeout);
        }
        self.reclaim(previous);

        if swap != SwapType::None {
            if let Ok(listener) = self.on_swap.read() {
                if let Some(listener) = listener.as_ref() {
                    listener(value, swap);
                }
            }
        }
    }

    fn reclaim(&self, previous: Arc<Published<T>>) {
        let mut retired = lock_ignoring_poison(&self.retired);
        // After the swap every reader holding `previous` is counted, so a
        // count of one means this thread is the last owner.
        retired.retain(|snapshot| Arc::strong_count(snapshot) > 1);
        if Arc::strong_count(&previous) > 1 || self.is_render_busy() {
            retired.push(previous);
        }
    }
}

impl<T: Clone + Lockable + Send + Sync + 'static> SharedModel<T> {
    /// Data-exclusivity guard
    ///
    /// Marks the model locked, publishes it and waits for the renderer to
    /// drain, so that no render call is reading shared data (wave contents,
    /// action map) while the guard is alive. Dropping the guard unlocks and
    /// publishes HARD.
    pub fn data_lock(&self) -> DataLock<'_, T> {
        let mut guard = lock_ignoring_poison(&self.working);
        guard.set_locked(true);
        self.publish_value(&guard, SwapType::Hard);
        DataLock { model: self, guard }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Working copy guard returned by [`SharedModel::working`]
pub struct Working<'a, T: Clone + Send + Sync + 'static> {
    model: &'a SharedModel<T>,
    guard: MutexGuard<'a, T>,
}

impl<T: Clone + Send + Sync + 'static> Working<'_, T> {
    /// Make the edited working copy the new live snapshot
    pub fn publish(self, swap: SwapType) {
        self.model.publish_value(&self.guard, swap);
    }
}

impl<T: Clone + Send + Sync + 'static> Deref for Working<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: Clone + Send + Sync + 'static> DerefMut for Working<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Guard returned by [`SharedModel::data_lock`]
pub struct DataLock<'a, T: Clone + Lockable + Send + Sync + 'static> {
    model: &'a SharedModel<T>,
    guard: MutexGuard<'a, T>,
}

impl<T: Clone + Lockable + Send + Sync + 'static> Deref for DataLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: Clone + Lockable + Send + Sync + 'static> DerefMut for DataLock<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: Clone + Lockable + Send + Sync + 'static> Drop for DataLock<'_, T> {
    fn drop(&mut self) {
        self.guard.set_locked(false);
        self.model.publish_value(&self.guard, SwapType::Hard);
    }
}

struct BusyToken<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyToken<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Immutable snapshot held by the renderer for one block.
///
/// Field order matters: the snapshot guard is released before the busy
/// flag is cleared.
pub struct LiveSnapshot<'a, T> {
    guard: Guard<Arc<Published<T>>>,
    _busy: BusyToken<'a>,
}

impl<T> LiveSnapshot<'_, T> {
    pub fn generation(&self) -> u64 {
        self.guard.generation
    }
}

impl<T> Deref for LiveSnapshot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard.value
    }
}
