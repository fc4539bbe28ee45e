// Quantizer - Defers callbacks to the next quantization step
//
// Callbacks are registered up front with a small integer id. Any thread can
// trigger an id through a `QuantizerHandle`; the audio thread fires the
// callback at the first step boundary inside the block it is rendering,
// passing the offset of that boundary within the block.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::Frame;

pub const MAX_QUANTIZER_SLOTS: usize = 16;

type QuantizedFn<C> = Box<dyn FnMut(&mut C, Frame) + Send>;

/// Trigger side, cloneable across threads
#[derive(Clone)]
pub struct QuantizerHandle {
    pending: Arc<[AtomicBool]>,
}

impl QuantizerHandle {
    pub fn trigger(&self, id: usize) {
        if let Some(flag) = self.pending.get(id) {
            flag.store(true, Ordering::Release);
        }
    }

    pub fn is_pending(&self, id: usize) -> bool {
        self.pending
            .get(id)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn cancel(&self, id: usize) {
        if let Some(flag) = self.pending.get(id) {
            flag.store(false, Ordering::Release);
        }
    }
}

pub struct Quantizer<C> {
    callbacks: Vec<(usize, QuantizedFn<C>)>,
    pending: Arc<[AtomicBool]>,
}

impl<C> Default for Quantizer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Quantizer<C> {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::with_capacity(MAX_QUANTIZER_SLOTS),
            pending: (0..MAX_QUANTIZER_SLOTS)
                .map(|_| AtomicBool::new(false))
                .collect(),
        }
    }

    /// Register `f` under `id`, replacing any previous callback. Returns
    /// false when `id` is out of range.
    pub fn schedule<F>(&mut self, id: usize, f: F) -> bool
    where
        F: FnMut(&mut C, Frame) + Send + 'static,
    {
        if id >= MAX_QUANTIZER_SLOTS {
            return false;
        }
        self.callbacks.retain(|(existing, _)| *existing != id);
        self.callbacks.push((id, Box::new(f)));
        true
    }

    pub fn handle(&self) -> QuantizerHandle {
        QuantizerHandle {
            pending: Arc::clone(&self.pending),
        }
    }

    pub fn trigger(&self, id: usize) {
        self.handle().trigger(id);
    }

    pub fn is_pending(&self, id: usize) -> bool {
        self.handle().is_pending(id)
    }

    /// Fire pending callbacks at the first frame of `block` on a multiple
    /// of `step`, or on the loop start when the loop is not a whole number
    /// of steps. `block` is unwrapped: frames past `frames_in_loop` belong
    /// to the next pass. A zero step fires at the block start.
    pub fn advance(&mut self, block: Range<Frame>, step: Frame, frames_in_loop: Frame, ctx: &mut C) {
        for (id, callback) in self.callbacks.iter_mut() {
            let flag = &self.pending[*id];
            if !flag.load(Ordering::Acquire) {
                continue;
            }
            let hit = if step == 0 {
                Some(block.start)
            } else {
                block.clone().find(|global| {
                    global % step == 0 || (frames_in_loop != 0 && global % frames_in_loop == 0)
                })
            };
            if let Some(global) = hit {
                flag.store(false, Ordering::Release);
                callback(ctx, global - block.start);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_on_next_step() {
        let mut q: Quantizer<Vec<Frame>> = Quantizer::new();
        q.schedule(0, |fired, offset| fired.push(offset));
        let mut fired = Vec::new();

        // Not triggered: nothing
        q.advance(0..512, 100, 0, &mut fired);
        assert!(fired.is_empty());

        q.trigger(0);
        q.advance(512..1024, 100, 0, &mut fired);
        assert_eq!(fired, vec![600 - 512]);
        assert!(!q.is_pending(0));

        // Fires once per trigger
        q.advance(1024..1536, 100, 0, &mut fired);
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_waits_for_block_with_boundary() {
        let mut q: Quantizer<Vec<Frame>> = Quantizer::new();
        q.schedule(3, |fired, offset| fired.push(offset));
        let handle = q.handle();
        handle.trigger(3);

        let mut fired = Vec::new();
        q.advance(1..64, 1000, 0, &mut fired);
        assert!(fired.is_empty());
        assert!(handle.is_pending(3));

        q.advance(960..1024, 1000, 0, &mut fired);
        assert_eq!(fired, vec![40]);
    }

    #[test]
    fn test_loop_start_counts_as_boundary() {
        let mut q: Quantizer<Vec<Frame>> = Quantizer::new();
        q.schedule(1, |fired, offset| fired.push(offset));
        q.trigger(1);

        // Loop of 1000 frames, step 300: the pass ends before the 4th step
        let mut fired = Vec::new();
        q.advance(950..1050, 300, 1000, &mut fired);
        assert_eq!(fired, vec![50]);
    }

    #[test]
    fn test_out_of_range_id() {
        let mut q: Quantizer<()> = Quantizer::new();
        assert!(!q.schedule(MAX_QUANTIZER_SLOTS, |_, _| {}));
        q.handle().trigger(MAX_QUANTIZER_SLOTS);
    }
}
