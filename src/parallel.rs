//! Collective communication between mesh partitions.
//!
//! The Dirac subsystem only needs a handful of collective operations: a barrier
//! (point locator construction) and min/max reductions over `usize` (the "does any partition
//! have points" check and the ownership tie-break). Every one of them is a
//! *collective* call: it must be invoked the same number of times, in the same order, on
//! every partition, even on partitions that have no local work. Skipping a call on one
//! partition deadlocks all the others.
//!
//! [`SerialCommunicator`] is the trivial single-partition implementation. [`SimulatedCommunicator`]
//! lets a group of threads act as partitions, which is how multi-partition behavior is
//! exercised without a message-passing runtime.
use parking_lot::{Condvar, Mutex};
use std::fmt::Debug;
use std::sync::Arc;

pub trait Communicator: Debug + Send + Sync {
    /// Index of the local partition.
    fn rank(&self) -> usize;

    /// Total number of partitions.
    fn size(&self) -> usize;

    /// Blocks until every partition has reached the barrier.
    fn barrier(&self);

    /// Global minimum of `value` over all partitions.
    fn min_usize(&self, value: usize) -> usize;

    /// Global maximum of `value` over all partitions.
    fn max_usize(&self, value: usize) -> usize;
}

/// A communicator for a single, unpartitioned mesh.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn min_usize(&self, value: usize) -> usize {
        value
    }

    fn max_usize(&self, value: usize) -> usize {
        value
    }
}

#[derive(Debug, Default)]
struct ReductionState {
    generation: u64,
    arrived: usize,
    accumulator: Option<usize>,
    result: usize,
}

#[derive(Debug, Default)]
struct SharedReduction {
    state: Mutex<ReductionState>,
    condvar: Condvar,
}

/// A communicator whose partitions are threads in the same process.
///
/// Create a group with [`SimulatedCommunicator::group`] and move one member into each thread.
/// Reductions block until every member of the group has contributed.
#[derive(Debug, Clone)]
pub struct SimulatedCommunicator {
    rank: usize,
    size: usize,
    shared: Arc<SharedReduction>,
}

impl SimulatedCommunicator {
    /// Creates `size` connected communicators with ranks `0 .. size`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn group(size: usize) -> Vec<Self> {
        assert!(size > 0, "A communicator group must contain at least one partition");
        let shared = Arc::new(SharedReduction::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn reduce(&self, value: usize, op: fn(usize, usize) -> usize) -> usize {
        let mut state = self.shared.state.lock();
        let generation = state.generation;
        let accumulated = match state.accumulator {
            Some(acc) => op(acc, value),
            None => value,
        };
        state.accumulator = Some(accumulated);
        state.arrived += 1;

        if state.arrived == self.size {
            // Last to arrive publishes the result and releases the others
            state.result = accumulated;
            state.accumulator = None;
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.shared.condvar.notify_all();
            accumulated
        } else {
            // The result cannot be overwritten before we read it, since the next
            // reduction can only complete once this partition has also joined it
            while state.generation == generation {
                self.shared.condvar.wait(&mut state);
            }
            state.result
        }
    }
}

impl Communicator for SimulatedCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.reduce(0, usize::max);
    }

    fn min_usize(&self, value: usize) -> usize {
        self.reduce(value, usize::min)
    }

    fn max_usize(&self, value: usize) -> usize {
        self.reduce(value, usize::max)
    }
}
