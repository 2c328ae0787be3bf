// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Holder of the current snapshot; applies operations in submission order.
use std::sync::Arc;

use crate::normalize::{NestedNormalizer, Normalizer};
use crate::reducer::{reduce_with, Operation, ReduceError};
use crate::state::State;

/// Owns the current [`State`] and replaces it after each successful operation.
///
/// Readers take cheap snapshots with [`Dispatcher::snapshot`]; a snapshot
/// keeps observing the state it was taken from regardless of later dispatches.
#[derive(Debug)]
pub struct Dispatcher<N = NestedNormalizer> {
    current: Arc<State>,
    normalizer: N,
}

impl Dispatcher<NestedNormalizer> {
    /// Creates a dispatcher using the default normalizer.
    pub fn new(initial: State) -> Self {
        Self::with_normalizer(initial, NestedNormalizer)
    }
}

impl<N: Normalizer> Dispatcher<N> {
    /// Creates a dispatcher using `normalizer` for upserts.
    pub fn with_normalizer(initial: State, normalizer: N) -> Self {
        Self {
            current: Arc::new(initial),
            normalizer,
        }
    }

    /// Applies `op`. On error the current snapshot is left in place.
    pub fn dispatch(&mut self, op: &Operation) -> Result<Arc<State>, ReduceError> {
        let next = reduce_with(&self.normalizer, &self.current, op)?;
        self.current = Arc::clone(&next);
        Ok(next)
    }

    /// Applies each operation in order, stopping at the first error.
    ///
    /// Operations before the failing one stay applied; the error carries the
    /// zero-based position of the rejected operation.
    pub fn dispatch_all<'a>(
        &mut self,
        ops: impl IntoIterator<Item = &'a Operation>,
    ) -> Result<Arc<State>, (usize, ReduceError)> {
        for (position, op) in ops.into_iter().enumerate() {
            self.dispatch(op).map_err(|err| (position, err))?;
        }
        Ok(self.snapshot())
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<State> {
        Arc::clone(&self.current)
    }
}
