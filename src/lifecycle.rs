//! Store lifecycle coordination.
//!
//! The lifecycle state and the in-flight operation count live in one watch
//! channel. Admission checks are therefore atomic with state transitions,
//! and teardown awaits the drained condition instead of polling.

use tokio::sync::watch;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Ready,
    Closing,
    Closed,
}

#[derive(Debug)]
struct GateState {
    lifecycle: Lifecycle,
    in_flight: usize,
}

#[derive(Debug)]
pub(crate) struct LifecycleGate {
    state: watch::Sender<GateState>,
}

impl LifecycleGate {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(GateState {
            lifecycle: Lifecycle::Ready,
            in_flight: 0,
        });
        Self { state }
    }

    /// Admits an operation while the store is ready. The returned guard
    /// keeps the operation counted until dropped.
    pub(crate) fn enter(&self) -> Result<OpGuard<'_>, Error> {
        let mut admitted = false;
        self.state.send_modify(|gate| {
            if gate.lifecycle == Lifecycle::Ready {
                gate.in_flight += 1;
                admitted = true;
            }
        });
        if admitted {
            Ok(OpGuard { gate: self })
        } else {
            Err(Error::Closed)
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state.borrow().lifecycle == Lifecycle::Ready
    }

    /// Starts teardown. Returns `false` when teardown already started, so
    /// only one caller runs it.
    pub(crate) fn begin_close(&self) -> bool {
        let mut first = false;
        self.state.send_modify(|gate| {
            if gate.lifecycle == Lifecycle::Ready {
                gate.lifecycle = Lifecycle::Closing;
                first = true;
            }
        });
        first
    }

    /// Resolves once no admitted operation remains. New operations are
    /// already rejected by then; callers run [`begin_close`] first.
    pub(crate) async fn drained(&self) {
        let mut receiver = self.state.subscribe();
        // wait_for inspects the current value before parking, so a count
        // that is already zero resolves immediately.
        let _ = receiver.wait_for(|gate| gate.in_flight == 0).await;
    }

    pub(crate) fn finish_close(&self) {
        self.state
            .send_modify(|gate| gate.lifecycle = Lifecycle::Closed);
    }
}

pub(crate) struct OpGuard<'a> {
    gate: &'a LifecycleGate,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.send_modify(|gate| gate.in_flight -= 1);
    }
}
