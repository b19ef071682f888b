//! Single-slot admission gate.
//!
//! The gate has three states. `Idle` admits exactly one caller at a
//! time into `Admitting`; releasing the permit returns to `Idle`.
//! `Exclusive` shuts the door entirely for the stop handshake: nothing
//! is admitted until the holder ends the exclusive section. Waiting is
//! async and cancel-safe; a waiter that gives up leaves no residue.

use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Idle,
    Admitting,
    Exclusive,
}

#[derive(Debug)]
pub struct AdmissionGate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
            notify: Notify::new(),
        }
    }

    /// Waits for the single admission slot. The permit releases the
    /// slot on drop.
    pub async fn admit(&self) -> AdmissionPermit<'_> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if *state == GateState::Idle {
                    *state = GateState::Admitting;
                    return AdmissionPermit { gate: self };
                }
            }
            notified.await;
        }
    }

    /// Waits until the gate is idle, then holds it exclusively. Must be
    /// paired with [`end_exclusive`](Self::end_exclusive).
    pub async fn begin_exclusive(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap();
                if *state == GateState::Idle {
                    *state = GateState::Exclusive;
                    return;
                }
            }
            notified.await;
        }
    }

    pub fn end_exclusive(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(*state, GateState::Exclusive);
        *state = GateState::Idle;
        drop(state);
        self.notify.notify_waiters();
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(*state, GateState::Admitting);
        *state = GateState::Idle;
        drop(state);
        self.notify.notify_waiters();
    }
}

/// Occupancy of the admission slot; dropping it reopens the gate.
#[derive(Debug)]
pub struct AdmissionPermit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn one_permit_at_a_time() {
        let gate = Arc::new(AdmissionGate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.admit().await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exclusive_blocks_admission_until_ended() {
        let gate = Arc::new(AdmissionGate::new());
        gate.begin_exclusive().await;

        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move {
                let _permit = gate.admit().await;
            }
        });
        // the waiter cannot get in while the gate is exclusive
        sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.end_exclusive();
        timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn exclusive_waits_for_an_outstanding_permit() {
        let gate = Arc::new(AdmissionGate::new());
        let permit = gate.admit().await;

        let exclusive = tokio::spawn({
            let gate = gate.clone();
            async move {
                gate.begin_exclusive().await;
                gate.end_exclusive();
            }
        });
        sleep(Duration::from_millis(20)).await;
        assert!(!exclusive.is_finished());

        drop(permit);
        timeout(Duration::from_secs(1), exclusive)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn abandoned_waiter_leaves_the_gate_usable() {
        let gate = Arc::new(AdmissionGate::new());
        let permit = gate.admit().await;

        let abandoned = tokio::spawn({
            let gate = gate.clone();
            async move {
                let _permit = gate.admit().await;
            }
        });
        sleep(Duration::from_millis(10)).await;
        abandoned.abort();
        drop(permit);

        // gate still hands out permits after the aborted waiter
        timeout(Duration::from_secs(1), gate.admit()).await.unwrap();
    }
}
