// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use futures_util::Stream;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::condition::PolicyCondition;
use super::violation::PolicyViolation;

/// Lifecycle of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriptionState {
    Created,
    Registered,
    Streaming,
    Unregistering,
    Closed,
}

impl SubscriptionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SubscriptionState::Created,
            1 => SubscriptionState::Registered,
            2 => SubscriptionState::Streaming,
            3 => SubscriptionState::Unregistering,
            _ => SubscriptionState::Closed,
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared view of a subscription's state, written by the fan-in task.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SubscriptionState::Created as u8)))
    }

    pub(crate) fn set(&self, state: SubscriptionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// The receiving end of a policy-violation subscription.
///
/// Occurrences of one condition arrive in the order the engine reported them;
/// there is no ordering across conditions. Once the subscription's
/// cancellation token fires, [`recv`](Self::recv) never yields another
/// occurrence and returns `None` after the engine-side registration has been
/// removed. Dropping the stream cancels the subscription.
pub struct ViolationStream {
    id: u64,
    conditions: Vec<PolicyCondition>,
    rx: mpsc::Receiver<PolicyViolation>,
    cancel: CancellationToken,
    state: StateCell,
}

impl ViolationStream {
    pub(crate) fn new(
        id: u64,
        conditions: Vec<PolicyCondition>,
        rx: mpsc::Receiver<PolicyViolation>,
        cancel: CancellationToken,
        state: StateCell,
    ) -> Self {
        Self {
            id,
            conditions,
            rx,
            cancel,
            state,
        }
    }

    /// Next violation, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<PolicyViolation> {
        if self.cancel.is_cancelled() {
            return self.wait_closed().await;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => self.wait_closed().await,
            violation = self.rx.recv() => violation,
        }
    }

    /// Discard anything still buffered and wait for the fan-in task to finish
    /// unregistering and close the channel.
    async fn wait_closed(&mut self) -> Option<PolicyViolation> {
        while self.rx.recv().await.is_some() {}
        None
    }

    /// Cancel this subscription only, leaving the parent token untouched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conditions(&self) -> &[PolicyCondition] {
        &self.conditions
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.get()
    }

    /// Adapt into a [`Stream`] with the same cancellation semantics as `recv`.
    pub fn into_stream(self) -> impl Stream<Item = PolicyViolation> + Send {
        futures_util::stream::unfold(self, |mut stream| async move {
            let violation = stream.recv().await?;
            Some((violation, stream))
        })
    }
}

impl Drop for ViolationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for ViolationStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViolationStream")
            .field("id", &self.id)
            .field("conditions", &self.conditions)
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), SubscriptionState::Created);
        for state in [
            SubscriptionState::Registered,
            SubscriptionState::Streaming,
            SubscriptionState::Unregistering,
            SubscriptionState::Closed,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[tokio::test]
    async fn test_recv_after_cancel_discards_buffered() {
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let mut stream = ViolationStream::new(
            1,
            vec![PolicyCondition::Xid],
            rx,
            token.clone(),
            StateCell::new(),
        );

        let violation = PolicyViolation {
            condition: PolicyCondition::Xid,
            gpu_id: 0,
            timestamp: 0,
            data: super::super::violation::ViolationData::Xid { err_num: 13 },
        };
        tx.send(violation).await.unwrap();
        token.cancel();
        drop(tx);

        assert_eq!(stream.recv().await, None);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn test_drop_cancels_token() {
        let (_tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let stream = ViolationStream::new(
            1,
            vec![PolicyCondition::Power],
            rx,
            token.clone(),
            StateCell::new(),
        );
        drop(stream);
        assert!(token.is_cancelled());
    }
}
