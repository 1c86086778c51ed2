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

//! Routing of the engine's policy callback into per-subscription streams.
//!
//! The engine delivers every violation through one `extern "C"` entry point,
//! [`policy_trampoline`], carrying the subscription id it was registered with.
//! The trampoline copies the response out of native memory and pushes it onto
//! that subscription's delivery slot for the violated condition. Each slot
//! holds one occurrence, so a slow consumer of one condition only stalls the
//! engine thread reporting that condition.
//!
//! Every subscription owns a fan-in task that merges its slots into the
//! output stream until cancelled, then detaches from the registry, unregisters
//! on the engine side and closes the stream, in that order.
//!
//! The engine keys registrations by (group, condition) rather than by
//! subscriber, and `dcgmPolicySet` replaces a group's whole policy. Each
//! (engine, group) therefore has one `GroupState` that reference-counts the
//! conditions live subscriptions watch and keeps their thresholds. Its lock is
//! held across every foreign call that changes the group, so a departing
//! subscription only unregisters conditions that no subscription holds at the
//! moment of the call, and every policy set covers every live condition.

use futures_util::stream::{self, BoxStream, StreamExt};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use std::ffi::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::condition::{condition_mask, PolicyCondition, PolicyThresholds};
use super::stream::{StateCell, SubscriptionState, ViolationStream};
use super::violation::PolicyViolation;
use crate::common::config::BridgeConfig;
use crate::engine::ffi::{GpuGroupId, PolicyCallbackResponse, GROUP_ALL_GPUS};
use crate::engine::{self, engine_key, Engine, EngineStatus};
use crate::error::{check, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey {
    engine: usize,
    group: GpuGroupId,
}

/// Engine-side state of one GPU group.
#[derive(Debug, Default)]
struct GroupState {
    held: BTreeMap<PolicyCondition, usize>,
    thresholds: PolicyThresholds,
}

impl GroupState {
    /// Conditions at least one live subscription watches.
    fn conditions(&self) -> Vec<PolicyCondition> {
        self.held.keys().copied().collect()
    }

    fn hold(&mut self, conditions: &[PolicyCondition]) {
        for condition in conditions {
            *self.held.entry(*condition).or_default() += 1;
        }
    }

    /// Drop one reference to each of `conditions`, returning the mask of
    /// those no longer held by anyone.
    fn release(&mut self, conditions: &[PolicyCondition]) -> u32 {
        let mut released = 0;
        for condition in conditions {
            if let Some(count) = self.held.get_mut(condition) {
                *count -= 1;
                if *count == 0 {
                    self.held.remove(condition);
                    released |= condition.mask();
                }
            }
        }
        released
    }
}

type SharedGroup = Arc<Mutex<GroupState>>;

fn lock_group(group: &SharedGroup) -> MutexGuard<'_, GroupState> {
    group.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscriptions: HashMap<u64, HashMap<PolicyCondition, mpsc::Sender<PolicyViolation>>>,
    groups: HashMap<GroupKey, SharedGroup>,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    /// The state of `key`, created on first use. Entries are never removed, so
    /// every caller for the same group locks the same state.
    fn group(&mut self, key: GroupKey) -> SharedGroup {
        self.groups.entry(key).or_default().clone()
    }

    fn attach(&mut self, slots: HashMap<PolicyCondition, mpsc::Sender<PolicyViolation>>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.subscriptions.insert(id, slots);
        id
    }

    fn detach(&mut self, id: u64) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    fn slot(&self, id: u64, condition: PolicyCondition) -> Option<mpsc::Sender<PolicyViolation>> {
        self.subscriptions
            .get(&id)
            .and_then(|slots| slots.get(&condition))
            .cloned()
    }
}

/// Number of live subscriptions across the process.
pub fn active_subscriptions() -> usize {
    registry().subscriptions.len()
}

/// Deliver one violation to subscription `id`, blocking while that
/// subscription's slot for the condition is still full.
///
/// Must run outside of an async context, as the engine's callback thread does.
fn dispatch(id: u64, violation: PolicyViolation) -> bool {
    // Clone the sender so the registry lock is not held while blocking.
    let Some(slot) = registry().slot(id, violation.condition) else {
        debug!(
            "Policy: Dropping {} violation for inactive subscription {id}",
            violation.condition
        );
        return false;
    };
    match slot.blocking_send(violation) {
        Ok(()) => true,
        Err(_) => {
            debug!("Policy: Subscription {id} closed during delivery");
            false
        }
    }
}

/// `fpRecvUpdates` entry point registered with the engine for every subscription.
///
/// # Safety
///
/// `response` must be null or point to a valid callback response for the
/// duration of this call.
pub(crate) unsafe extern "C" fn policy_trampoline(
    response: *mut PolicyCallbackResponse,
    user_data: u64,
) -> c_int {
    if response.is_null() {
        warn!("Policy: Callback invoked without a response");
        return 0;
    }
    let Some(violation) = PolicyViolation::from_native(&*response) else {
        warn!(
            "Policy: Ignoring response with unknown condition mask {:#x}",
            (*response).condition
        );
        return 0;
    };

    if panic::catch_unwind(AssertUnwindSafe(|| dispatch(user_data, violation))).is_err() {
        error!("Policy: Violation dispatch panicked for subscription {user_data}");
    }
    0
}

/// Configures and starts a policy-violation subscription.
pub struct SubscriptionBuilder {
    conditions: Vec<PolicyCondition>,
    group: GpuGroupId,
    thresholds: PolicyThresholds,
    engine: Option<Arc<dyn Engine>>,
}

impl SubscriptionBuilder {
    pub fn new(conditions: impl IntoIterator<Item = PolicyCondition>) -> Self {
        Self {
            conditions: conditions.into_iter().collect(),
            group: GROUP_ALL_GPUS,
            thresholds: PolicyThresholds::default(),
            engine: None,
        }
    }

    /// GPU group to watch. Defaults to all GPUs.
    pub fn group(mut self, group: GpuGroupId) -> Self {
        self.group = group;
        self
    }

    pub fn thresholds(mut self, thresholds: PolicyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Use this engine instead of the active one.
    pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the policy, register for callbacks and start the fan-in task.
    ///
    /// The subscription ends when `cancel` (or the stream's own child token)
    /// fires, or when the stream is dropped. Must be called within a Tokio
    /// runtime.
    ///
    /// `dcgmPolicySet` and `dcgmPolicyRegister_v2` run on the calling thread,
    /// so setup errors are returned directly. They wait for any teardown in
    /// progress on the same group to finish its `dcgmPolicyUnregister`. The
    /// teardown itself runs on the blocking pool because it is driven by the
    /// fan-in task.
    ///
    /// The policy set on the group covers this subscription's conditions and
    /// every condition other live subscriptions on the group still watch.
    /// For the threshold conditions named here, these thresholds replace the
    /// ones in effect.
    pub fn subscribe(self, cancel: &CancellationToken) -> Result<ViolationStream> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(e.to_string()))?;
        let engine = match self.engine {
            Some(engine) => engine,
            None => engine::active()?,
        };

        let mut conditions = self.conditions;
        conditions.sort();
        conditions.dedup();
        if conditions.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one policy condition is required".to_string(),
            ));
        }
        let mask = condition_mask(&conditions);
        let group = self.group;
        let state = StateCell::new();

        let shared = registry().group(GroupKey {
            engine: engine_key(&engine),
            group,
        });
        let mut group_state = lock_group(&shared);

        let mut thresholds = group_state.thresholds;
        thresholds.merge(&self.thresholds, &conditions);
        let mut watched = group_state.conditions();
        watched.extend_from_slice(&conditions);
        watched.sort();
        watched.dedup();
        let mut policy = thresholds.to_policy(&watched);
        check("dcgmPolicySet", engine.policy_set(group, &mut policy))?;

        let mut senders = HashMap::with_capacity(conditions.len());
        let mut receivers = Vec::with_capacity(conditions.len());
        for condition in &conditions {
            let (tx, rx) = mpsc::channel(BridgeConfig::DELIVERY_SLOT_CAPACITY);
            senders.insert(*condition, tx);
            receivers.push(rx);
        }
        // Attach before registering so the first callback already has a slot.
        let id = registry().attach(senders);

        let registered = engine.policy_register(group, mask, policy_trampoline, id);
        if let Err(e) = check("dcgmPolicyRegister_v2", registered) {
            registry().detach(id);
            return Err(e);
        }
        group_state.hold(&conditions);
        group_state.thresholds = thresholds;
        drop(group_state);

        state.set(SubscriptionState::Registered);
        debug!(
            "Policy: Subscription {id} registered for mask {mask:#x} on group {group} (policy {:#x})",
            policy.condition
        );

        let token = cancel.child_token();
        let (output, rx) = mpsc::channel(BridgeConfig::VIOLATION_STREAM_CAPACITY);
        runtime.spawn(fan_in(FanIn {
            id,
            engine,
            group,
            shared,
            conditions: conditions.clone(),
            receivers,
            output,
            cancel: token.clone(),
            state: state.clone(),
        }));

        Ok(ViolationStream::new(id, conditions, rx, token, state))
    }
}

/// Subscribe to `conditions` on all GPUs of the active engine.
pub fn subscribe(
    cancel: &CancellationToken,
    conditions: &[PolicyCondition],
) -> Result<ViolationStream> {
    SubscriptionBuilder::new(conditions.iter().copied()).subscribe(cancel)
}

struct FanIn {
    id: u64,
    engine: Arc<dyn Engine>,
    group: GpuGroupId,
    shared: SharedGroup,
    conditions: Vec<PolicyCondition>,
    receivers: Vec<mpsc::Receiver<PolicyViolation>>,
    output: mpsc::Sender<PolicyViolation>,
    cancel: CancellationToken,
    state: StateCell,
}

fn slot_stream(rx: mpsc::Receiver<PolicyViolation>) -> BoxStream<'static, PolicyViolation> {
    stream::unfold(rx, |mut rx| async move {
        let violation = rx.recv().await?;
        Some((violation, rx))
    })
    .boxed()
}

/// Release `conditions` on `shared` and unregister the ones nobody holds any
/// more, under the group lock.
fn release_conditions(
    engine: &dyn Engine,
    shared: &SharedGroup,
    group: GpuGroupId,
    conditions: &[PolicyCondition],
) -> (u32, EngineStatus) {
    let mut group_state = lock_group(shared);
    let released = group_state.release(conditions);
    if released == 0 {
        return (0, EngineStatus::Ok);
    }
    (released, engine.policy_unregister(group, released))
}

async fn fan_in(task: FanIn) {
    let FanIn {
        id,
        engine,
        group,
        shared,
        conditions,
        receivers,
        output,
        cancel,
        state,
    } = task;

    state.set(SubscriptionState::Streaming);
    let mut slots = stream::select_all(receivers.into_iter().map(slot_stream));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = slots.next() => {
                let Some(violation) = next else { break };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = output.send(violation) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    state.set(SubscriptionState::Unregistering);
    registry().detach(id);
    // Dropping the receivers wakes any engine thread blocked on a full slot.
    drop(slots);

    let released = tokio::task::spawn_blocking(move || {
        release_conditions(engine.as_ref(), &shared, group, &conditions)
    })
    .await;
    match released {
        Ok((0, _)) => {
            debug!("Policy: Subscription {id} conditions still held by other subscriptions");
        }
        Ok((mask, status)) if !status.is_ok() => {
            warn!("Policy: Failed to unregister subscription {id} (mask {mask:#x}): {status}");
        }
        Ok(_) => {}
        Err(e) => error!("Policy: Unregister task for subscription {id} failed: {e}"),
    }

    state.set(SubscriptionState::Closed);
    drop(output);
    debug!("Policy: Subscription {id} closed");
}
