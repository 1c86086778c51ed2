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

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::records;
use crate::engine::ffi::{
    FieldGroupId, FieldValueEnumFn, FieldValueV1, FieldValueV2, GpuGroupId, GroupEntityPair,
    Policy, PolicyCallbackFn, PolicyCallbackResponse, FT_INT64,
};
use crate::engine::{Engine, EngineStatus};
use crate::values::Entity;

/// One live `dcgmPolicyRegister_v2` registration.
#[derive(Debug, Clone, Copy)]
pub struct MockRegistration {
    pub group: GpuGroupId,
    pub condition: u32,
    pub user_data: u64,
    callback: PolicyCallbackFn,
}

#[derive(Clone)]
struct MockBatch {
    entity_group_id: u32,
    entity_id: u32,
    values: Vec<FieldValueV1>,
}

struct MockState {
    batches: Vec<MockBatch>,
    values_since_status: EngineStatus,
    next_since: i64,
    values_since_calls: usize,
    latest: HashMap<(u32, u32, u16), FieldValueV2>,
    latest_status: EngineStatus,
    latest_calls: usize,
    last_policy: Option<(GpuGroupId, Policy)>,
    policies: HashMap<GpuGroupId, Policy>,
    policy_set_status: EngineStatus,
    register_status: EngineStatus,
    registrations: Vec<MockRegistration>,
    unregister_calls: Vec<(GpuGroupId, u32)>,
    unregister_delay: Duration,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            batches: Vec::new(),
            values_since_status: EngineStatus::Ok,
            next_since: 0,
            values_since_calls: 0,
            latest: HashMap::new(),
            latest_status: EngineStatus::Ok,
            latest_calls: 0,
            last_policy: None,
            policies: HashMap::new(),
            policy_set_status: EngineStatus::Ok,
            register_status: EngineStatus::Ok,
            registrations: Vec::new(),
            unregister_calls: Vec::new(),
            unregister_delay: Duration::ZERO,
        }
    }
}

/// A scriptable in-process engine.
#[derive(Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

/// Overwrite a record the way a reused native buffer would be.
fn scribble(record: &mut FieldValueV1) {
    record.field_id = u16::MAX;
    record.status = EngineStatus::GenericError.code();
    record.ts = -1;
    record.value.int64 = i64::MIN;
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two GPUs with temperature, power and utilization samples.
    pub fn with_demo_data() -> Self {
        let engine = Self::new();
        let base_ts = chrono::Utc::now().timestamp_micros();
        for gpu in 0..2u32 {
            let offset = i64::from(gpu);
            engine.push_batch(
                Entity::gpu(gpu),
                vec![
                    records::int64_value(records::FI_DEV_GPU_TEMP, base_ts, 61 + offset * 4),
                    records::float64_value(
                        records::FI_DEV_POWER_USAGE,
                        base_ts,
                        182.5 + offset as f64 * 10.0,
                    ),
                    records::int64_value(records::FI_DEV_GPU_UTIL, base_ts, 87 - offset * 30),
                ],
            );
            engine.set_latest(
                Entity::gpu(gpu),
                records::int64_value(records::FI_DEV_GPU_TEMP, base_ts, 61 + offset * 4),
            );
            engine.set_latest(
                Entity::gpu(gpu),
                records::float64_value(
                    records::FI_DEV_POWER_USAGE,
                    base_ts,
                    182.5 + offset as f64 * 10.0,
                ),
            );
            engine.set_latest(
                Entity::gpu(gpu),
                records::string_value(records::FI_DEV_NAME, base_ts, "NVIDIA H100 80GB HBM3"),
            );
        }
        engine.set_next_since(base_ts + 1);
        engine
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue one callback invocation for values-since requests.
    pub fn push_batch(&self, entity: Entity, values: Vec<FieldValueV1>) {
        self.lock().batches.push(MockBatch {
            entity_group_id: entity.group.raw(),
            entity_id: entity.id,
            values,
        });
    }

    pub fn clear_batches(&self) {
        self.lock().batches.clear();
    }

    /// Status returned by values-since requests after the batches are delivered.
    pub fn set_values_since_status(&self, status: EngineStatus) {
        self.lock().values_since_status = status;
    }

    pub fn set_next_since(&self, next_since: i64) {
        self.lock().next_since = next_since;
    }

    pub fn values_since_calls(&self) -> usize {
        self.lock().values_since_calls
    }

    /// Latest value of `record.field_id` for `entity`. Slots without one
    /// report `NoData`.
    pub fn set_latest(&self, entity: Entity, record: FieldValueV1) {
        let mut native = FieldValueV2::zeroed();
        native.entity_group_id = entity.group.raw();
        native.entity_id = entity.id;
        native.field_id = record.field_id;
        native.field_type = record.field_type;
        native.status = record.status;
        native.ts = record.ts;
        native.value = record.value;
        self.lock()
            .latest
            .insert((native.entity_group_id, entity.id, record.field_id), native);
    }

    pub fn set_latest_status(&self, status: EngineStatus) {
        self.lock().latest_status = status;
    }

    pub fn latest_calls(&self) -> usize {
        self.lock().latest_calls
    }

    pub fn set_policy_set_status(&self, status: EngineStatus) {
        self.lock().policy_set_status = status;
    }

    /// Status returned by subsequent policy registrations.
    pub fn set_register_status(&self, status: EngineStatus) {
        self.lock().register_status = status;
    }

    /// The last policy set, with its group.
    pub fn last_policy(&self) -> Option<(GpuGroupId, Policy)> {
        self.lock().last_policy
    }

    /// The policy currently in effect on `group`.
    pub fn policy(&self, group: GpuGroupId) -> Option<Policy> {
        self.lock().policies.get(&group).copied()
    }

    /// Make every subsequent `dcgmPolicyUnregister` take `delay` before it
    /// takes effect.
    pub fn set_unregister_delay(&self, delay: Duration) {
        self.lock().unregister_delay = delay;
    }

    pub fn registrations(&self) -> Vec<MockRegistration> {
        self.lock().registrations.clone()
    }

    /// Union of every registered condition bit.
    pub fn registered_mask(&self) -> u32 {
        self.lock()
            .registrations
            .iter()
            .fold(0, |mask, r| mask | r.condition)
    }

    pub fn unregister_calls(&self) -> Vec<(GpuGroupId, u32)> {
        self.lock().unregister_calls.clone()
    }

    /// Deliver `response` to every registration watching its condition, the
    /// way the engine's notification thread does, and return how many
    /// callbacks ran. A condition missing from the group's current policy is
    /// not watched, so nothing is delivered for it.
    ///
    /// Blocks while a subscriber's delivery slot is full, so it must not be
    /// called from an async context.
    pub fn fire_violation(&self, response: PolicyCallbackResponse) -> usize {
        let targets: Vec<MockRegistration> = {
            let state = self.lock();
            state
                .registrations
                .iter()
                .filter(|r| r.condition & response.condition != 0)
                .filter(|r| {
                    state
                        .policies
                        .get(&r.group)
                        .is_some_and(|policy| policy.condition & response.condition != 0)
                })
                .copied()
                .collect()
        };

        for registration in &targets {
            let mut native = response;
            // SAFETY: `native` is a valid response for the duration of the call.
            unsafe {
                (registration.callback)(&mut native, registration.user_data);
            }
            native.condition = u32::MAX;
            native.gpu_id = u32::MAX;
        }
        targets.len()
    }
}

impl Engine for MockEngine {
    fn get_values_since(
        &self,
        _group: GpuGroupId,
        _field_group: FieldGroupId,
        _since: i64,
        next_since: &mut i64,
        callback: FieldValueEnumFn,
        user_data: *mut c_void,
    ) -> EngineStatus {
        let (batches, status, cursor) = {
            let mut state = self.lock();
            state.values_since_calls += 1;
            (
                state.batches.clone(),
                state.values_since_status,
                state.next_since,
            )
        };

        for mut batch in batches {
            // SAFETY: the array stays valid until the callback returns.
            let rc = unsafe {
                callback(
                    batch.entity_group_id,
                    batch.entity_id,
                    batch.values.as_mut_ptr(),
                    batch.values.len() as i32,
                    user_data,
                )
            };
            batch.values.iter_mut().for_each(scribble);
            if rc != 0 {
                break;
            }
        }

        *next_since = cursor;
        status
    }

    fn entities_get_latest_values(
        &self,
        entities: &[GroupEntityPair],
        fields: &[u16],
        _flags: u32,
        values: &mut [FieldValueV2],
    ) -> EngineStatus {
        if values.len() != entities.len() * fields.len() {
            return EngineStatus::BadParam;
        }
        let mut state = self.lock();
        state.latest_calls += 1;
        if !state.latest_status.is_ok() {
            return state.latest_status;
        }

        let slots = entities
            .iter()
            .flat_map(|entity| fields.iter().map(move |field| (*entity, *field)));
        for (slot, (entity, field_id)) in values.iter_mut().zip(slots) {
            *slot = match state
                .latest
                .get(&(entity.entity_group_id, entity.entity_id, field_id))
            {
                Some(native) => *native,
                None => {
                    let mut blank = FieldValueV2::zeroed();
                    blank.entity_group_id = entity.entity_group_id;
                    blank.entity_id = entity.entity_id;
                    blank.field_id = field_id;
                    blank.field_type = FT_INT64;
                    blank.status = EngineStatus::NoData.code();
                    blank
                }
            };
        }
        EngineStatus::Ok
    }

    fn policy_set(&self, group: GpuGroupId, policy: &mut Policy) -> EngineStatus {
        let mut state = self.lock();
        if !state.policy_set_status.is_ok() {
            return state.policy_set_status;
        }
        state.last_policy = Some((group, *policy));
        state.policies.insert(group, *policy);
        EngineStatus::Ok
    }

    fn policy_register(
        &self,
        group: GpuGroupId,
        condition: u32,
        callback: PolicyCallbackFn,
        user_data: u64,
    ) -> EngineStatus {
        let mut state = self.lock();
        if !state.register_status.is_ok() {
            return state.register_status;
        }
        debug!("Mock: Registered user data {user_data} for mask {condition:#x}");
        state.registrations.push(MockRegistration {
            group,
            condition,
            user_data,
            callback,
        });
        EngineStatus::Ok
    }

    fn policy_unregister(&self, group: GpuGroupId, condition: u32) -> EngineStatus {
        let delay = self.lock().unregister_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        state.unregister_calls.push((group, condition));
        for registration in state.registrations.iter_mut() {
            if registration.group == group {
                registration.condition &= !condition;
            }
        }
        state.registrations.retain(|r| r.condition != 0);
        EngineStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{latest_values_with, ValuesSinceQuery};
    use crate::GROUP_ALL_GPUS;

    #[test]
    fn test_demo_data_is_queryable() {
        let engine = MockEngine::with_demo_data();
        let result = ValuesSinceQuery::new(GROUP_ALL_GPUS, 1)
            .collect_with(&engine)
            .unwrap();
        assert_eq!(result.values.len(), 6);
        assert!(result.next_since > 0);

        let latest = latest_values_with(
            &engine,
            &[Entity::gpu(0), Entity::gpu(1)],
            &[records::FI_DEV_GPU_TEMP, records::FI_DEV_NAME],
            0,
        )
        .unwrap();
        assert_eq!(latest.len(), 4);
        assert_eq!(latest[1].as_str(), Some("NVIDIA H100 80GB HBM3"));
        assert_eq!(latest[2].as_i64(), Some(65));
    }

    #[test]
    fn test_unregister_clears_only_named_bits() {
        unsafe extern "C" fn noop(_: *mut PolicyCallbackResponse, _: u64) -> i32 {
            0
        }
        let engine = MockEngine::new();
        assert!(engine.policy_register(0, 0x48, noop, 1).is_ok());
        assert!(engine.policy_unregister(0, 0x08).is_ok());
        assert_eq!(engine.registered_mask(), 0x40);
        assert!(engine.policy_unregister(0, 0x40).is_ok());
        assert!(engine.registrations().is_empty());
    }

    #[test]
    fn test_delivery_follows_the_group_policy() {
        unsafe extern "C" fn noop(_: *mut PolicyCallbackResponse, _: u64) -> i32 {
            0
        }
        let engine = MockEngine::new();
        assert!(engine.policy_register(0, 0x48, noop, 1).is_ok());
        // Registered but no policy yet.
        assert_eq!(engine.fire_violation(records::xid_response(0, 13, 1)), 0);

        let mut policy = Policy::zeroed();
        policy.condition = 0x40;
        assert!(engine.policy_set(0, &mut policy).is_ok());
        assert_eq!(engine.fire_violation(records::xid_response(0, 13, 1)), 1);
        assert_eq!(engine.fire_violation(records::thermal_response(0, 95, 1)), 0);

        // A new policy replaces the old one.
        policy.condition = 0x08;
        assert!(engine.policy_set(0, &mut policy).is_ok());
        assert_eq!(engine.fire_violation(records::xid_response(0, 13, 1)), 0);
        assert_eq!(engine.policy(0).map(|p| p.condition), Some(0x08));
    }
}
