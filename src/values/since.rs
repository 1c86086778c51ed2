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

//! Bounded aggregation of `dcgmGetValuesSince_v2` callbacks.
//!
//! The engine answers one values-since request by invoking a native callback
//! once per entity batch, as many times as it has data for, with record arrays
//! that are only valid until each invocation returns. [`ValuesSinceQuery`]
//! stages those batches into an owned buffer behind a mutex and hands the
//! whole buffer back once the foreign call returns.
//!
//! A request never yields a truncated result: as soon as a batch would push
//! the buffer past the query's limit, copying stops and the request fails with
//! [`Error::LimitExceeded`].

use std::ffi::{c_int, c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, warn};

use super::owned::OwnedValue;
use crate::common::config::BridgeConfig;
use crate::engine::ffi::{FieldGroupId, FieldValueV1, GpuGroupId};
use crate::engine::{self, Engine};
use crate::error::{check, Error, Result};

/// Result of one values-since request.
#[derive(Debug, Clone, Default)]
pub struct ValuesSince {
    /// Every sample recorded after the requested cursor. No ordering is
    /// guaranteed across entities.
    pub values: Vec<OwnedValue>,
    /// Cursor to pass as `since` for the next incremental request.
    pub next_since: i64,
}

/// A values-since request against one GPU group and one field group.
#[derive(Debug, Clone)]
pub struct ValuesSinceQuery {
    group: GpuGroupId,
    field_group: FieldGroupId,
    since: i64,
    limit: usize,
}

impl ValuesSinceQuery {
    pub fn new(group: GpuGroupId, field_group: FieldGroupId) -> Self {
        Self {
            group,
            field_group,
            since: 0,
            limit: BridgeConfig::MAX_CALLBACK_VALUES,
        }
    }

    /// Only return samples recorded after this cursor. 0 means all retained samples.
    pub fn since(mut self, since: i64) -> Self {
        self.since = since;
        self
    }

    /// Lower the per-request ceiling. Values above `MAX_CALLBACK_VALUES` are clamped.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.min(BridgeConfig::MAX_CALLBACK_VALUES);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
    }

    /// Run the request against the active engine.
    pub fn collect(&self) -> Result<ValuesSince> {
        let engine = engine::active()?;
        self.collect_with(engine.as_ref())
    }

    /// Run the request against an explicit engine.
    ///
    /// Blocks for the duration of the foreign call; it cannot be interrupted.
    pub fn collect_with(&self, engine: &dyn Engine) -> Result<ValuesSince> {
        let aggregation = Aggregation::new(self.limit);
        let mut next_since = self.since;

        let status = engine.get_values_since(
            self.group,
            self.field_group,
            self.since,
            &mut next_since,
            values_since_trampoline,
            &aggregation as *const Aggregation as *mut c_void,
        );

        let staged = aggregation.finish();
        if staged.limit_exceeded {
            warn!(
                "DCGM: Values-since on group {} exceeded {} values, discarding partial results",
                self.group, self.limit
            );
            return Err(Error::LimitExceeded { limit: self.limit });
        }
        if let Some(message) = staged.callback_failure {
            return Err(Error::Callback(message));
        }
        check("dcgmGetValuesSince_v2", status)?;

        debug!(
            "DCGM: Collected {} value(s) from {} callback(s), next cursor {next_since}",
            staged.values.len(),
            staged.invocations
        );
        Ok(ValuesSince {
            values: staged.values,
            next_since,
        })
    }
}

/// Collect every sample after `since` from the active engine.
pub fn collect(group: GpuGroupId, field_group: FieldGroupId, since: i64) -> Result<ValuesSince> {
    ValuesSinceQuery::new(group, field_group)
        .since(since)
        .collect()
}

/// Staging state for one in-flight request.
struct Aggregation {
    limit: usize,
    buffer: Mutex<AggregationBuffer>,
}

#[derive(Default)]
struct AggregationBuffer {
    values: Vec<OwnedValue>,
    limit_exceeded: bool,
    callback_failure: Option<String>,
    invocations: usize,
}

impl Aggregation {
    fn new(limit: usize) -> Self {
        let initial = BridgeConfig::INITIAL_AGGREGATION_CAPACITY.min(limit);
        Self {
            limit,
            buffer: Mutex::new(AggregationBuffer {
                values: Vec::with_capacity(initial),
                ..Default::default()
            }),
        }
    }

    /// Copy one native batch into the buffer. Runs on the engine's thread.
    fn absorb(&self, entity_group_id: u32, entity_id: u32, batch: &[FieldValueV1]) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.invocations += 1;
        if buffer.limit_exceeded {
            return;
        }

        let needed = buffer.values.len().saturating_add(batch.len());
        if needed > self.limit {
            buffer.limit_exceeded = true;
            return;
        }

        reserve_geometric(&mut buffer.values, needed, self.limit);
        buffer.values.extend(
            batch
                .iter()
                .map(|native| OwnedValue::from_v1(entity_group_id, entity_id, native)),
        );
    }

    fn record_failure(&self, message: String) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.callback_failure.get_or_insert(message);
    }

    fn finish(self) -> AggregationBuffer {
        self.buffer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Grow `values` so it can hold `needed` items, doubling with a floor and never
/// reserving past `limit`.
fn reserve_geometric<T>(values: &mut Vec<T>, needed: usize, limit: usize) {
    if needed <= values.capacity() {
        return;
    }
    let target = values
        .capacity()
        .saturating_mul(2)
        .max(BridgeConfig::MIN_AGGREGATION_GROWTH)
        .max(needed)
        .min(limit.max(needed));
    values.reserve_exact(target - values.len());
}

/// `dcgmFieldValueEntityEnumeration_f` entry point handed to the engine.
///
/// # Safety
///
/// `user_data` must point to the live `Aggregation` of the request that issued
/// the foreign call, and `values` must point to `num_values` initialized records
/// for the duration of this call.
unsafe extern "C" fn values_since_trampoline(
    entity_group_id: c_uint,
    entity_id: c_uint,
    values: *mut FieldValueV1,
    num_values: c_int,
    user_data: *mut c_void,
) -> c_int {
    if user_data.is_null() {
        error!("DCGM: Values-since callback invoked without user data");
        return 0;
    }
    let aggregation = &*(user_data as *const Aggregation);

    let batch: &[FieldValueV1] = if values.is_null() || num_values <= 0 {
        &[]
    } else {
        std::slice::from_raw_parts(values, num_values as usize)
    };

    let absorbed = panic::catch_unwind(AssertUnwindSafe(|| {
        aggregation.absorb(entity_group_id, entity_id, batch)
    }));
    if let Err(payload) = absorbed {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic while copying field values".to_string());
        error!("DCGM: Values-since callback panicked: {message}");
        aggregation.record_failure(message);
    }
    0
}
