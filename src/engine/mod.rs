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

//! The foreign engine boundary.
//!
//! [`Engine`] is the raw, C-shaped surface of the DCGM host engine that the
//! bridge drives: callbacks are `extern "C"` function pointers and user data
//! crosses as raw pointers or integers, exactly as the native library takes
//! them. The bridge never manages the engine lifecycle itself; a caller
//! activates one connected engine for the process with [`activate`] and every
//! bridge operation that is not handed an explicit engine uses it.

pub mod ffi;
#[cfg(target_os = "linux")]
pub mod library;
mod status;

pub use status::EngineStatus;

use once_cell::sync::Lazy;
use std::ffi::c_void;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use ffi::{
    FieldGroupId, FieldValueEnumFn, FieldValueV2, GpuGroupId, GroupEntityPair, Policy,
    PolicyCallbackFn,
};

/// The native entry points the bridge needs from a connected engine.
///
/// Implementations forward to the engine without interpreting the data; all
/// copying, bounding and routing happens in the bridge. Callbacks may be
/// invoked on threads the caller does not control.
pub trait Engine: Send + Sync {
    /// `dcgmGetValuesSince_v2`: invoke `callback` once per entity batch with
    /// every sample recorded after `since`, then store the cursor for the next
    /// incremental query in `next_since`.
    fn get_values_since(
        &self,
        group: GpuGroupId,
        field_group: FieldGroupId,
        since: i64,
        next_since: &mut i64,
        callback: FieldValueEnumFn,
        user_data: *mut c_void,
    ) -> EngineStatus;

    /// `dcgmEntitiesGetLatestValues`: fill `values` entity-major, one slot per
    /// (entity, field) pair. `values.len()` must equal
    /// `entities.len() * fields.len()`.
    fn entities_get_latest_values(
        &self,
        entities: &[GroupEntityPair],
        fields: &[u16],
        flags: u32,
        values: &mut [FieldValueV2],
    ) -> EngineStatus;

    /// `dcgmPolicySet`
    fn policy_set(&self, group: GpuGroupId, policy: &mut Policy) -> EngineStatus;

    /// `dcgmPolicyRegister_v2`: `callback` receives `user_data` verbatim.
    fn policy_register(
        &self,
        group: GpuGroupId,
        condition: u32,
        callback: PolicyCallbackFn,
        user_data: u64,
    ) -> EngineStatus;

    /// `dcgmPolicyUnregister`
    fn policy_unregister(&self, group: GpuGroupId, condition: u32) -> EngineStatus;
}

static ACTIVE_ENGINE: Lazy<RwLock<Option<Arc<dyn Engine>>>> = Lazy::new(|| RwLock::new(None));

/// Install the engine used by bridge operations, returning the previous one.
pub fn activate(engine: Arc<dyn Engine>) -> Option<Arc<dyn Engine>> {
    debug!("DCGM: Activating engine handle");
    ACTIVE_ENGINE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(engine)
}

/// Remove the active engine. Operations started afterwards fail immediately.
pub fn deactivate() -> Option<Arc<dyn Engine>> {
    debug!("DCGM: Deactivating engine handle");
    ACTIVE_ENGINE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

/// The active engine, or `Uninitialized` when none is installed.
pub fn active() -> Result<Arc<dyn Engine>> {
    ACTIVE_ENGINE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(Error::Engine {
            call: "engine handle",
            status: EngineStatus::Uninitialized,
        })
}

pub fn is_active() -> bool {
    ACTIVE_ENGINE
        .read()
        .map(|guard| guard.is_some())
        .unwrap_or(false)
}

/// Identity of an engine instance, used to key engine-side registrations.
pub(crate) fn engine_key(engine: &Arc<dyn Engine>) -> usize {
    Arc::as_ptr(engine) as *const () as usize
}
