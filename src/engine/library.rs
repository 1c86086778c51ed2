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

//! Dynamically loaded `libdcgm` backend.
//!
//! The library is opened at runtime so the crate builds and runs on hosts
//! without DCGM installed. Only the entry points the bridge drives are
//! resolved, plus the minimum needed to obtain a handle: `dcgmInit` and either
//! an embedded host engine or a connection to a standalone `nv-hostengine`.

use libloading::Library;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::path::Path;
use tracing::{debug, warn};

use super::ffi::{
    DcgmHandle, FieldGroupId, FieldValueEnumFn, FieldValueV2, GpuGroupId, GroupEntityPair, Policy,
    PolicyCallbackFn,
};
use super::{Engine, EngineStatus};
use crate::common::config::EnvConfig;
use crate::error::{check, Error, Result};

const LIBDCGM_PATHS: &[&str] = &[
    "libdcgm.so.4",
    "libdcgm.so.3",
    "libdcgm.so",
    "/usr/lib/x86_64-linux-gnu/libdcgm.so.4",
    "/usr/lib/aarch64-linux-gnu/libdcgm.so.4",
    "/usr/lib64/libdcgm.so.4",
];

/// `DCGM_OPERATION_MODE_AUTO`
const OPERATION_MODE_AUTO: c_uint = 1;

type InitFn = unsafe extern "C" fn() -> c_int;
type ShutdownFn = unsafe extern "C" fn() -> c_int;
type StartEmbeddedFn = unsafe extern "C" fn(c_uint, *mut DcgmHandle) -> c_int;
type StopEmbeddedFn = unsafe extern "C" fn(DcgmHandle) -> c_int;
type ConnectFn = unsafe extern "C" fn(*mut c_char, *mut DcgmHandle) -> c_int;
type DisconnectFn = unsafe extern "C" fn(DcgmHandle) -> c_int;
type ErrorStringFn = unsafe extern "C" fn(c_int) -> *const c_char;
type GetValuesSinceFn = unsafe extern "C" fn(
    DcgmHandle,
    GpuGroupId,
    FieldGroupId,
    i64,
    *mut i64,
    FieldValueEnumFn,
    *mut c_void,
) -> c_int;
type EntitiesGetLatestValuesFn = unsafe extern "C" fn(
    DcgmHandle,
    *mut GroupEntityPair,
    c_uint,
    *mut u16,
    c_uint,
    c_uint,
    *mut FieldValueV2,
) -> c_int;
type PolicySetFn = unsafe extern "C" fn(DcgmHandle, GpuGroupId, *mut Policy, usize) -> c_int;
type PolicyRegisterFn =
    unsafe extern "C" fn(DcgmHandle, GpuGroupId, c_uint, PolicyCallbackFn, u64) -> c_int;
type PolicyUnregisterFn = unsafe extern "C" fn(DcgmHandle, GpuGroupId, c_uint) -> c_int;

/// Resolved entry points. Function pointers are copied out of the library and
/// stay valid as long as the owning [`Library`] is loaded.
struct DcgmApi {
    init: InitFn,
    shutdown: ShutdownFn,
    start_embedded: StartEmbeddedFn,
    stop_embedded: StopEmbeddedFn,
    connect: ConnectFn,
    disconnect: DisconnectFn,
    error_string: ErrorStringFn,
    get_values_since: GetValuesSinceFn,
    entities_get_latest_values: EntitiesGetLatestValuesFn,
    policy_set: PolicySetFn,
    policy_register: PolicyRegisterFn,
    policy_unregister: PolicyUnregisterFn,
}

unsafe fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    library
        .get::<T>(bytes.as_slice())
        .map(|sym| *sym)
        .map_err(|e| Error::Library(format!("missing symbol {name}: {e}")))
}

impl DcgmApi {
    unsafe fn resolve(library: &Library) -> Result<Self> {
        Ok(Self {
            init: symbol(library, "dcgmInit")?,
            shutdown: symbol(library, "dcgmShutdown")?,
            start_embedded: symbol(library, "dcgmStartEmbedded")?,
            stop_embedded: symbol(library, "dcgmStopEmbedded")?,
            connect: symbol(library, "dcgmConnect")?,
            disconnect: symbol(library, "dcgmDisconnect")?,
            error_string: symbol(library, "errorString")?,
            get_values_since: symbol(library, "dcgmGetValuesSince_v2")?,
            entities_get_latest_values: symbol(library, "dcgmEntitiesGetLatestValues")?,
            policy_set: symbol(library, "dcgmPolicySet")?,
            policy_register: symbol(library, "dcgmPolicyRegister_v2")?,
            policy_unregister: symbol(library, "dcgmPolicyUnregister")?,
        })
    }
}

/// How the handle was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Run the host engine inside this process.
    Embedded,
    /// Connect to a standalone `nv-hostengine` at the given address.
    Standalone(String),
}

/// A connected `libdcgm` engine.
pub struct LibDcgm {
    api: DcgmApi,
    handle: DcgmHandle,
    mode: ConnectionMode,
    _library: Library,
}

impl LibDcgm {
    /// Load `libdcgm` from `DCGM_LIBRARY_PATH` or the standard locations and connect.
    pub fn open(mode: ConnectionMode) -> Result<Self> {
        if let Some(path) = EnvConfig::library_path_override() {
            return Self::open_path(&path, mode);
        }

        let mut last_error = None;
        for path in LIBDCGM_PATHS {
            match Self::open_path(Path::new(path), mode.clone()) {
                Ok(engine) => return Ok(engine),
                Err(e @ Error::Library(_)) => {
                    debug!("DCGM: {path} unavailable: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Library("libdcgm not found".to_string())))
    }

    /// Load `libdcgm` from an explicit path and connect.
    pub fn open_path(path: &Path, mode: ConnectionMode) -> Result<Self> {
        debug!("DCGM: Trying to load library at: {}", path.display());
        // SAFETY: loading libdcgm runs its initializers, which have no
        // preconditions beyond the library being a genuine DCGM build.
        let library = unsafe { Library::new(path.as_os_str()) }
            .map_err(|e| Error::Library(format!("{}: {e}", path.display())))?;
        let api = unsafe { DcgmApi::resolve(&library)? };

        check("dcgmInit", unsafe { (api.init)() }.into())?;

        let mut handle: DcgmHandle = 0;
        let connected = match &mode {
            ConnectionMode::Embedded => unsafe {
                (api.start_embedded)(OPERATION_MODE_AUTO, &mut handle)
            },
            ConnectionMode::Standalone(address) => {
                let address = CString::new(address.as_str())
                    .map_err(|_| Error::InvalidArgument(format!("address {address:?}")))?;
                unsafe { (api.connect)(address.as_ptr() as *mut c_char, &mut handle) }
            }
        };
        if let Err(e) = check("dcgmConnect", connected.into()) {
            unsafe { (api.shutdown)() };
            return Err(e);
        }

        debug!("DCGM: Connected ({mode:?}) via {}", path.display());
        Ok(Self {
            api,
            handle,
            mode,
            _library: library,
        })
    }

    pub fn mode(&self) -> &ConnectionMode {
        &self.mode
    }

    /// The engine's own description of a return code.
    pub fn error_string(&self, status: EngineStatus) -> Option<String> {
        let ptr = unsafe { (self.api.error_string)(status.code()) };
        if ptr.is_null() {
            return None;
        }
        // SAFETY: errorString returns a static NUL-terminated string.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

impl Engine for LibDcgm {
    fn get_values_since(
        &self,
        group: GpuGroupId,
        field_group: FieldGroupId,
        since: i64,
        next_since: &mut i64,
        callback: FieldValueEnumFn,
        user_data: *mut c_void,
    ) -> EngineStatus {
        unsafe {
            (self.api.get_values_since)(
                self.handle,
                group,
                field_group,
                since,
                next_since,
                callback,
                user_data,
            )
        }
        .into()
    }

    fn entities_get_latest_values(
        &self,
        entities: &[GroupEntityPair],
        fields: &[u16],
        flags: u32,
        values: &mut [FieldValueV2],
    ) -> EngineStatus {
        if values.len() != entities.len() * fields.len() {
            return EngineStatus::BadParam;
        }
        // The engine only reads the entity and field arrays despite the
        // non-const prototype.
        unsafe {
            (self.api.entities_get_latest_values)(
                self.handle,
                entities.as_ptr() as *mut GroupEntityPair,
                entities.len() as c_uint,
                fields.as_ptr() as *mut u16,
                fields.len() as c_uint,
                flags,
                values.as_mut_ptr(),
            )
        }
        .into()
    }

    fn policy_set(&self, group: GpuGroupId, policy: &mut Policy) -> EngineStatus {
        unsafe { (self.api.policy_set)(self.handle, group, policy, 0) }.into()
    }

    fn policy_register(
        &self,
        group: GpuGroupId,
        condition: u32,
        callback: PolicyCallbackFn,
        user_data: u64,
    ) -> EngineStatus {
        unsafe { (self.api.policy_register)(self.handle, group, condition, callback, user_data) }
            .into()
    }

    fn policy_unregister(&self, group: GpuGroupId, condition: u32) -> EngineStatus {
        unsafe { (self.api.policy_unregister)(self.handle, group, condition) }.into()
    }
}

impl Drop for LibDcgm {
    fn drop(&mut self) {
        let status: EngineStatus = match self.mode {
            ConnectionMode::Embedded => unsafe { (self.api.stop_embedded)(self.handle) },
            ConnectionMode::Standalone(_) => unsafe { (self.api.disconnect)(self.handle) },
        }
        .into();
        if !status.is_ok() {
            warn!("DCGM: Failed to release engine handle: {status}");
        }
        let status: EngineStatus = unsafe { (self.api.shutdown)() }.into();
        if !status.is_ok() {
            warn!("DCGM: dcgmShutdown failed: {status}");
        }
    }
}
