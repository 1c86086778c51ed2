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

//! C layouts of the DCGM structures that cross the foreign boundary.
//!
//! These mirror `dcgm_structs.h`. Only the subset the bridge touches is
//! declared; every struct here is plain data with no pointers, so a zeroed
//! value is always a valid value.

#![allow(non_camel_case_types)]

use std::ffi::{c_int, c_uint, c_void};
use std::mem::size_of;

/// `DCGM_MAX_STR_LENGTH`
pub const MAX_STR_LENGTH: usize = 256;
/// `DCGM_MAX_BLOB_LENGTH`
pub const MAX_BLOB_LENGTH: usize = 4096;
/// `DCGM_POLICY_COND_MAX`
pub const POLICY_COND_MAX: usize = 7;

/// `dcgmHandle_t`
pub type DcgmHandle = usize;
/// `dcgmGpuGrp_t`
pub type GpuGroupId = usize;
/// `dcgmFieldGrp_t`
pub type FieldGroupId = usize;

/// `DCGM_GROUP_ALL_GPUS`
pub const GROUP_ALL_GPUS: GpuGroupId = 0x7fff_ffff;

// Field type tags (`DCGM_FT_*`)
pub const FT_BINARY: u16 = b'b' as u16;
pub const FT_DOUBLE: u16 = b'd' as u16;
pub const FT_INT64: u16 = b'i' as u16;
pub const FT_STRING: u16 = b's' as u16;
pub const FT_TIMESTAMP: u16 = b't' as u16;

/// `MAKE_DCGM_VERSION(type, ver)`
pub const fn make_version(struct_size: usize, version: u32) -> c_uint {
    (struct_size as u32) | (version << 24)
}

/// Payload union of a field value. Which member is live depends on the
/// record's field type tag.
#[repr(C)]
#[derive(Clone, Copy)]
pub union NativeValue {
    pub int64: i64,
    pub float64: f64,
    pub string: [u8; MAX_STR_LENGTH],
    pub blob: [u8; MAX_BLOB_LENGTH],
}

/// `dcgmFieldValue_v1`: the entity comes from the enumeration callback arguments.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FieldValueV1 {
    pub version: c_uint,
    pub field_id: u16,
    pub field_type: u16,
    pub status: c_int,
    pub ts: i64,
    pub value: NativeValue,
}

/// `dcgmFieldValue_v2`: the entity is carried in the record.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FieldValueV2 {
    pub version: c_uint,
    pub entity_group_id: c_uint,
    pub entity_id: c_uint,
    pub field_id: u16,
    pub field_type: u16,
    pub status: c_int,
    pub unused: c_uint,
    pub ts: i64,
    pub value: NativeValue,
}

impl FieldValueV1 {
    pub const VERSION: c_uint = make_version(size_of::<FieldValueV1>(), 1);

    pub fn zeroed() -> Self {
        // SAFETY: plain data, every bit pattern is valid.
        let mut value: Self = unsafe { std::mem::zeroed() };
        value.version = Self::VERSION;
        value
    }
}

impl FieldValueV2 {
    pub const VERSION: c_uint = make_version(size_of::<FieldValueV2>(), 2);

    pub fn zeroed() -> Self {
        // SAFETY: plain data, every bit pattern is valid.
        let mut value: Self = unsafe { std::mem::zeroed() };
        value.version = Self::VERSION;
        value
    }
}

/// `dcgmGroupEntityPair_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupEntityPair {
    pub entity_group_id: c_uint,
    pub entity_id: c_uint,
}

/// `dcgmFieldValueEntityEnumeration_f`
///
/// Invoked once per entity batch. `values` is only valid for the duration of
/// the call. Returning 0 lets the engine continue the enumeration.
pub type FieldValueEnumFn = unsafe extern "C" fn(
    entity_group_id: c_uint,
    entity_id: c_uint,
    values: *mut FieldValueV1,
    num_values: c_int,
    user_data: *mut c_void,
) -> c_int;

// --- Policy structures ---

/// `dcgmPolicyConditionParams_t`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PolicyConditionParams {
    /// 0 = boolean, 1 = long long (`BOOL`, `LLONG`)
    pub tag: c_uint,
    pub val: PolicyConditionValue,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union PolicyConditionValue {
    pub boolean: c_uint,
    pub llval: u64,
}

pub const POLICY_PARAM_BOOL: c_uint = 0;
pub const POLICY_PARAM_LLONG: c_uint = 1;

impl PolicyConditionParams {
    pub fn boolean(enabled: bool) -> Self {
        Self {
            tag: POLICY_PARAM_BOOL,
            val: PolicyConditionValue {
                boolean: enabled as c_uint,
            },
        }
    }

    pub fn llong(value: u64) -> Self {
        Self {
            tag: POLICY_PARAM_LLONG,
            val: PolicyConditionValue { llval: value },
        }
    }
}

/// `dcgmPolicy_v1`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Policy {
    pub version: c_uint,
    pub condition: c_uint,
    pub mode: c_uint,
    pub isolation: c_uint,
    pub action: c_uint,
    pub validation: c_uint,
    pub response: c_uint,
    pub parms: [PolicyConditionParams; POLICY_COND_MAX],
}

// dcgmPolicyMode_t / dcgmPolicyAction_t / dcgmPolicyValidation_t
pub const POLICY_MODE_AUTOMATED: c_uint = 0;
pub const POLICY_MODE_MANUAL: c_uint = 1;
pub const POLICY_ACTION_NONE: c_uint = 0;
pub const POLICY_VALID_NONE: c_uint = 0;
pub const POLICY_ISOLATION_NONE: c_uint = 0;
pub const POLICY_FAILURE_NONE: c_uint = 0;

impl Policy {
    pub const VERSION: c_uint = make_version(size_of::<Policy>(), 1);

    pub fn zeroed() -> Self {
        // SAFETY: plain data, every bit pattern is valid.
        let mut policy: Self = unsafe { std::mem::zeroed() };
        policy.version = Self::VERSION;
        policy
    }
}

/// `dcgmPolicyConditionDbe_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DbeCondition {
    pub timestamp: i64,
    pub location: c_uint,
    pub num_errors: c_uint,
}

/// `dcgmPolicyConditionPci_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PciCondition {
    pub timestamp: i64,
    pub counter: c_uint,
}

/// `dcgmPolicyConditionMpr_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetiredPagesCondition {
    pub timestamp: i64,
    pub sbe_pages: c_uint,
    pub dbe_pages: c_uint,
}

/// `dcgmPolicyConditionThermal_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ThermalCondition {
    pub timestamp: i64,
    pub thermal_violation: c_uint,
}

/// `dcgmPolicyConditionPower_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerCondition {
    pub timestamp: i64,
    pub power_violation: c_uint,
}

/// `dcgmPolicyConditionNvlink_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NvlinkCondition {
    pub timestamp: i64,
    pub field_id: u16,
    pub counter: c_uint,
}

/// `dcgmPolicyConditionXID_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct XidCondition {
    pub timestamp: i64,
    pub err_num: c_uint,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union PolicyViolationPayload {
    pub dbe: DbeCondition,
    pub pci: PciCondition,
    pub mpr: RetiredPagesCondition,
    pub thermal: ThermalCondition,
    pub power: PowerCondition,
    pub nvlink: NvlinkCondition,
    pub xid: XidCondition,
}

/// `dcgmPolicyCallbackResponse_v2`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PolicyCallbackResponse {
    pub version: c_uint,
    /// A single `DCGM_POLICY_COND_*` bit.
    pub condition: c_uint,
    pub gpu_id: c_uint,
    pub val: PolicyViolationPayload,
}

impl PolicyCallbackResponse {
    pub const VERSION: c_uint = make_version(size_of::<PolicyCallbackResponse>(), 2);

    pub fn zeroed() -> Self {
        // SAFETY: plain data, every bit pattern is valid.
        let mut response: Self = unsafe { std::mem::zeroed() };
        response.version = Self::VERSION;
        response
    }
}

/// `fpRecvUpdates` as taken by `dcgmPolicyRegister_v2`.
///
/// `response` is only valid for the duration of the call.
pub type PolicyCallbackFn =
    unsafe extern "C" fn(response: *mut PolicyCallbackResponse, user_data: u64) -> c_int;
