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

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::engine::ffi::{
    FieldValueV1, FieldValueV2, GroupEntityPair, NativeValue, FT_BINARY, FT_DOUBLE, FT_INT64,
    FT_STRING, FT_TIMESTAMP,
};
use crate::engine::EngineStatus;

/// Entity groups (`dcgm_field_entity_group_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityGroup {
    None,
    Gpu,
    Vgpu,
    Switch,
    GpuInstance,
    ComputeInstance,
    Link,
    Cpu,
    CpuCore,
    Other(u32),
}

impl EntityGroup {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => EntityGroup::None,
            1 => EntityGroup::Gpu,
            2 => EntityGroup::Vgpu,
            3 => EntityGroup::Switch,
            4 => EntityGroup::GpuInstance,
            5 => EntityGroup::ComputeInstance,
            6 => EntityGroup::Link,
            7 => EntityGroup::Cpu,
            8 => EntityGroup::CpuCore,
            other => EntityGroup::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            EntityGroup::None => 0,
            EntityGroup::Gpu => 1,
            EntityGroup::Vgpu => 2,
            EntityGroup::Switch => 3,
            EntityGroup::GpuInstance => 4,
            EntityGroup::ComputeInstance => 5,
            EntityGroup::Link => 6,
            EntityGroup::Cpu => 7,
            EntityGroup::CpuCore => 8,
            EntityGroup::Other(raw) => raw,
        }
    }
}

/// One monitored entity, e.g. GPU 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Entity {
    pub group: EntityGroup,
    pub id: u32,
}

impl Entity {
    pub fn gpu(id: u32) -> Self {
        Self {
            group: EntityGroup::Gpu,
            id,
        }
    }

    pub(crate) fn to_native(self) -> GroupEntityPair {
        GroupEntityPair {
            entity_group_id: self.group.raw(),
            entity_id: self.id,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.group, self.id)
    }
}

/// Field type tags (`DCGM_FT_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldType {
    Double,
    Int64,
    String,
    Timestamp,
    Binary,
    Unknown(u16),
}

impl FieldType {
    pub fn from_tag(tag: u16) -> Self {
        match tag {
            FT_DOUBLE => FieldType::Double,
            FT_INT64 => FieldType::Int64,
            FT_STRING => FieldType::String,
            FT_TIMESTAMP => FieldType::Timestamp,
            FT_BINARY => FieldType::Binary,
            other => FieldType::Unknown(other),
        }
    }
}

/// Owned payload of a field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int64(i64),
    Float64(f64),
    String(String),
    Blob(Vec<u8>),
}

impl FieldValue {
    /// Copy the live union member selected by `field_type` out of native memory.
    fn copy_from(field_type: FieldType, value: &NativeValue) -> Self {
        // SAFETY: every union member is plain data spanning a prefix of the
        // same 4 KiB block, so any member read yields initialized bytes.
        unsafe {
            match field_type {
                FieldType::Double => FieldValue::Float64(value.float64),
                FieldType::Int64 | FieldType::Timestamp => FieldValue::Int64(value.int64),
                FieldType::String => {
                    let bytes = &value.string;
                    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                    FieldValue::String(String::from_utf8_lossy(&bytes[..len]).into_owned())
                }
                FieldType::Binary | FieldType::Unknown(_) => FieldValue::Blob(value.blob.to_vec()),
            }
        }
    }
}

/// An owned copy of one native field value, safe to keep after the engine
/// reclaims the buffer it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnedValue {
    pub entity: Entity,
    pub field_id: u16,
    pub field_type: FieldType,
    pub status: EngineStatus,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    pub value: FieldValue,
}

impl OwnedValue {
    /// Copy a `dcgmFieldValue_v1` whose entity came from the callback arguments.
    pub fn from_v1(entity_group_id: u32, entity_id: u32, native: &FieldValueV1) -> Self {
        let field_type = FieldType::from_tag(native.field_type);
        Self {
            entity: Entity {
                group: EntityGroup::from_raw(entity_group_id),
                id: entity_id,
            },
            field_id: native.field_id,
            field_type,
            status: EngineStatus::from_code(native.status),
            timestamp: native.ts,
            value: FieldValue::copy_from(field_type, &native.value),
        }
    }

    /// Copy a `dcgmFieldValue_v2`.
    pub fn from_v2(native: &FieldValueV2) -> Self {
        let field_type = FieldType::from_tag(native.field_type);
        Self {
            entity: Entity {
                group: EntityGroup::from_raw(native.entity_group_id),
                id: native.entity_id,
            },
            field_id: native.field_id,
            field_type,
            status: EngineStatus::from_code(native.status),
            timestamp: native.ts,
            value: FieldValue::copy_from(field_type, &native.value),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.timestamp)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            FieldValue::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            FieldValue::Float64(v) => Some(v),
            FieldValue::Int64(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native_v1(field_type: u16) -> FieldValueV1 {
        let mut v = FieldValueV1::zeroed();
        v.field_id = 150;
        v.field_type = field_type;
        v.ts = 1_700_000_000_000_000;
        v
    }

    #[test]
    fn test_int64_copy() {
        let mut native = native_v1(FT_INT64);
        native.value.int64 = -7;
        let owned = OwnedValue::from_v1(1, 3, &native);
        assert_eq!(owned.entity, Entity::gpu(3));
        assert_eq!(owned.field_type, FieldType::Int64);
        assert_eq!(owned.as_i64(), Some(-7));
        assert!(owned.is_ok());
    }

    #[test]
    fn test_double_copy() {
        let mut native = native_v1(FT_DOUBLE);
        native.value.float64 = 71.5;
        let owned = OwnedValue::from_v1(1, 0, &native);
        assert_eq!(owned.as_f64(), Some(71.5));
        assert_eq!(owned.as_i64(), None);
    }

    #[test]
    fn test_string_copy_stops_at_nul() {
        let mut native = native_v1(FT_STRING);
        let name = b"NVIDIA H100 80GB HBM3";
        let mut bytes = [0u8; crate::engine::ffi::MAX_STR_LENGTH];
        bytes[..name.len()].copy_from_slice(name);
        native.value.string = bytes;
        let owned = OwnedValue::from_v1(1, 0, &native);
        assert_eq!(owned.as_str(), Some("NVIDIA H100 80GB HBM3"));
    }

    #[test]
    fn test_unterminated_string_uses_full_buffer() {
        let mut native = native_v1(FT_STRING);
        native.value.string = [b'x'; crate::engine::ffi::MAX_STR_LENGTH];
        let owned = OwnedValue::from_v1(1, 0, &native);
        assert_eq!(owned.as_str().map(str::len), Some(crate::engine::ffi::MAX_STR_LENGTH));
    }

    #[test]
    fn test_v2_carries_entity() {
        let mut native = FieldValueV2::zeroed();
        native.entity_group_id = 3;
        native.entity_id = 9;
        native.field_id = 203;
        native.field_type = FT_INT64;
        native.status = -14;
        let owned = OwnedValue::from_v2(&native);
        assert_eq!(owned.entity.group, EntityGroup::Switch);
        assert_eq!(owned.entity.id, 9);
        assert_eq!(owned.status, EngineStatus::NoData);
        assert!(!owned.is_ok());
    }

    #[test]
    fn test_timestamp_utc() {
        let owned = OwnedValue::from_v1(1, 0, &native_v1(FT_INT64));
        let ts = owned.timestamp_utc().unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_entity_group_raw_round_trip() {
        for raw in 0..=9 {
            assert_eq!(EntityGroup::from_raw(raw).raw(), raw);
        }
    }
}
