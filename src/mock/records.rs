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

//! Builders for native records.

use crate::engine::ffi::{
    FieldValueV1, PolicyCallbackResponse, PowerCondition, ThermalCondition, XidCondition,
    FT_DOUBLE, FT_INT64, FT_STRING, MAX_STR_LENGTH,
};
use crate::policy::PolicyCondition;

// Common DCGM field ids
pub const FI_DEV_GPU_TEMP: u16 = 150;
pub const FI_DEV_POWER_USAGE: u16 = 155;
pub const FI_DEV_GPU_UTIL: u16 = 203;
pub const FI_DEV_NAME: u16 = 50;

pub fn int64_value(field_id: u16, ts: i64, value: i64) -> FieldValueV1 {
    let mut record = FieldValueV1::zeroed();
    record.field_id = field_id;
    record.field_type = FT_INT64;
    record.ts = ts;
    record.value.int64 = value;
    record
}

pub fn float64_value(field_id: u16, ts: i64, value: f64) -> FieldValueV1 {
    let mut record = FieldValueV1::zeroed();
    record.field_id = field_id;
    record.field_type = FT_DOUBLE;
    record.ts = ts;
    record.value.float64 = value;
    record
}

/// A string value, truncated to fit the NUL-terminated native buffer.
pub fn string_value(field_id: u16, ts: i64, value: &str) -> FieldValueV1 {
    let mut record = FieldValueV1::zeroed();
    record.field_id = field_id;
    record.field_type = FT_STRING;
    record.ts = ts;
    let bytes = value.as_bytes();
    let len = bytes.len().min(MAX_STR_LENGTH - 1);
    let mut buf = [0u8; MAX_STR_LENGTH];
    buf[..len].copy_from_slice(&bytes[..len]);
    record.value.string = buf;
    record
}

/// `count` int64 samples of one field with increasing timestamps.
pub fn int64_series(field_id: u16, start_ts: i64, count: usize) -> Vec<FieldValueV1> {
    (0..count)
        .map(|i| int64_value(field_id, start_ts + i as i64, i as i64))
        .collect()
}

pub fn xid_response(gpu_id: u32, err_num: u32, timestamp: i64) -> PolicyCallbackResponse {
    let mut response = PolicyCallbackResponse::zeroed();
    response.condition = PolicyCondition::Xid.mask();
    response.gpu_id = gpu_id;
    response.val.xid = XidCondition { timestamp, err_num };
    response
}

pub fn thermal_response(gpu_id: u32, temperature_c: u32, timestamp: i64) -> PolicyCallbackResponse {
    let mut response = PolicyCallbackResponse::zeroed();
    response.condition = PolicyCondition::Thermal.mask();
    response.gpu_id = gpu_id;
    response.val.thermal = ThermalCondition {
        timestamp,
        thermal_violation: temperature_c,
    };
    response
}

pub fn power_response(gpu_id: u32, power_w: u32, timestamp: i64) -> PolicyCallbackResponse {
    let mut response = PolicyCallbackResponse::zeroed();
    response.condition = PolicyCondition::Power.mask();
    response.gpu_id = gpu_id;
    response.val.power = PowerCondition {
        timestamp,
        power_violation: power_w,
    };
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{FieldValue, OwnedValue};

    #[test]
    fn test_string_value_is_truncated_and_terminated() {
        let long = "x".repeat(MAX_STR_LENGTH * 2);
        let record = string_value(FI_DEV_NAME, 0, &long);
        let owned = OwnedValue::from_v1(1, 0, &record);
        assert_eq!(owned.as_str().map(str::len), Some(MAX_STR_LENGTH - 1));
    }

    #[test]
    fn test_float64_value() {
        let owned = OwnedValue::from_v1(1, 3, &float64_value(FI_DEV_POWER_USAGE, 7, 212.5));
        assert_eq!(owned.value, FieldValue::Float64(212.5));
        assert_eq!(owned.entity.id, 3);
    }
}
