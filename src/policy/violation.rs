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

use super::condition::PolicyCondition;
use crate::engine::ffi::PolicyCallbackResponse;

/// Where a double-bit ECC error was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DbeLocation {
    L1,
    L2,
    Device,
    Register,
    Texture,
    Unknown(u32),
}

impl DbeLocation {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => DbeLocation::L1,
            1 => DbeLocation::L2,
            2 => DbeLocation::Device,
            3 => DbeLocation::Register,
            4 => DbeLocation::Texture,
            other => DbeLocation::Unknown(other),
        }
    }
}

/// Condition-specific details of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ViolationData {
    DoubleBitError { location: DbeLocation, num_errors: u32 },
    Pcie { replay_counter: u32 },
    RetiredPages { sbe_pages: u32, dbe_pages: u32 },
    Thermal { temperature_c: u32 },
    Power { power_w: u32 },
    Nvlink { field_id: u16, counter: u32 },
    Xid { err_num: u32 },
}

/// One policy violation reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyViolation {
    pub condition: PolicyCondition,
    pub gpu_id: u32,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    pub data: ViolationData,
}

impl PolicyViolation {
    /// Copy a native callback response. Returns `None` when the response does
    /// not name exactly one known condition.
    pub fn from_native(response: &PolicyCallbackResponse) -> Option<Self> {
        let condition = PolicyCondition::from_mask(response.condition)?;
        // SAFETY: the condition bit selects the live union member, and every
        // member is plain data.
        let (timestamp, data) = unsafe {
            let val = &response.val;
            match condition {
                PolicyCondition::DoubleBitError => (
                    val.dbe.timestamp,
                    ViolationData::DoubleBitError {
                        location: DbeLocation::from_raw(val.dbe.location),
                        num_errors: val.dbe.num_errors,
                    },
                ),
                PolicyCondition::Pcie => (
                    val.pci.timestamp,
                    ViolationData::Pcie {
                        replay_counter: val.pci.counter,
                    },
                ),
                PolicyCondition::RetiredPages => (
                    val.mpr.timestamp,
                    ViolationData::RetiredPages {
                        sbe_pages: val.mpr.sbe_pages,
                        dbe_pages: val.mpr.dbe_pages,
                    },
                ),
                PolicyCondition::Thermal => (
                    val.thermal.timestamp,
                    ViolationData::Thermal {
                        temperature_c: val.thermal.thermal_violation,
                    },
                ),
                PolicyCondition::Power => (
                    val.power.timestamp,
                    ViolationData::Power {
                        power_w: val.power.power_violation,
                    },
                ),
                PolicyCondition::Nvlink => (
                    val.nvlink.timestamp,
                    ViolationData::Nvlink {
                        field_id: val.nvlink.field_id,
                        counter: val.nvlink.counter,
                    },
                ),
                PolicyCondition::Xid => (
                    val.xid.timestamp,
                    ViolationData::Xid {
                        err_num: val.xid.err_num,
                    },
                ),
            }
        };

        Some(Self {
            condition,
            gpu_id: response.gpu_id,
            timestamp,
            data,
        })
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.timestamp)
    }

    /// The XID error number, for XID violations.
    pub fn err_num(&self) -> Option<u32> {
        match self.data {
            ViolationData::Xid { err_num } => Some(err_num),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPU {} {}: ", self.gpu_id, self.condition)?;
        match self.data {
            ViolationData::DoubleBitError {
                location,
                num_errors,
            } => write!(f, "{num_errors} double-bit error(s) in {location:?}"),
            ViolationData::Pcie { replay_counter } => {
                write!(f, "PCIe replay counter {replay_counter}")
            }
            ViolationData::RetiredPages {
                sbe_pages,
                dbe_pages,
            } => write!(f, "{sbe_pages} SBE / {dbe_pages} DBE page(s) retired"),
            ViolationData::Thermal { temperature_c } => write!(f, "temperature {temperature_c}°C"),
            ViolationData::Power { power_w } => write!(f, "power {power_w}W"),
            ViolationData::Nvlink { field_id, counter } => {
                write!(f, "NVLink field {field_id} counter {counter}")
            }
            ViolationData::Xid { err_num } => write!(f, "XID {err_num}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ffi::{DbeCondition, NvlinkCondition, XidCondition};

    #[test]
    fn test_xid_from_native() {
        let mut response = PolicyCallbackResponse::zeroed();
        response.condition = PolicyCondition::Xid.mask();
        response.gpu_id = 2;
        response.val.xid = XidCondition {
            timestamp: 1_700_000_000_000_000,
            err_num: 79,
        };

        let violation = PolicyViolation::from_native(&response).unwrap();
        assert_eq!(violation.condition, PolicyCondition::Xid);
        assert_eq!(violation.gpu_id, 2);
        assert_eq!(violation.err_num(), Some(79));
        assert_eq!(violation.timestamp_utc().unwrap().timestamp(), 1_700_000_000);
        assert_eq!(violation.to_string(), "GPU 2 xid: XID 79");
    }

    #[test]
    fn test_dbe_from_native() {
        let mut response = PolicyCallbackResponse::zeroed();
        response.condition = PolicyCondition::DoubleBitError.mask();
        response.val.dbe = DbeCondition {
            timestamp: 5,
            location: 2,
            num_errors: 3,
        };
        let violation = PolicyViolation::from_native(&response).unwrap();
        assert_eq!(
            violation.data,
            ViolationData::DoubleBitError {
                location: DbeLocation::Device,
                num_errors: 3
            }
        );
        assert_eq!(violation.err_num(), None);
    }

    #[test]
    fn test_nvlink_from_native() {
        let mut response = PolicyCallbackResponse::zeroed();
        response.condition = PolicyCondition::Nvlink.mask();
        response.val.nvlink = NvlinkCondition {
            timestamp: 5,
            field_id: 409,
            counter: 12,
        };
        let violation = PolicyViolation::from_native(&response).unwrap();
        assert_eq!(
            violation.data,
            ViolationData::Nvlink {
                field_id: 409,
                counter: 12
            }
        );
    }

    #[test]
    fn test_unknown_condition_is_rejected() {
        let mut response = PolicyCallbackResponse::zeroed();
        response.condition = 0x80;
        assert!(PolicyViolation::from_native(&response).is_none());
        response.condition = 0x41;
        assert!(PolicyViolation::from_native(&response).is_none());
    }

    #[test]
    fn test_serialize_tagged() {
        let violation = PolicyViolation {
            condition: PolicyCondition::Thermal,
            gpu_id: 0,
            timestamp: 1,
            data: ViolationData::Thermal { temperature_c: 104 },
        };
        let json = serde_json::to_value(violation).unwrap();
        assert_eq!(json["data"]["kind"], "thermal");
        assert_eq!(json["data"]["temperature_c"], 104);
    }
}
