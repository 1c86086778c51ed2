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

use serde::Serialize;
use std::fmt;

/// Engine return codes (`dcgmReturn_t`).
///
/// Codes the bridge does not name are preserved in [`EngineStatus::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngineStatus {
    Ok,
    BadParam,
    GenericError,
    Memory,
    NotConfigured,
    NotSupported,
    InitError,
    NvmlError,
    Pending,
    Uninitialized,
    Timeout,
    VersionMismatch,
    UnknownField,
    NoData,
    StaleData,
    NotWatched,
    NoPermission,
    GpuIsLost,
    ResetRequired,
    FunctionNotFound,
    ConnectionNotValid,
    GpuNotSupported,
    GroupIncompatible,
    MaxLimit,
    LibraryNotFound,
    DuplicateKey,
    Other(i32),
}

// (status, code, constant name, description)
const STATUS_TABLE: &[(EngineStatus, i32, &str, &str)] = &[
    (EngineStatus::Ok, 0, "DCGM_ST_OK", "Success"),
    (EngineStatus::BadParam, -1, "DCGM_ST_BADPARAM", "Bad parameter"),
    (EngineStatus::GenericError, -3, "DCGM_ST_GENERIC_ERROR", "Generic error"),
    (EngineStatus::Memory, -4, "DCGM_ST_MEMORY", "Out of memory"),
    (EngineStatus::NotConfigured, -5, "DCGM_ST_NOT_CONFIGURED", "Not configured"),
    (EngineStatus::NotSupported, -6, "DCGM_ST_NOT_SUPPORTED", "Not supported"),
    (EngineStatus::InitError, -7, "DCGM_ST_INIT_ERROR", "Initialization error"),
    (EngineStatus::NvmlError, -8, "DCGM_ST_NVML_ERROR", "NVML error"),
    (EngineStatus::Pending, -9, "DCGM_ST_PENDING", "Pending"),
    (EngineStatus::Uninitialized, -10, "DCGM_ST_UNINITIALIZED", "Uninitialized"),
    (EngineStatus::Timeout, -11, "DCGM_ST_TIMEOUT", "Timeout"),
    (EngineStatus::VersionMismatch, -12, "DCGM_ST_VER_MISMATCH", "Version mismatch"),
    (EngineStatus::UnknownField, -13, "DCGM_ST_UNKNOWN_FIELD", "Unknown field"),
    (EngineStatus::NoData, -14, "DCGM_ST_NO_DATA", "No data"),
    (EngineStatus::StaleData, -15, "DCGM_ST_STALE_DATA", "Stale data"),
    (EngineStatus::NotWatched, -16, "DCGM_ST_NOT_WATCHED", "Field not watched"),
    (EngineStatus::NoPermission, -17, "DCGM_ST_NO_PERMISSION", "No permission"),
    (EngineStatus::GpuIsLost, -18, "DCGM_ST_GPU_IS_LOST", "GPU is lost"),
    (EngineStatus::ResetRequired, -19, "DCGM_ST_RESET_REQUIRED", "GPU reset required"),
    (EngineStatus::FunctionNotFound, -20, "DCGM_ST_FUNCTION_NOT_FOUND", "Function not found"),
    (EngineStatus::ConnectionNotValid, -21, "DCGM_ST_CONNECTION_NOT_VALID", "Connection not valid"),
    (EngineStatus::GpuNotSupported, -22, "DCGM_ST_GPU_NOT_SUPPORTED", "GPU not supported"),
    (EngineStatus::GroupIncompatible, -23, "DCGM_ST_GROUP_INCOMPATIBLE", "Group incompatible"),
    (EngineStatus::MaxLimit, -24, "DCGM_ST_MAX_LIMIT", "Maximum limit reached"),
    (EngineStatus::LibraryNotFound, -25, "DCGM_ST_LIBRARY_NOT_FOUND", "Library not found"),
    (EngineStatus::DuplicateKey, -26, "DCGM_ST_DUPLICATE_KEY", "Duplicate key"),
];

impl EngineStatus {
    /// Decode a raw `dcgmReturn_t`.
    pub fn from_code(code: i32) -> Self {
        STATUS_TABLE
            .iter()
            .find(|(_, c, _, _)| *c == code)
            .map(|(status, _, _, _)| *status)
            .unwrap_or(EngineStatus::Other(code))
    }

    /// The raw `dcgmReturn_t` value.
    pub fn code(self) -> i32 {
        match self {
            EngineStatus::Other(code) => code,
            status => STATUS_TABLE
                .iter()
                .find(|(s, _, _, _)| *s == status)
                .map(|(_, code, _, _)| *code)
                .unwrap_or_default(),
        }
    }

    pub fn is_ok(self) -> bool {
        self == EngineStatus::Ok
    }

    fn describe(self) -> Option<(&'static str, &'static str)> {
        STATUS_TABLE
            .iter()
            .find(|(s, _, _, _)| *s == self)
            .map(|(_, _, name, text)| (*name, *text))
    }
}

impl From<i32> for EngineStatus {
    fn from(code: i32) -> Self {
        EngineStatus::from_code(code)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.describe() {
            Some((name, text)) => write!(f, "{text} ({name}, {})", self.code()),
            None => write!(f, "Unknown engine status ({})", self.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip_for_named_statuses() {
        for (status, code, _, _) in STATUS_TABLE {
            assert_eq!(EngineStatus::from_code(*code), *status);
            assert_eq!(status.code(), *code);
        }
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let status = EngineStatus::from_code(-99);
        assert_eq!(status, EngineStatus::Other(-99));
        assert_eq!(status.code(), -99);
        assert_eq!(status.to_string(), "Unknown engine status (-99)");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            EngineStatus::NoData.to_string(),
            "No data (DCGM_ST_NO_DATA, -14)"
        );
        assert!(EngineStatus::Ok.is_ok());
        assert!(!EngineStatus::Timeout.is_ok());
    }
}
