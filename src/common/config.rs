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

use std::path::PathBuf;

/// Bridge configuration constants
pub struct BridgeConfig;

impl BridgeConfig {
    // Engine limits (DCGM_GROUP_MAX_ENTITIES, DCGM_MAX_FIELD_IDS_PER_FIELD_GROUP)
    pub const MAX_ENTITIES_PER_GROUP: usize = 64;
    pub const MAX_FIELDS_PER_FIELD_GROUP: usize = 128;
    /// Samples per (entity, field) one values-since request may carry
    pub const SAMPLE_ALLOWANCE: usize = 16;

    // Value aggregation
    pub const MAX_CALLBACK_VALUES: usize =
        Self::MAX_ENTITIES_PER_GROUP * Self::MAX_FIELDS_PER_FIELD_GROUP * Self::SAMPLE_ALLOWANCE;
    pub const INITIAL_AGGREGATION_CAPACITY: usize = 256;
    pub const MIN_AGGREGATION_GROWTH: usize = 256;
    /// One slot per (entity, field); latest values carry no sample history
    pub const MAX_LATEST_VALUES: usize =
        Self::MAX_ENTITIES_PER_GROUP * Self::MAX_FIELDS_PER_FIELD_GROUP;

    // Native buffer pool
    pub const POOL_CAPACITY_THRESHOLD: usize = 1024; // slots, ~4 MiB of FieldValueV2
    pub const POOL_SIZE_CLASS_FACTOR: usize = 4;
    pub const POOL_MAX_IDLE_BUFFERS: usize = 32;
    pub const POOL_MAX_IDLE_BYTES: usize = 16 * 1024 * 1024;

    // Policy violations
    pub const DELIVERY_SLOT_CAPACITY: usize = 1;
    pub const VIOLATION_STREAM_CAPACITY: usize = 32;

    // Default policy thresholds
    pub const DEFAULT_MAX_RETIRED_PAGES: u64 = 10;
    pub const DEFAULT_MAX_TEMPERATURE_C: u64 = 100;
    pub const DEFAULT_MAX_POWER_W: u64 = 250;
}

/// Environment-specific configuration
pub struct EnvConfig;

impl EnvConfig {
    pub const LIBRARY_PATH_VAR: &'static str = "DCGM_LIBRARY_PATH";
    pub const HOST_ENGINE_VAR: &'static str = "DCGM_HOST_ENGINE";

    /// Explicit libdcgm location, bypassing the standard search paths.
    pub fn library_path_override() -> Option<PathBuf> {
        std::env::var_os(Self::LIBRARY_PATH_VAR)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    /// Address of a standalone nv-hostengine, if one is configured.
    pub fn host_engine_address() -> Option<String> {
        std::env::var(Self::HOST_ENGINE_VAR)
            .ok()
            .filter(|addr| !addr.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_callback_values() {
        assert_eq!(BridgeConfig::MAX_CALLBACK_VALUES, 64 * 128 * 16);
        assert!(BridgeConfig::POOL_CAPACITY_THRESHOLD < BridgeConfig::MAX_CALLBACK_VALUES);
    }

    #[test]
    fn test_max_latest_values() {
        assert_eq!(BridgeConfig::MAX_LATEST_VALUES, 64 * 128);
        assert!(BridgeConfig::MAX_LATEST_VALUES < BridgeConfig::MAX_CALLBACK_VALUES);
    }

    #[test]
    fn test_idle_budget_fits_a_full_sized_buffer() {
        let full = BridgeConfig::POOL_CAPACITY_THRESHOLD
            * std::mem::size_of::<crate::engine::ffi::FieldValueV2>();
        assert!(BridgeConfig::POOL_MAX_IDLE_BYTES >= full);
        assert!(BridgeConfig::POOL_MAX_IDLE_BYTES < BridgeConfig::POOL_MAX_IDLE_BUFFERS * full);
    }

    #[test]
    fn test_delivery_slot_capacity() {
        assert_eq!(BridgeConfig::DELIVERY_SLOT_CAPACITY, 1);
    }
}
