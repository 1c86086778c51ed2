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

use tracing::debug;

use super::owned::{Entity, OwnedValue};
use crate::common::config::BridgeConfig;
use crate::engine::ffi::GroupEntityPair;
use crate::engine::{self, Engine};
use crate::error::{check, Error, Result};
use crate::pool::FIELD_VALUE_POOL;

/// `DCGM_FV_FLAG_LIVE_DATA`: read from the driver instead of the engine cache.
pub const FLAG_LIVE_DATA: u32 = 0x0000_0001;

/// Latest cached value of every field for every entity, entity-major.
///
/// Per-value failures (for example a field that is not watched on one GPU)
/// are reported through each record's `status`; only a failure of the call as
/// a whole is an error.
pub fn latest_values(entities: &[Entity], fields: &[u16]) -> Result<Vec<OwnedValue>> {
    let engine = engine::active()?;
    latest_values_with(engine.as_ref(), entities, fields, 0)
}

/// [`latest_values`] against an explicit engine, with `DCGM_FV_FLAG_*` flags.
pub fn latest_values_with(
    engine: &dyn Engine,
    entities: &[Entity],
    fields: &[u16],
    flags: u32,
) -> Result<Vec<OwnedValue>> {
    if entities.is_empty() {
        return Err(Error::InvalidArgument("no entities requested".to_string()));
    }
    if fields.is_empty() {
        return Err(Error::InvalidArgument("no fields requested".to_string()));
    }
    let slots = entities.len().saturating_mul(fields.len());
    if slots > BridgeConfig::MAX_LATEST_VALUES {
        return Err(Error::LimitExceeded {
            limit: BridgeConfig::MAX_LATEST_VALUES,
        });
    }

    let pairs: Vec<GroupEntityPair> = entities.iter().map(|e| e.to_native()).collect();
    let mut buffer = FIELD_VALUE_POOL.acquire(slots);
    debug!(
        "DCGM: Latest values for {} entities x {} fields ({} slots, pooled: {})",
        entities.len(),
        fields.len(),
        slots,
        !buffer.is_oversized()
    );

    let status = engine.entities_get_latest_values(&pairs, fields, flags, &mut buffer);
    check("dcgmEntitiesGetLatestValues", status)?;

    Ok(buffer.iter().map(OwnedValue::from_v2).collect())
}
