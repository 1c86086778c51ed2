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

//! The dcgm-bridge prelude.
//!
//! Convenient re-exports of commonly used types for library users:
//!
//! ```rust
//! use dcgm_bridge::prelude::*;
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use dcgm_bridge::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let values = latest_values(&[Entity::gpu(0)], &[150, 155])?;
//!     for value in values {
//!         println!("{} field {}: {:?}", value.entity, value.field_id, value.value);
//!     }
//!     Ok(())
//! }
//! ```

// Error types
pub use crate::error::{Error, Result};

// Engine handle
pub use crate::engine::{activate, deactivate, is_active, Engine, EngineStatus};
pub use crate::GROUP_ALL_GPUS;

// Field values
pub use crate::values::{
    collect, latest_values, Entity, EntityGroup, FieldType, FieldValue, OwnedValue, ValuesSince,
    ValuesSinceQuery,
};

// Policy violations
pub use crate::policy::{
    subscribe, PolicyCondition, PolicyThresholds, PolicyViolation, SubscriptionBuilder,
    SubscriptionState, ViolationData, ViolationStream,
};

// Cancellation for subscriptions
pub use tokio_util::sync::CancellationToken;
