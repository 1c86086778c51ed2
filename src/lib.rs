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

//! Safe bridge to the NVIDIA DCGM host engine.
//!
//! - [`values`]: owned copies of field values, from bounded values-since
//!   aggregation or latest-value queries
//! - [`policy`]: policy-violation subscriptions as cancellable async streams
//! - [`pool`]: reusable native record buffers
//! - [`engine`]: the foreign engine boundary and the process-wide engine handle
//!
//! ```rust,no_run
//! use dcgm_bridge::prelude::*;
//!
//! # async fn run() -> dcgm_bridge::Result<()> {
//! let cancel = CancellationToken::new();
//! let mut xids = subscribe(&cancel, &[PolicyCondition::Xid])?;
//! while let Some(violation) = xids.recv().await {
//!     println!("{violation}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod mock;
pub mod policy;
pub mod pool;
pub mod prelude;
pub mod values;

// Re-export just the config module from common for library users
pub mod common {
    pub mod config;
}

pub use common::config::BridgeConfig;
pub use engine::ffi::GROUP_ALL_GPUS;
pub use error::{Error, Result};

/// Ceiling on values accumulated by one values-since request.
pub const MAX_CALLBACK_VALUES: usize = BridgeConfig::MAX_CALLBACK_VALUES;
/// Ceiling on (entity, field) slots in one latest-values request.
pub const MAX_LATEST_VALUES: usize = BridgeConfig::MAX_LATEST_VALUES;
/// Buffers above this many slots are never pooled.
pub const POOL_CAPACITY_THRESHOLD: usize = BridgeConfig::POOL_CAPACITY_THRESHOLD;
/// Undelivered occurrences buffered per subscription and condition.
pub const DELIVERY_SLOT_CAPACITY: usize = BridgeConfig::DELIVERY_SLOT_CAPACITY;
