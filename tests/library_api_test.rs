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

//! Integration tests for the dcgm-bridge library API through the
//! process-wide engine handle.
//!
//! The handle is global, so everything that touches it lives in one test.

use dcgm_bridge::mock::{records, MockEngine};
use dcgm_bridge::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_operations_follow_the_engine_handle() {
    deactivate();
    assert!(!is_active());

    // Without an engine every operation fails fast with Uninitialized.
    let err = collect(GROUP_ALL_GPUS, 1, 0).unwrap_err();
    assert_eq!(err.engine_status(), Some(EngineStatus::Uninitialized));
    let err = latest_values(&[Entity::gpu(0)], &[records::FI_DEV_GPU_TEMP]).unwrap_err();
    assert_eq!(err.engine_status(), Some(EngineStatus::Uninitialized));
    let err = subscribe(&CancellationToken::new(), &[PolicyCondition::Xid]).unwrap_err();
    assert_eq!(err.engine_status(), Some(EngineStatus::Uninitialized));

    let mock = Arc::new(MockEngine::with_demo_data());
    assert!(activate(mock.clone()).is_none());
    assert!(is_active());

    let batch = collect(GROUP_ALL_GPUS, 1, 0).unwrap();
    assert_eq!(batch.values.len(), 6);

    let latest = latest_values(&[Entity::gpu(1)], &[records::FI_DEV_GPU_TEMP]).unwrap();
    assert_eq!(latest[0].as_i64(), Some(65));

    let cancel = CancellationToken::new();
    let mut stream = subscribe(&cancel, &[PolicyCondition::Xid]).unwrap();
    let engine = mock.clone();
    tokio::task::spawn_blocking(move || engine.fire_violation(records::xid_response(0, 94, 7)))
        .await
        .unwrap();
    let violation = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(violation.err_num(), Some(94));

    cancel.cancel();
    assert!(stream.recv().await.is_none());
    assert!(deactivate().is_some());
}

#[test]
fn test_public_limits() {
    assert_eq!(dcgm_bridge::MAX_CALLBACK_VALUES, 64 * 128 * 16);
    assert_eq!(dcgm_bridge::DELIVERY_SLOT_CAPACITY, 1);
    assert!(dcgm_bridge::POOL_CAPACITY_THRESHOLD > 0);
}

#[test]
fn test_values_serialize_to_json() {
    let value = OwnedValue::from_v1(1, 0, &records::int64_value(records::FI_DEV_GPU_TEMP, 9, 70));
    let json = serde_json::to_value(&value).unwrap();
    assert_eq!(json["field_id"], 150);
    assert_eq!(json["value"], 70);
    assert_eq!(json["entity"]["id"], 0);
}
