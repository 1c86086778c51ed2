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

//! Latest-value queries through the pooled native buffers.

use dcgm_bridge::mock::{records, MockEngine};
use dcgm_bridge::pool::{BufferPool, FIELD_VALUE_POOL};
use dcgm_bridge::prelude::*;
use dcgm_bridge::values::latest_values_with;

fn two_gpu_engine() -> MockEngine {
    let engine = MockEngine::new();
    for gpu in 0..2 {
        engine.set_latest(
            Entity::gpu(gpu),
            records::int64_value(records::FI_DEV_GPU_TEMP, 100, 60 + i64::from(gpu)),
        );
        engine.set_latest(
            Entity::gpu(gpu),
            records::float64_value(records::FI_DEV_POWER_USAGE, 100, 200.0 + f64::from(gpu)),
        );
    }
    engine
}

#[test]
fn test_results_are_entity_major() {
    let engine = two_gpu_engine();
    let values = latest_values_with(
        &engine,
        &[Entity::gpu(0), Entity::gpu(1)],
        &[records::FI_DEV_GPU_TEMP, records::FI_DEV_POWER_USAGE],
        0,
    )
    .unwrap();

    let layout: Vec<(u32, u16)> = values.iter().map(|v| (v.entity.id, v.field_id)).collect();
    assert_eq!(
        layout,
        vec![
            (0, records::FI_DEV_GPU_TEMP),
            (0, records::FI_DEV_POWER_USAGE),
            (1, records::FI_DEV_GPU_TEMP),
            (1, records::FI_DEV_POWER_USAGE),
        ]
    );
    assert_eq!(values[2].as_i64(), Some(61));
    assert_eq!(values[3].value, FieldValue::Float64(201.0));
}

#[test]
fn test_missing_values_report_per_value_status() {
    let engine = two_gpu_engine();
    let values = latest_values_with(
        &engine,
        &[Entity::gpu(0)],
        &[records::FI_DEV_GPU_TEMP, records::FI_DEV_GPU_UTIL],
        0,
    )
    .unwrap();

    assert!(values[0].is_ok());
    assert!(!values[1].is_ok());
    assert_eq!(values[1].status, EngineStatus::NoData);
}

#[test]
fn test_empty_request_is_rejected_before_the_engine() {
    let engine = two_gpu_engine();
    let no_entities = latest_values_with(&engine, &[], &[records::FI_DEV_GPU_TEMP], 0);
    assert!(matches!(no_entities, Err(Error::InvalidArgument(_))));
    let no_fields = latest_values_with(&engine, &[Entity::gpu(0)], &[], 0);
    assert!(matches!(no_fields, Err(Error::InvalidArgument(_))));
    assert_eq!(engine.latest_calls(), 0);
}

#[test]
fn test_oversized_request_is_rejected() {
    let engine = MockEngine::new();
    let entities: Vec<Entity> = (0..2048).map(Entity::gpu).collect();
    let fields: Vec<u16> = (0..128).collect();
    let result = latest_values_with(&engine, &entities, &fields, 0);
    assert!(matches!(result, Err(Error::LimitExceeded { .. })));
    assert_eq!(engine.latest_calls(), 0);
}

#[test]
fn test_latest_limit_is_one_slot_per_entity_and_field() {
    let engine = MockEngine::new();
    let fields: Vec<u16> = (0..128).collect();

    // One entity past the group maximum.
    let entities: Vec<Entity> = (0..65).map(Entity::gpu).collect();
    match latest_values_with(&engine, &entities, &fields, 0) {
        Err(Error::LimitExceeded { limit }) => {
            assert_eq!(limit, dcgm_bridge::MAX_LATEST_VALUES);
            assert_eq!(limit, 64 * 128);
        }
        other => panic!("expected LimitExceeded, got {other:?}"),
    }
    assert_eq!(engine.latest_calls(), 0);

    // A full group is accepted.
    let entities: Vec<Entity> = (0..64).map(Entity::gpu).collect();
    let values = latest_values_with(&engine, &entities, &fields, 0).unwrap();
    assert_eq!(values.len(), 64 * 128);
    assert_eq!(engine.latest_calls(), 1);
}

#[test]
fn test_engine_failure_is_surfaced() {
    let engine = two_gpu_engine();
    engine.set_latest_status(EngineStatus::ConnectionNotValid);
    let err = latest_values_with(&engine, &[Entity::gpu(0)], &[records::FI_DEV_GPU_TEMP], 0)
        .unwrap_err();
    assert_eq!(err.engine_status(), Some(EngineStatus::ConnectionNotValid));
}

#[test]
fn test_repeated_queries_keep_the_pool_bounded() {
    let engine = two_gpu_engine();
    for _ in 0..64 {
        latest_values_with(&engine, &[Entity::gpu(0)], &[records::FI_DEV_GPU_TEMP], 0).unwrap();
    }
    assert!(FIELD_VALUE_POOL.idle_count() <= dcgm_bridge::BridgeConfig::POOL_MAX_IDLE_BUFFERS);
    assert!(FIELD_VALUE_POOL.idle_bytes() <= dcgm_bridge::BridgeConfig::POOL_MAX_IDLE_BYTES);
}

#[test]
fn test_full_sized_buffers_respect_the_idle_byte_budget() {
    let pool: BufferPool<dcgm_bridge::engine::ffi::FieldValueV2> = BufferPool::new(
        dcgm_bridge::BridgeConfig::POOL_CAPACITY_THRESHOLD,
        dcgm_bridge::BridgeConfig::POOL_MAX_IDLE_BUFFERS,
        dcgm_bridge::BridgeConfig::POOL_MAX_IDLE_BYTES,
    );
    let held: Vec<_> = (0..8)
        .map(|_| pool.acquire(dcgm_bridge::POOL_CAPACITY_THRESHOLD))
        .collect();
    drop(held);

    assert!(pool.idle_count() >= 1);
    assert!(pool.idle_count() < 8);
    assert!(pool.idle_bytes() <= dcgm_bridge::BridgeConfig::POOL_MAX_IDLE_BYTES);
}

#[test]
fn test_pool_size_classes() {
    let pool: BufferPool<dcgm_bridge::engine::ffi::FieldValueV2> = BufferPool::new(256, 8, usize::MAX);
    {
        let _a = pool.acquire(100);
        let _b = pool.acquire(300);
    }
    // Only the buffer under the threshold is kept.
    assert_eq!(pool.idle_count(), 1);

    // 100 is within [30, 120], so it is reused.
    let reused = pool.acquire(30);
    assert_eq!(reused.len(), 30);
    assert!(reused.capacity() >= 100);
    assert_eq!(pool.idle_count(), 0);
}
