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

//! Reusable storage for native-call buffers.
//!
//! A `FieldValueV2` slot is over 4 KiB, so a latest-values request across a
//! few GPUs and a few dozen fields needs megabytes of scratch space that the
//! engine fills and the bridge immediately copies out of. [`BufferPool`] keeps
//! released buffers on a free list and hands them back out when their
//! capacity fits the next request.
//!
//! Three rules keep the pool from growing without bound:
//!
//! - a buffer is only reused for a request of `size` when its capacity is
//!   within `[size, 4 x size]`, so small requests never pin huge buffers;
//! - buffers above the capacity threshold are never pooled at all, so one
//!   oversized request cannot bloat the pool for every later request;
//! - the free list is capped both in buffers and in total idle bytes.
//!
//! The process-wide pool has no lifecycle beyond the process: every entry is
//! plain data and may be discarded at any time.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::common::config::BridgeConfig;
use crate::engine::ffi::{FieldValueV1, FieldValueV2};

/// A fixed-layout record that can live in a pooled buffer.
pub trait NativeRecord: Copy + Send + 'static {
    /// The value every slot holds before the engine writes to it.
    fn blank() -> Self;
}

impl NativeRecord for FieldValueV1 {
    fn blank() -> Self {
        FieldValueV1::zeroed()
    }
}

impl NativeRecord for FieldValueV2 {
    fn blank() -> Self {
        FieldValueV2::zeroed()
    }
}

/// A size-classed free list of native record buffers.
pub struct BufferPool<T: NativeRecord> {
    capacity_threshold: usize,
    max_idle: usize,
    max_idle_bytes: usize,
    free: Mutex<Vec<Vec<T>>>,
}

fn byte_size<T>(buf: &Vec<T>) -> usize {
    buf.capacity().saturating_mul(std::mem::size_of::<T>())
}

impl<T: NativeRecord> BufferPool<T> {
    pub const fn new(capacity_threshold: usize, max_idle: usize, max_idle_bytes: usize) -> Self {
        Self {
            capacity_threshold,
            max_idle,
            max_idle_bytes,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Borrow a buffer with exactly `size` blank slots.
    ///
    /// The buffer goes back to the pool when the returned guard is dropped.
    pub fn acquire(&self, size: usize) -> PooledBuffer<'_, T> {
        let upper = size.saturating_mul(BridgeConfig::POOL_SIZE_CLASS_FACTOR);
        let reused = {
            let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
            free.iter()
                .position(|buf| buf.capacity() >= size && buf.capacity() <= upper)
                .map(|index| free.swap_remove(index))
        };

        let mut buf = reused.unwrap_or_else(|| Vec::with_capacity(size));
        // Released buffers are empty; every slot handed out is freshly blanked.
        buf.resize(size, T::blank());
        PooledBuffer { pool: self, buf }
    }

    fn release(&self, mut buf: Vec<T>) {
        buf.clear();
        if buf.capacity() > self.capacity_threshold {
            debug!(
                "Pool: Dropping oversized buffer ({} slots > {})",
                buf.capacity(),
                self.capacity_threshold
            );
            return;
        }

        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() >= self.max_idle {
            return;
        }
        let idle_bytes: usize = free.iter().map(byte_size).sum();
        if idle_bytes.saturating_add(byte_size(&buf)) > self.max_idle_bytes {
            debug!("Pool: Idle byte budget reached, dropping released buffer");
            return;
        }
        free.push(buf);
    }

    /// Number of buffers currently waiting on the free list.
    pub fn idle_count(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bytes held by buffers on the free list.
    pub fn idle_bytes(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(byte_size)
            .sum()
    }

    pub fn capacity_threshold(&self) -> usize {
        self.capacity_threshold
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer<'a, T: NativeRecord> {
    pool: &'a BufferPool<T>,
    buf: Vec<T>,
}

impl<T: NativeRecord> PooledBuffer<'_, T> {
    /// Allocated slots, which may exceed the usable length.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Whether this buffer will be dropped rather than returned to the pool.
    pub fn is_oversized(&self) -> bool {
        self.capacity() > self.pool.capacity_threshold
    }
}

impl<T: NativeRecord> Deref for PooledBuffer<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.buf
    }
}

impl<T: NativeRecord> DerefMut for PooledBuffer<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.buf
    }
}

impl<T: NativeRecord> Drop for PooledBuffer<'_, T> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

/// Process-wide pool for `dcgmEntitiesGetLatestValues` output buffers.
pub static FIELD_VALUE_POOL: BufferPool<FieldValueV2> = BufferPool::new(
    BridgeConfig::POOL_CAPACITY_THRESHOLD,
    BridgeConfig::POOL_MAX_IDLE_BUFFERS,
    BridgeConfig::POOL_MAX_IDLE_BYTES,
);
