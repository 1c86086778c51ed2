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

//! In-process engine for tests and demos.
//!
//! [`MockEngine`] implements the same C-shaped [`Engine`](crate::engine::Engine)
//! surface as the native library and drives the bridge's real `extern "C"`
//! callbacks, including the native lifetime rules: record arrays and
//! violation responses are overwritten as soon as each callback returns.

mod engine;
pub mod records;

pub use engine::{MockEngine, MockRegistration};
