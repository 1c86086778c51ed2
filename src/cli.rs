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

use clap::{Parser, Subcommand};
use dcgm_bridge::policy::PolicyCondition;
use dcgm_bridge::BridgeConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Use the in-process mock engine instead of libdcgm.
    #[arg(long, global = true)]
    pub mock: bool,
    /// Address of a standalone nv-hostengine. Defaults to DCGM_HOST_ENGINE, or an embedded engine.
    #[arg(long, global = true)]
    pub host: Option<String>,
    /// Print one JSON object per line.
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the latest value of each field for each GPU.
    Latest(LatestArgs),
    /// Print every sample recorded after a cursor.
    Since(SinceArgs),
    /// Stream policy violations until interrupted.
    Violations(ViolationsArgs),
}

#[derive(Parser)]
pub struct LatestArgs {
    /// GPU ids to query.
    #[arg(long, value_delimiter = ',', default_value = "0")]
    pub gpus: Vec<u32>,
    /// Field ids to query.
    #[arg(long, value_delimiter = ',', default_value = "150,155")]
    pub fields: Vec<u16>,
    /// Read from the driver instead of the engine cache.
    #[arg(long)]
    pub live: bool,
}

#[derive(Parser)]
pub struct SinceArgs {
    /// GPU group id.
    #[arg(long, default_value_t = dcgm_bridge::GROUP_ALL_GPUS)]
    pub group: usize,
    /// Field group id.
    #[arg(long)]
    pub field_group: usize,
    /// Cursor returned by a previous request. 0 returns all retained samples.
    #[arg(long, default_value_t = 0)]
    pub since: i64,
    /// Maximum number of values for this request.
    #[arg(long, default_value_t = BridgeConfig::MAX_CALLBACK_VALUES)]
    pub limit: usize,
}

#[derive(Parser)]
pub struct ViolationsArgs {
    /// Conditions to watch: dbe, pcie, retired-pages, thermal, power, nvlink, xid.
    #[arg(long, value_delimiter = ',', default_value = "xid")]
    pub conditions: Vec<PolicyCondition>,
    /// GPU group id.
    #[arg(long, default_value_t = dcgm_bridge::GROUP_ALL_GPUS)]
    pub group: usize,
    /// Stop after this many violations.
    #[arg(long)]
    pub count: Option<usize>,
    /// Temperature threshold in degrees Celsius.
    #[arg(long, default_value_t = BridgeConfig::DEFAULT_MAX_TEMPERATURE_C)]
    pub max_temperature: u64,
    /// Power threshold in watts.
    #[arg(long, default_value_t = BridgeConfig::DEFAULT_MAX_POWER_W)]
    pub max_power: u64,
    /// Retired page threshold.
    #[arg(long, default_value_t = BridgeConfig::DEFAULT_MAX_RETIRED_PAGES)]
    pub max_retired_pages: u64,
}
