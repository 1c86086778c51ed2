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

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, LatestArgs, SinceArgs, ViolationsArgs};
use dcgm_bridge::engine::{self, Engine};
use dcgm_bridge::mock::{records, MockEngine};
use dcgm_bridge::policy::{PolicyThresholds, SubscriptionBuilder};
use dcgm_bridge::values::{latest_values_with, Entity, FieldValue, ValuesSinceQuery, FLAG_LIVE_DATA};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dcgm_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            on_signal.cancel();
        }
    });

    let mock = cli.mock.then(|| Arc::new(MockEngine::with_demo_data()));
    let engine: Arc<dyn Engine> = match &mock {
        Some(mock) => Arc::clone(mock) as Arc<dyn Engine>,
        None => open_native(cli.host.clone())?,
    };
    engine::activate(engine.clone());

    let result = match cli.command {
        Commands::Latest(args) => run_latest(engine.as_ref(), &args, cli.json),
        Commands::Since(args) => run_since(engine.as_ref(), &args, cli.json),
        Commands::Violations(args) => {
            if let Some(mock) = &mock {
                spawn_mock_violations(mock.clone(), cancel.clone());
            }
            run_violations(engine, &args, cli.json, &cancel).await
        }
    };

    cancel.cancel();
    engine::deactivate();
    result
}

#[cfg(target_os = "linux")]
fn open_native(host: Option<String>) -> Result<Arc<dyn Engine>> {
    use dcgm_bridge::common::config::EnvConfig;
    use dcgm_bridge::engine::library::{ConnectionMode, LibDcgm};

    let mode = match host.or_else(EnvConfig::host_engine_address) {
        Some(address) => ConnectionMode::Standalone(address),
        None => ConnectionMode::Embedded,
    };
    let engine = LibDcgm::open(mode).context("Failed to connect to DCGM")?;
    Ok(Arc::new(engine))
}

#[cfg(not(target_os = "linux"))]
fn open_native(_host: Option<String>) -> Result<Arc<dyn Engine>> {
    anyhow::bail!("DCGM is only available on Linux; use --mock")
}

fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Int64(v) => v.to_string(),
        FieldValue::Float64(v) => format!("{v:.2}"),
        FieldValue::String(s) => s.clone(),
        FieldValue::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

fn run_latest(engine: &dyn Engine, args: &LatestArgs, json: bool) -> Result<()> {
    let entities: Vec<Entity> = args.gpus.iter().copied().map(Entity::gpu).collect();
    let flags = if args.live { FLAG_LIVE_DATA } else { 0 };
    let values = latest_values_with(engine, &entities, &args.fields, flags)?;

    for value in &values {
        if json {
            println!("{}", serde_json::to_string(value)?);
        } else if value.is_ok() {
            println!(
                "{} field {:>4}: {}",
                value.entity,
                value.field_id,
                format_value(&value.value)
            );
        } else {
            println!("{} field {:>4}: {}", value.entity, value.field_id, value.status);
        }
    }
    Ok(())
}

fn run_since(engine: &dyn Engine, args: &SinceArgs, json: bool) -> Result<()> {
    let result = ValuesSinceQuery::new(args.group, args.field_group)
        .since(args.since)
        .limit(args.limit)
        .collect_with(engine)?;

    for value in &result.values {
        if json {
            println!("{}", serde_json::to_string(value)?);
        } else {
            println!(
                "{} {} field {:>4}: {}",
                value.timestamp,
                value.entity,
                value.field_id,
                format_value(&value.value)
            );
        }
    }
    eprintln!(
        "{} value(s), next cursor {}",
        result.values.len(),
        result.next_since
    );
    Ok(())
}

async fn run_violations(
    engine: Arc<dyn Engine>,
    args: &ViolationsArgs,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let thresholds = PolicyThresholds {
        max_retired_pages: args.max_retired_pages,
        max_temperature_c: args.max_temperature,
        max_power_w: args.max_power,
    };
    let mut stream = SubscriptionBuilder::new(args.conditions.iter().copied())
        .group(args.group)
        .thresholds(thresholds)
        .engine(engine)
        .subscribe(cancel)?;
    info!("Watching {:?} on group {}", stream.conditions(), args.group);

    let mut seen = 0;
    while let Some(violation) = stream.recv().await {
        if json {
            println!("{}", serde_json::to_string(&violation)?);
        } else {
            println!("{violation}");
        }
        seen += 1;
        if args.count.is_some_and(|count| seen >= count) {
            stream.cancel();
        }
    }
    info!("Subscription closed after {seen} violation(s)");
    Ok(())
}

/// Feed demo violations into the mock engine from a plain thread, the way
/// the engine's notification thread would.
fn spawn_mock_violations(mock: Arc<MockEngine>, cancel: CancellationToken) {
    const XIDS: [u32; 3] = [13, 31, 79];
    thread::spawn(move || {
        let mut tick = 0usize;
        while !cancel.is_cancelled() {
            thread::sleep(Duration::from_millis(500));
            let now = chrono::Utc::now().timestamp_micros();
            let gpu = (tick % 2) as u32;
            let response = match tick % 3 {
                0 => records::xid_response(gpu, XIDS[tick % XIDS.len()], now),
                1 => records::thermal_response(gpu, 104, now),
                _ => records::power_response(gpu, 312, now),
            };
            if mock.fire_violation(response) == 0 && tick > 0 {
                debug!("Mock: No subscriber for {:#x}", response.condition);
            }
            tick += 1;
        }
    });
}
