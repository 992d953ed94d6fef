//! Simulated protocol driver.
//!
//! Stands in for a field-bus client: each device gets fault checks, trait
//! cells, a value pipeline and a poll supervisor, and every poll
//! synthesizes one raw reading per configured point.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use bmsgate_config::{Defaults, DeviceConfig, GatewayConfig};
use bmsgate_core::{
    BoxError, Change, Clock, FaultCheck, FaultRegistry, HealthCheck, PointConfig, PointKind, PollSupervisor,
    PullOptions, RawValue, SupervisorState, TraitKind, TraitRouter, ValuePipeline,
};

use crate::error::CliError;

/// Failure injected by `--fail-every`.
#[derive(Debug, Error)]
#[error("simulated read timeout on {device} (poll {poll})")]
pub struct SimulatedReadError {
    device: String,
    poll: u64,
}

/// One line of `bmsgate run` output.
#[derive(Debug, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum GatewayEvent {
    Trait {
        name: String,
        kind: TraitKind,
        change: Change<Value>,
    },
    Health {
        check: String,
        change: Change<HealthCheck>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SimOptions {
    pub fail_every: Option<u64>,
    pub device: Option<String>,
}

// ── Gateway ──────────────────────────────────────────────────────────

/// All simulated devices of one gateway config.
pub struct Gateway {
    registry: FaultRegistry,
    router: TraitRouter,
    devices: Vec<SimDevice>,
}

impl Gateway {
    pub fn build(
        config: &GatewayConfig,
        options: &SimOptions,
        clock: &Arc<dyn Clock>,
    ) -> Result<Self, CliError> {
        let registry = FaultRegistry::with_clock(Arc::clone(clock));
        let router = TraitRouter::new();

        let mut devices = Vec::new();
        for device in config
            .devices
            .iter()
            .filter(|device| options.device.as_deref().is_none_or(|name| name == device.name))
        {
            devices.push(SimDevice::build(
                device,
                &config.defaults,
                &registry,
                &router,
                clock,
                options.fail_every,
            )?);
        }
        if devices.is_empty() {
            return Err(CliError::NoDevices);
        }

        Ok(Self {
            registry,
            router,
            devices,
        })
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn router(&self) -> &TraitRouter {
        &self.router
    }

    pub fn registry(&self) -> &FaultRegistry {
        &self.registry
    }

    /// Every trait and health change, merged. Subscribe before `start` so
    /// the seed values come first.
    pub fn events(&self, cancel: &CancellationToken) -> BoxStream<'static, GatewayEvent> {
        let mut streams: Vec<BoxStream<'static, GatewayEvent>> = Vec::new();

        for (name, kind) in self.router.list() {
            let Some(cell) = self.router.cell(&name, kind) else {
                continue;
            };
            let changes = cell.pull_json(cancel.clone(), PullOptions::new());
            streams.push(
                changes
                    .map(move |change| GatewayEvent::Trait {
                        name: name.clone(),
                        kind,
                        change,
                    })
                    .boxed(),
            );
        }

        for check in self.registry.checks() {
            let id = check.id().to_owned();
            streams.push(
                check
                    .pull(cancel.clone(), PullOptions::new())
                    .map(move |change| GatewayEvent::Health {
                        check: id.clone(),
                        change,
                    })
                    .boxed(),
            );
        }

        stream::select_all(streams).boxed()
    }

    /// Attach `cancel` as a consumer of every device's supervisor.
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), CliError> {
        for device in &self.devices {
            device.supervisor.attach(cancel.child_token())?;
        }
        Ok(())
    }

    /// Wait for every supervisor to stop, up to `limit` each.
    pub async fn wait_idle(&self, limit: Duration) {
        for device in &self.devices {
            let mut state = device.supervisor.state();
            let stopped = tokio::time::timeout(limit, state.wait_for(|s| *s == SupervisorState::Idle))
                .await
                .is_ok();
            if !stopped {
                warn!(device = %device.name, "supervisor did not stop in time");
            }
        }
    }

    /// Current status of every check.
    pub fn health(&self) -> Vec<HealthCheck> {
        self.registry.statuses()
    }

    /// Dispose the checks of every device.
    pub fn shutdown(&self) {
        for device in &self.devices {
            let disposed = self.registry.dispose_owner(&device.name);
            debug!(device = %device.name, disposed, "device checks disposed");
        }
    }
}

// ── Devices ──────────────────────────────────────────────────────────

struct SimDevice {
    name: String,
    supervisor: PollSupervisor,
}

impl SimDevice {
    fn build(
        config: &DeviceConfig,
        defaults: &Defaults,
        registry: &FaultRegistry,
        router: &TraitRouter,
        clock: &Arc<dyn Clock>,
        fail_every: Option<u64>,
    ) -> Result<Self, CliError> {
        let mut checks: HashMap<&str, FaultCheck> = HashMap::new();
        for definition in &config.checks {
            let check = registry.new_fault_check(&config.name, definition.clone())?;
            checks.insert(definition.id.as_str(), check);
        }

        let mut pipeline = ValuePipeline::new();
        let mut points = Vec::new();
        let mut seen = HashSet::new();
        for trait_config in &config.traits {
            let kind = trait_config.trait_kind()?;
            let name = config.trait_instance_name(trait_config);
            let cell = router.serve(&name, kind, Arc::clone(clock))?;
            let check = trait_config
                .check
                .as_deref()
                .and_then(|id| checks.get(id))
                .cloned();

            for point in trait_config.point_configs()? {
                if seen.insert(point.point_id.clone()) {
                    points.push(point.clone());
                }
                pipeline.add_binding(point, Arc::clone(&cell), check.clone())?;
            }
        }

        let state = Arc::new(DeviceState {
            name: config.name.clone(),
            pipeline,
            points,
            polls: AtomicU64::new(0),
            fail_every,
        });
        let supervisor = PollSupervisor::new(
            config.name.clone(),
            config.poll_config(defaults),
            move |cancel| {
                let state = Arc::clone(&state);
                async move { state.poll(&cancel) }
            },
        );

        Ok(Self {
            name: config.name.clone(),
            supervisor,
        })
    }
}

struct DeviceState {
    name: String,
    pipeline: ValuePipeline,
    /// One entry per distinct point id.
    points: Vec<PointConfig>,
    polls: AtomicU64,
    fail_every: Option<u64>,
}

impl DeviceState {
    fn poll(&self, cancel: &CancellationToken) -> Result<(), BoxError> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let poll = self.polls.fetch_add(1, Ordering::Relaxed) + 1;

        if self.fail_every.is_some_and(|n| poll % n == 0) {
            let error = SimulatedReadError {
                device: self.name.clone(),
                poll,
            };
            for point in &self.points {
                self.pipeline.handle_read_error(&point.point_id, &error);
            }
            return Err(Box::new(error));
        }

        for (index, point) in self.points.iter().enumerate() {
            let raw = synthesize(point, index, poll);
            let outcome = self.pipeline.handle_event(&point.point_id, &raw);
            trace!(device = %self.name, point = %point.point_id, %raw, ?outcome, "simulated reading");
        }
        Ok(())
    }
}

// ── Value synthesis ──────────────────────────────────────────────────

/// Deterministic raw reading for `point` on the given poll.
fn synthesize(point: &PointConfig, index: usize, poll: u64) -> RawValue {
    match &point.kind {
        PointKind::Float32(numeric) | PointKind::Int64(numeric) => {
            let base = 20.0 + f64::from(u32::try_from(index).unwrap_or(u32::MAX));
            let wave = match poll % 4 {
                1 | 3 => 0.5,
                2 => 1.0,
                _ => 0.0,
            };
            let value = base + wave;
            let raw = numeric
                .scale
                .filter(|scale| scale.abs() > f64::EPSILON)
                .map_or(value, |scale| value / scale);
            RawValue::F64(raw)
        }
        PointKind::String => RawValue::String(format!("{} #{poll}", point.point_id)),
        PointKind::Enum(enum_point) if enum_point.device_map.is_empty() => {
            let mut numbers: Vec<i32> = enum_point
                .trait_values
                .values()
                .copied()
                .filter(|n| *n != 0)
                .collect();
            numbers.sort_unstable();
            RawValue::I32(pick(&numbers, poll).unwrap_or_default())
        }
        PointKind::Enum(enum_point) => {
            let mut keys: Vec<&String> = enum_point.device_map.keys().collect();
            keys.sort();
            let key = pick(&keys, poll).map(String::as_str).unwrap_or_default();
            key.parse::<i64>()
                .map_or_else(|_| RawValue::String(key.to_owned()), RawValue::I64)
        }
    }
}

fn pick<T: Copy>(items: &[T], poll: u64) -> Option<T> {
    let len = u64::try_from(items.len()).ok().filter(|len| *len > 0)?;
    let index = usize::try_from(poll % len).ok()?;
    items.get(index).copied()
}
