//! `bmsgate check`: validate a config and list its point bindings.

use serde::Serialize;
use tabled::Tabled;

use bmsgate_config::GatewayConfig;
use bmsgate_core::PointKind;

use crate::cli::{CheckArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct BindingRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Trait")]
    trait_name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Point")]
    point_id: String,
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Conversion")]
    conversion: String,
    #[tabled(rename = "Check")]
    check: String,
}

fn conversion(kind: &PointKind) -> String {
    match kind {
        PointKind::Int64(numeric) | PointKind::Float32(numeric) => match numeric.scale {
            Some(scale) => format!("{} x{scale}", kind.target_name()),
            None => kind.target_name().to_owned(),
        },
        PointKind::String => kind.target_name().to_owned(),
        PointKind::Enum(point) if point.device_map.is_empty() => "enum (direct)".into(),
        PointKind::Enum(point) => format!("enum ({} values)", point.device_map.len()),
    }
}

/// One row per point binding, in config order.
pub fn binding_rows(config: &GatewayConfig) -> Result<Vec<BindingRow>, CliError> {
    let mut rows = Vec::new();
    for device in &config.devices {
        for trait_config in &device.traits {
            let kind = trait_config.trait_kind()?;
            for point in trait_config.point_configs()? {
                rows.push(BindingRow {
                    device: device.name.clone(),
                    protocol: device.protocol.to_string(),
                    trait_name: trait_config.name.clone(),
                    kind: kind.to_string(),
                    conversion: conversion(&point.kind),
                    point_id: point.point_id,
                    field: point.field,
                    check: trait_config.check.clone().unwrap_or_else(|| "-".into()),
                });
            }
        }
    }
    Ok(rows)
}

fn summary(config: &GatewayConfig, points: usize) -> String {
    let traits: usize = config.devices.iter().map(|d| d.traits.len()).sum();
    let checks: usize = config.devices.iter().map(|d| d.checks.len()).sum();
    format!(
        "{}: config OK ({} devices, {traits} traits, {points} points, {checks} checks)",
        config.name,
        config.devices.len()
    )
}

pub fn handle(args: &CheckArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = bmsgate_config::load_config(global.config.as_deref())?;

    if args.resolved {
        output::print_output(&bmsgate_config::to_toml_string(&config)?, global.quiet);
        return Ok(());
    }

    let rows = binding_rows(&config)?;
    let out = output::render_list(
        global.output,
        &rows,
        Clone::clone,
        |row| format!("{}\t{}\t{}", row.device, row.point_id, row.field),
    )?;
    output::print_output(&out, global.quiet);
    if global.output == OutputFormat::Table {
        output::print_output(&summary(&config, rows.len()), global.quiet);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
name = "plant"

[[devices]]
name = "meter-1"
protocol = "opcua"

[[devices.traits]]
name = "energy"
kind = "meter"

[[devices.traits.points]]
point_id = "ns=2;s=kWh"
field = "usage"
scale = 1000.0

[[devices.traits.points]]
point_id = "ns=2;s=kWhOut"
field = "produced"
"#;

    #[test]
    fn rows_describe_conversions() {
        let config = bmsgate_config::from_toml_str(CONFIG).unwrap();
        let rows = binding_rows(&config).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].conversion, "float32 x1000");
        assert_eq!(rows[1].conversion, "float32");
        assert_eq!(rows[0].check, "-");
        assert_eq!(
            summary(&config, rows.len()),
            "plant: config OK (1 devices, 1 traits, 2 points, 0 checks)"
        );
    }
}
