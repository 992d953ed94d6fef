//! Gateway configuration for bmsgate.
//!
//! TOML device definitions layered with environment overrides, validated
//! up front, and translated to `bmsgate_core` point bindings, check
//! definitions and poll settings.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;

use bmsgate_core::{
    BackoffConfig, CheckDefinition, EnumPoint, FieldType, NumericPoint, PointConfig, PointKind,
    PollConfig, TraitKind,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("device '{device}' defines check '{check}' more than once")]
    DuplicateCheck { device: String, check: String },

    #[error("trait '{trait_name}' on device '{device}' references unknown check '{check}'")]
    UnknownCheck {
        device: String,
        trait_name: String,
        check: String,
    },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Gateway instance name, used as the log and export prefix.
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            defaults: Defaults::default(),
            devices: Vec::new(),
        }
    }
}

/// Poll settings shared by every device unless overridden.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_poll_period")]
    pub poll_period_secs: u64,

    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Consecutive failures logged at `warn` before throttling.
    #[serde(default = "default_verbose_attempts")]
    pub verbose_attempts: u32,

    #[serde(default = "default_log_every")]
    pub log_every: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            poll_period_secs: default_poll_period(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            verbose_attempts: default_verbose_attempts(),
            log_every: default_log_every(),
        }
    }
}

fn default_name() -> String {
    "bmsgate".into()
}
fn default_poll_period() -> u64 {
    10
}
fn default_backoff_initial() -> u64 {
    1_000
}
fn default_backoff_max() -> u64 {
    30_000
}
fn default_verbose_attempts() -> u32 {
    3
}
fn default_log_every() -> u32 {
    10
}

/// Field protocol a device is reached over.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Bacnet,
    Opcua,
    Mqtt,
    Cloud,
}

/// One field device and the traits it exposes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub name: String,

    pub protocol: Protocol,

    /// Override of `defaults.poll_period_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_period_secs: Option<u64>,

    #[serde(default)]
    pub checks: Vec<CheckDefinition>,

    #[serde(default)]
    pub traits: Vec<TraitConfig>,
}

/// A trait instance fed by raw points.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TraitConfig {
    pub name: String,

    /// Trait kind, e.g. "air-temperature". Checked during validation so an
    /// unknown kind is reported with its location.
    pub kind: String,

    /// Id of the device check that receives this trait's point faults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,

    #[serde(default)]
    pub points: Vec<PointMapping>,
}

/// Maps one raw point onto a trait field.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PointMapping {
    pub point_id: String,

    pub field: String,

    /// Multiplier applied to raw readings. Numeric fields only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,

    /// Raw device value to trait enum name. Enum fields only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enum_map: BTreeMap<String, String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "bmsgate", "bmsgate").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("gateway.toml");
            p
        },
        |dirs| dirs.config_dir().join("gateway.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("bmsgate");
    p
}

// ── Config loading ──────────────────────────────────────────────────

fn base_figment() -> Figment {
    Figment::new().merge(Serialized::defaults(GatewayConfig::default()))
}

/// Load and validate the gateway config from file + environment.
///
/// An explicit `path` must exist. Without one the platform default path
/// is used and a missing file yields the built-in defaults. Environment
/// variables prefixed `BMSGATE_` override file values, with `__`
/// separating nested keys (`BMSGATE_DEFAULTS__POLL_PERIOD_SECS=5`).
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let path = match path {
        Some(path) if !path.exists() => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Some(path) => path.to_path_buf(),
        None => config_path(),
    };

    let config: GatewayConfig = base_figment()
        .merge(Toml::file(&path))
        .merge(Env::prefixed("BMSGATE_").split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

/// Parse and validate a config from a TOML string. No environment layer.
pub fn from_toml_str(source: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = base_figment().merge(Toml::string(source)).extract()?;
    config.validate()?;
    Ok(config)
}

/// Render a config back to TOML.
pub fn to_toml_string(config: &GatewayConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Write a config to `path`, creating parent directories.
pub fn save_config(config: &GatewayConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_toml_string(config)?)?;
    Ok(())
}

// ── Validation ──────────────────────────────────────────────────────

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

impl GatewayConfig {
    /// Reject configurations no driver could run. The first problem found
    /// is returned, naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("name", &self.name)?;
        self.defaults.validate()?;

        let mut names = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let at = format!("devices[{i}]");
            device.validate(&at)?;
            if !names.insert(device.name.as_str()) {
                return Err(invalid(
                    format!("{at}.name"),
                    format!("duplicate device '{}'", device.name),
                ));
            }
        }
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|device| device.name == name)
    }
}

impl Defaults {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_period_secs == 0 {
            return Err(invalid("defaults.poll_period_secs", "must be positive"));
        }
        if self.backoff_initial_ms == 0 {
            return Err(invalid("defaults.backoff_initial_ms", "must be positive"));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(invalid(
                "defaults.backoff_max_ms",
                format!("must be at least backoff_initial_ms ({})", self.backoff_initial_ms),
            ));
        }
        if self.log_every == 0 {
            return Err(invalid("defaults.log_every", "must be positive"));
        }
        Ok(())
    }

    /// Poll settings before any per-device override.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            period: Duration::from_secs(self.poll_period_secs),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(self.backoff_initial_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
            verbose_attempts: self.verbose_attempts,
            log_every: self.log_every,
        }
    }
}

impl DeviceConfig {
    fn validate(&self, at: &str) -> Result<(), ConfigError> {
        require_non_empty(&format!("{at}.name"), &self.name)?;
        if self.poll_period_secs == Some(0) {
            return Err(invalid(format!("{at}.poll_period_secs"), "must be positive"));
        }

        let mut check_ids = HashSet::new();
        for (i, check) in self.checks.iter().enumerate() {
            require_non_empty(&format!("{at}.checks[{i}].id"), &check.id)?;
            if !check_ids.insert(check.id.as_str()) {
                return Err(ConfigError::DuplicateCheck {
                    device: self.name.clone(),
                    check: check.id.clone(),
                });
            }
        }

        let mut trait_names = HashSet::new();
        for (i, trait_config) in self.traits.iter().enumerate() {
            let trait_at = format!("{at}.traits[{i}]");
            require_non_empty(&format!("{trait_at}.name"), &trait_config.name)?;
            if !trait_names.insert(trait_config.name.as_str()) {
                return Err(invalid(
                    format!("{trait_at}.name"),
                    format!("duplicate trait '{}'", trait_config.name),
                ));
            }
            if let Some(check) = &trait_config.check {
                if !check_ids.contains(check.as_str()) {
                    return Err(ConfigError::UnknownCheck {
                        device: self.name.clone(),
                        trait_name: trait_config.name.clone(),
                        check: check.clone(),
                    });
                }
            }
            trait_config.resolve_points(&trait_at)?;
        }
        Ok(())
    }

    /// Poll settings for this device.
    pub fn poll_config(&self, defaults: &Defaults) -> PollConfig {
        let mut config = defaults.poll_config();
        if let Some(secs) = self.poll_period_secs {
            config.period = Duration::from_secs(secs);
        }
        config
    }

    pub fn check(&self, id: &str) -> Option<&CheckDefinition> {
        self.checks.iter().find(|check| check.id == id)
    }

    /// Name a trait is served under: `<device>/<trait>`.
    pub fn trait_instance_name(&self, trait_config: &TraitConfig) -> String {
        format!("{}/{}", self.name, trait_config.name)
    }
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_kind(kind: &str, field: &str) -> Result<TraitKind, ConfigError> {
    kind.parse().map_err(|_| {
        let known: Vec<String> = TraitKind::iter().map(|k| k.to_string()).collect();
        invalid(
            field,
            format!("unknown trait kind '{kind}' (expected one of: {})", known.join(", ")),
        )
    })
}

impl TraitConfig {
    pub fn trait_kind(&self) -> Result<TraitKind, ConfigError> {
        parse_kind(&self.kind, &format!("traits.{}.kind", self.name))
    }

    /// Core point bindings for this trait, with each point's conversion
    /// chosen from the target field's type.
    pub fn point_configs(&self) -> Result<Vec<PointConfig>, ConfigError> {
        self.resolve_points(&format!("traits.{}", self.name))
    }

    fn resolve_points(&self, at: &str) -> Result<Vec<PointConfig>, ConfigError> {
        let kind = parse_kind(&self.kind, &format!("{at}.kind"))?;
        self.points
            .iter()
            .enumerate()
            .map(|(i, point)| point.resolve(kind, &format!("{at}.points[{i}]")))
            .collect()
    }
}

impl PointMapping {
    fn resolve(&self, kind: TraitKind, at: &str) -> Result<PointConfig, ConfigError> {
        require_non_empty(&format!("{at}.point_id"), &self.point_id)?;
        let field_type = kind.field_type(&self.field).ok_or_else(|| {
            invalid(
                format!("{at}.field"),
                format!(
                    "'{}' is not a field of {kind} (fields: {})",
                    self.field,
                    kind.field_names().join(", ")
                ),
            )
        })?;

        if self.scale.is_some() && !field_type.is_numeric() {
            return Err(invalid(
                format!("{at}.scale"),
                format!("field '{}' is {field_type}, scale needs a numeric field", self.field),
            ));
        }
        if let Some(scale) = self.scale {
            if !scale.is_finite() {
                return Err(invalid(format!("{at}.scale"), "must be finite"));
            }
        }
        if !self.enum_map.is_empty() && field_type != FieldType::Enum {
            return Err(invalid(
                format!("{at}.enum_map"),
                format!("field '{}' is {field_type}, not an enum", self.field),
            ));
        }

        let point_kind = match field_type {
            FieldType::Int64 => PointKind::Int64(NumericPoint { scale: self.scale }),
            FieldType::Float32 => PointKind::Float32(NumericPoint { scale: self.scale }),
            FieldType::String => PointKind::String,
            FieldType::Enum => PointKind::Enum(self.enum_point(kind, at)?),
            FieldType::Timestamp => {
                return Err(invalid(
                    format!("{at}.field"),
                    format!("'{}' is maintained by the gateway and cannot be mapped", self.field),
                ));
            }
        };

        Ok(PointConfig {
            point_id: self.point_id.clone(),
            field: self.field.clone(),
            kind: point_kind,
        })
    }

    fn enum_point(&self, kind: TraitKind, at: &str) -> Result<EnumPoint, ConfigError> {
        let trait_values = kind.enum_values(&self.field).unwrap_or_default();
        for (raw, name) in &self.enum_map {
            if !trait_values.contains_key(name) {
                return Err(invalid(
                    format!("{at}.enum_map.{raw}"),
                    format!("'{name}' is not a value of {kind}.{}", self.field),
                ));
            }
        }
        let device_map: HashMap<String, String> = self
            .enum_map
            .iter()
            .map(|(raw, name)| (raw.clone(), name.clone()))
            .collect();
        Ok(EnumPoint {
            device_map,
            trait_values,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn meter_device() -> DeviceConfig {
        DeviceConfig {
            name: "main-meter".into(),
            protocol: Protocol::Opcua,
            poll_period_secs: None,
            checks: vec![CheckDefinition::new("comms")],
            traits: vec![TraitConfig {
                name: "energy".into(),
                kind: "meter".into(),
                check: Some("comms".into()),
                points: vec![PointMapping {
                    point_id: "ns=2;s=Meter.kWh".into(),
                    field: "usage".into(),
                    scale: Some(1000.0),
                    enum_map: BTreeMap::new(),
                }],
            }],
        }
    }

    fn gateway(device: DeviceConfig) -> GatewayConfig {
        GatewayConfig {
            devices: vec![device],
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        GatewayConfig::default().validate().unwrap();
        assert_eq!(Defaults::default().poll_config(), PollConfig::default());
    }

    #[test]
    fn device_override_replaces_period_only() {
        let mut device = meter_device();
        device.poll_period_secs = Some(2);
        let config = device.poll_config(&Defaults::default());
        assert_eq!(config.period, Duration::from_secs(2));
        assert_eq!(config.backoff, BackoffConfig::default());
    }

    #[test]
    fn numeric_points_carry_scale() {
        let points = meter_device().traits[0].point_configs().unwrap();
        assert_eq!(
            points[0].kind,
            PointKind::Float32(NumericPoint::scaled(1000.0))
        );
    }

    #[test]
    fn zero_poll_period_is_rejected() {
        let mut device = meter_device();
        device.poll_period_secs = Some(0);
        let err = gateway(device).validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "devices[0].poll_period_secs")
        );
    }

    #[test]
    fn timestamp_fields_cannot_be_mapped() {
        let mut device = meter_device();
        device.traits[0].points[0].field = "end_time".into();
        device.traits[0].points[0].scale = None;
        let err = gateway(device).validate().unwrap_err();
        assert!(err.to_string().contains("maintained by the gateway"));
    }

    #[test]
    fn unknown_kind_lists_choices() {
        let mut device = meter_device();
        device.traits[0].kind = "elevator".into();
        let err = gateway(device).validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("devices[0].traits[0].kind"));
        assert!(message.contains("open-close"));
    }

    #[test]
    fn instance_names_are_device_scoped() {
        let device = meter_device();
        assert_eq!(
            device.trait_instance_name(&device.traits[0]),
            "main-meter/energy"
        );
    }
}
