//! Persisted configuration for nwmng.
//!
//! The provisioner profile (TOML, loaded through figment with `NWMNG_`
//! environment overrides) and the startup argument cache. Translates the
//! profile into the runtime types of `nwmng_core`; the core crate never
//! touches disk itself.

pub mod args_cache;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nwmng_core::{ManagerSettings, MeshKey, ProvisionerConfig, Subnet, Timeouts};
use nwmng_ncp::TxParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use args_cache::{ArgKey, ProjArgs, Transport};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("malformed line {line}: {reason}")]
    Format { line: usize, reason: String },

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

// ── TOML profile structs ────────────────────────────────────────────

/// Top-level provisioner profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    #[serde(default)]
    pub provisioner: ProvisionerSection,

    #[serde(default)]
    pub subnets: Vec<SubnetProfile>,

    #[serde(default)]
    pub manager: ManagerSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProvisionerSection {
    /// Local unicast address.
    #[serde(default = "default_address")]
    pub address: u16,

    #[serde(default)]
    pub iv_index: u32,

    pub net_tx: Option<TxParams>,

    pub timeouts: Option<TimeoutsProfile>,
}

impl Default for ProvisionerSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            iv_index: 0,
            net_tx: None,
            timeouts: None,
        }
    }
}

fn default_address() -> u16 {
    0x0001
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeoutsProfile {
    pub normal_ms: u32,
    pub lpn_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubnetProfile {
    pub netkey: KeyProfile,
    #[serde(default)]
    pub appkeys: Vec<KeyProfile>,
}

/// A key as written in the profile: 32 hex digits plus NCP bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyProfile {
    pub refid: u16,
    pub key: String,
    /// NCP index, written back after the key is created.
    #[serde(default)]
    pub id: u16,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ManagerSection {
    #[serde(default = "default_prov_sessions")]
    pub max_prov_sessions: usize,

    #[serde(default = "default_config_sessions")]
    pub max_config_sessions: usize,

    #[serde(default = "default_prov_timeout")]
    pub prov_timeout_secs: u64,

    #[serde(default = "default_oom_cooldown")]
    pub oom_cooldown_ms: u64,

    #[serde(default = "default_guard_timeout")]
    pub guard_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,

    #[serde(default)]
    pub free_mode: bool,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            max_prov_sessions: default_prov_sessions(),
            max_config_sessions: default_config_sessions(),
            prov_timeout_secs: default_prov_timeout(),
            oom_cooldown_ms: default_oom_cooldown(),
            guard_timeout_secs: default_guard_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            init_timeout_secs: default_init_timeout(),
            free_mode: false,
        }
    }
}

fn default_prov_sessions() -> usize {
    3
}
fn default_config_sessions() -> usize {
    6
}
fn default_prov_timeout() -> u64 {
    60
}
fn default_oom_cooldown() -> u64 {
    2000
}
fn default_guard_timeout() -> u64 {
    20
}
fn default_sweep_interval() -> u64 {
    200
}
fn default_init_timeout() -> u64 {
    10
}

// ── Key encoding ────────────────────────────────────────────────────

/// Parse a 128-bit key written as 32 hex digits (an optional `0x` prefix
/// is accepted).
pub fn parse_key(field: &str, text: &str) -> Result<[u8; 16], ConfigError> {
    let digits = text.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.len() != 32 || !digits.is_ascii() {
        return Err(invalid(field, format!("expected 32 hex digits, got '{text}'")));
    }
    let mut key = [0u8; 16];
    for (i, byte) in key.iter_mut().enumerate() {
        let pair = &digits[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|_| invalid(field, format!("'{pair}' is not a hex byte")))?;
    }
    Ok(key)
}

pub fn format_key(key: &[u8; 16]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

fn random_key() -> [u8; 16] {
    uuid::Uuid::new_v4().into_bytes()
}

// ── Conversion to core types ────────────────────────────────────────

impl KeyProfile {
    fn generate(refid: u16) -> Self {
        Self {
            refid,
            key: format_key(&random_key()),
            id: 0,
            done: false,
        }
    }

    fn to_mesh_key(&self, field: &str) -> Result<MeshKey, ConfigError> {
        let mut key = MeshKey::new(self.refid, parse_key(field, &self.key)?);
        key.id = self.id;
        key.done = self.done;
        Ok(key)
    }

    fn from_mesh_key(key: &MeshKey) -> Self {
        Self {
            refid: key.refid,
            key: format_key(&key.val),
            id: key.id,
            done: key.done,
        }
    }
}

impl Profile {
    /// A fresh profile with one subnet, a random network key and one
    /// random appkey.
    pub fn generate() -> Self {
        Self {
            provisioner: ProvisionerSection::default(),
            subnets: vec![SubnetProfile {
                netkey: KeyProfile::generate(0),
                appkeys: vec![KeyProfile::generate(0)],
            }],
            manager: ManagerSection::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let addr = self.provisioner.address;
        if addr == 0 || addr > 0x7FFF {
            return Err(invalid(
                "provisioner.address",
                format!("0x{addr:04x} is not a unicast address"),
            ));
        }
        if self.subnets.is_empty() {
            return Err(invalid("subnets", "at least one network key is required"));
        }
        for (i, subnet) in self.subnets.iter().enumerate() {
            let mut seen = Vec::with_capacity(subnet.appkeys.len());
            for key in &subnet.appkeys {
                if seen.contains(&key.refid) {
                    return Err(invalid(
                        format!("subnets[{i}].appkeys"),
                        format!("duplicate refid {}", key.refid),
                    ));
                }
                seen.push(key.refid);
            }
        }
        let m = &self.manager;
        if m.max_prov_sessions == 0 || m.max_config_sessions == 0 {
            return Err(invalid("manager", "session limits must be at least 1"));
        }
        if m.sweep_interval_ms == 0 {
            return Err(invalid("manager.sweep_interval_ms", "must be non-zero"));
        }
        Ok(())
    }

    pub fn to_provisioner(&self) -> Result<ProvisionerConfig, ConfigError> {
        self.validate()?;
        let subnets = self
            .subnets
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let appkeys = s
                    .appkeys
                    .iter()
                    .enumerate()
                    .map(|(j, k)| k.to_mesh_key(&format!("subnets[{i}].appkeys[{j}].key")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Subnet {
                    netkey: s.netkey.to_mesh_key(&format!("subnets[{i}].netkey.key"))?,
                    appkeys,
                    active_appkeys: 0,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(ProvisionerConfig {
            address: self.provisioner.address,
            iv_index: self.provisioner.iv_index,
            subnets,
            net_tx: self.provisioner.net_tx,
            timeouts: self.provisioner.timeouts.map(|t| Timeouts {
                normal_ms: t.normal_ms,
                lpn_ms: t.lpn_ms,
            }),
        })
    }

    pub fn to_settings(&self) -> ManagerSettings {
        let m = &self.manager;
        ManagerSettings {
            max_prov_sessions: m.max_prov_sessions,
            max_config_sessions: m.max_config_sessions,
            prov_timeout: Duration::from_secs(m.prov_timeout_secs),
            oom_cooldown: Duration::from_millis(m.oom_cooldown_ms),
            guard_timeout: Duration::from_secs(m.guard_timeout_secs),
            sweep_interval: Duration::from_millis(m.sweep_interval_ms),
            init_timeout: Duration::from_secs(m.init_timeout_secs),
            free_mode: m.free_mode,
        }
    }

    /// Write the network state the manager learned back into the profile.
    /// Manager tunables are left alone.
    pub fn record(&mut self, prov: &ProvisionerConfig) {
        self.provisioner.address = prov.address;
        self.provisioner.iv_index = prov.iv_index;
        self.subnets = prov
            .subnets
            .iter()
            .map(|s| SubnetProfile {
                netkey: KeyProfile::from_mesh_key(&s.netkey),
                appkeys: s.appkeys.iter().map(KeyProfile::from_mesh_key).collect(),
            })
            .collect();
    }
}

// ── Config file paths ───────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "nwmng", "nwmng")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("nwmng");
    p
}

/// Resolve the profile path via XDG / platform conventions.
pub fn profile_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("provisioner.toml"),
        |dirs| dirs.config_dir().join("provisioner.toml"),
    )
}

/// Default location of the startup argument cache.
pub fn args_cache_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("args.cache"),
        |dirs| dirs.cache_dir().join("args.cache"),
    )
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load a profile from `path`, layered over the defaults and under
/// `NWMNG_` environment overrides (`NWMNG_MANAGER__FREE_MODE=true`).
pub fn load_profile(path: &Path) -> Result<Profile, ConfigError> {
    let profile: Profile = Figment::new()
        .merge(Serialized::defaults(Profile::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NWMNG_").split("__"))
        .extract()?;
    Ok(profile)
}

/// Load the profile at `path`, writing a freshly generated one first if
/// the file does not exist yet.
pub fn load_or_generate(path: &Path) -> Result<Profile, ConfigError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "generating new provisioner profile");
        save_profile(path, &Profile::generate())?;
    }
    load_profile(path)
}

pub fn save_profile(path: &Path, profile: &Profile) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(profile)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
