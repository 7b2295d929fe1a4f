//! Pool and allocator configuration.
//!
//! [`PoolConfig`] can be built in code, deserialized with serde, or read
//! from the environment together with the device path and size through
//! [`AllocatorConfig::from_env`].

use std::{env, fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, InitError, Result};

/// Path used when `DAXALLOC_PATH` is not set.
pub const DEFAULT_DAX_PATH: &str = "/dev/dax0.0";

/// Allocation strategy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// First-fit over variable size blocks with splitting and coalescing.
    #[default]
    GeneralPurpose,
    /// Equal slots of [`PoolConfig::block_size`] bytes.
    FixedSize,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::GeneralPurpose => "general_purpose",
            PoolKind::FixedSize => "fixed_size",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "general_purpose" => Ok(PoolKind::GeneralPurpose),
            "fixed_size" => Ok(PoolKind::FixedSize),
            other => Err(Error::InvalidArgument(format!("unknown pool kind `{other}`"))),
        }
    }
}

/// Options of the pool built by `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    #[serde(rename = "pool_kind")]
    pub kind: PoolKind,
    /// Slot size of a [`PoolKind::FixedSize`] pool. Ignored otherwise.
    pub block_size: usize,
    /// Zero every allocatable byte once after the pool is built, so callers
    /// never observe residual data from the backing device.
    pub zero_fill: bool,
}

impl PoolConfig {
    pub const DEFAULT_BLOCK_SIZE: usize = 4096;

    pub const fn new() -> Self {
        Self {
            kind: PoolKind::GeneralPurpose,
            block_size: Self::DEFAULT_BLOCK_SIZE,
            zero_fill: true,
        }
    }

    pub const fn fixed_size(block_size: usize) -> Self {
        Self {
            kind: PoolKind::FixedSize,
            block_size,
            zero_fill: true,
        }
    }

    pub const fn with_zero_fill(mut self, zero_fill: bool) -> Self {
        self.zero_fill = zero_fill;
        self
    }

    /// Checks the parameters that do not depend on the mapped region.
    pub fn validate(&self) -> Result<()> {
        if self.kind == PoolKind::FixedSize && self.block_size == 0 {
            return Err(Error::InvalidArgument(
                "fixed_size pools need a non-zero block_size".into(),
            ));
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything `init` needs, as read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub path: PathBuf,
    pub size: usize,
    pub pool: PoolConfig,
}

impl AllocatorConfig {
    /// Reads `DAXALLOC_PATH`, `DAXALLOC_SIZE`, `DAXALLOC_POOL_KIND`,
    /// `DAXALLOC_BLOCK_SIZE` and `DAXALLOC_ZERO_FILL`.
    ///
    /// Errors name the init stage the bad variable belongs to: path and size
    /// are provider parameters, the rest are pool parameters.
    pub fn from_env() -> Result<Self, InitError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AllocatorConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, InitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = lookup("DAXALLOC_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DAX_PATH));

        let size = match lookup("DAXALLOC_SIZE") {
            Some(raw) => parse_number("DAXALLOC_SIZE", &raw),
            None => Err(Error::InvalidArgument("DAXALLOC_SIZE is not set".into())),
        }
        .map_err(InitError::ProviderParams)?;

        let pool = pool_from_lookup(&lookup).map_err(InitError::PoolParams)?;

        Ok(Self { path, size, pool })
    }
}

fn pool_from_lookup<F>(lookup: &F) -> Result<PoolConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut pool = PoolConfig::new();

    if let Some(raw) = lookup("DAXALLOC_POOL_KIND") {
        pool.kind = raw.trim().parse()?;
    }

    if let Some(raw) = lookup("DAXALLOC_BLOCK_SIZE") {
        pool.block_size = parse_number("DAXALLOC_BLOCK_SIZE", &raw)?;
    }

    if let Some(raw) = lookup("DAXALLOC_ZERO_FILL") {
        pool.zero_fill = parse_bool("DAXALLOC_ZERO_FILL", &raw)?;
    }

    pool.validate()?;

    Ok(pool)
}

fn parse_number(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .replace('_', "")
        .parse()
        .map_err(|err| Error::InvalidArgument(format!("{key}={raw:?}: {err}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidArgument(format!("{key}={raw:?} is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn default_is_zero_filled_general_purpose() {
        let config = PoolConfig::default();

        assert_eq!(config.kind, PoolKind::GeneralPurpose);
        assert!(config.zero_fill);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fixed_size_requires_block_size() {
        assert!(PoolConfig::fixed_size(0).validate().is_err());
        assert!(PoolConfig::fixed_size(64).validate().is_ok());
    }

    #[test]
    fn deserializes_snake_case_kinds() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"pool_kind": "fixed_size", "block_size": 256}"#).unwrap();

        assert_eq!(config.kind, PoolKind::FixedSize);
        assert_eq!(config.block_size, 256);
        assert!(config.zero_fill);

        let config: PoolConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn pool_kind_from_str() {
        assert_eq!("general_purpose".parse::<PoolKind>().unwrap(), PoolKind::GeneralPurpose);
        assert_eq!("fixed_size".parse::<PoolKind>().unwrap(), PoolKind::FixedSize);
        assert!("buddy".parse::<PoolKind>().is_err());
    }

    #[test]
    fn env_requires_size() {
        let err = AllocatorConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, InitError::ProviderParams(Error::InvalidArgument(_))));
    }

    #[test]
    fn env_overrides() {
        let config = AllocatorConfig::from_lookup(lookup(&[
            ("DAXALLOC_PATH", "/dev/dax1.0"),
            ("DAXALLOC_SIZE", "1_073_741_824"),
            ("DAXALLOC_POOL_KIND", "fixed_size"),
            ("DAXALLOC_BLOCK_SIZE", "512"),
            ("DAXALLOC_ZERO_FILL", "off"),
        ]))
        .unwrap();

        assert_eq!(config.path, PathBuf::from("/dev/dax1.0"));
        assert_eq!(config.size, 1 << 30);
        assert_eq!(config.pool.kind, PoolKind::FixedSize);
        assert_eq!(config.pool.block_size, 512);
        assert!(!config.pool.zero_fill);
    }

    #[test]
    fn env_defaults_path() {
        let config = AllocatorConfig::from_lookup(lookup(&[("DAXALLOC_SIZE", "4096")])).unwrap();

        assert_eq!(config.path, PathBuf::from(DEFAULT_DAX_PATH));
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn env_rejects_garbage() {
        let err = AllocatorConfig::from_lookup(lookup(&[
            ("DAXALLOC_SIZE", "4096"),
            ("DAXALLOC_ZERO_FILL", "maybe"),
        ]))
        .unwrap_err();

        let cause = err.cause().unwrap();
        assert!(cause.to_string().contains("DAXALLOC_ZERO_FILL"));
    }

    #[test]
    fn env_errors_carry_their_stage_code() {
        let cases: [(&[(&str, &str)], i32); 6] = [
            (&[("DAXALLOC_SIZE", "lots")], 1),
            (&[("DAXALLOC_PATH", "/dev/dax1.0")], 1),
            (&[("DAXALLOC_SIZE", "4096"), ("DAXALLOC_POOL_KIND", "buddy")], 3),
            (&[("DAXALLOC_SIZE", "4096"), ("DAXALLOC_BLOCK_SIZE", "-1")], 3),
            (&[("DAXALLOC_SIZE", "4096"), ("DAXALLOC_ZERO_FILL", "2")], 3),
            (
                &[
                    ("DAXALLOC_SIZE", "4096"),
                    ("DAXALLOC_POOL_KIND", "fixed_size"),
                    ("DAXALLOC_BLOCK_SIZE", "0"),
                ],
                3,
            ),
        ];

        for (vars, code) in cases {
            let err = AllocatorConfig::from_lookup(lookup(vars)).unwrap_err();
            assert_eq!(err.code(), code, "{vars:?}");
        }
    }
}
