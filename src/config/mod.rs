//! Configuration Management
//!
//! Run options for dumps and imports, and named connection profiles.
//!
//! # Configuration Locations
//! - Local: `.pgferry/config.json` (team-shareable, per-project)
//! - Global: `~/.config/pgferry/profiles.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Command-line flags (highest priority)
//! 2. Local profile registry (`.pgferry/config.json`)
//! 3. Global profile registry (`~/.config/pgferry/profiles.json`)
//!
//! # Profiles
//! A profile is a named connection plus dump and import option overrides:
//! ```json
//! {
//!   "profiles": {
//!     "staging": {
//!       "host": "db.internal", "port": 5432, "user": "deploy",
//!       "database": "app", "password_env": "STAGING_PASSWORD",
//!       "import": { "allow_drops": true, "error_mode": "continue" }
//!     }
//!   },
//!   "default": "staging"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::ConnectionConfig;
use crate::error::{FerryError, Result};
use crate::format::InsertFormat;

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_read_chunk() -> usize {
    64 * 1024
}

/// Options of one export run
///
/// Immutable once the dump starts; the server version is read from the
/// driver, not from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpOptions {
    /// Emit `DROP ... IF EXISTS ... CASCADE` before each object
    pub clean: bool,

    /// Emit `IF NOT EXISTS` / `OR REPLACE` where the server supports it
    pub if_not_exists: bool,

    /// Write role definitions ahead of the schemas in a database dump
    pub roles: bool,

    /// Include system roles (`postgres`, `pg_*`) in role dumps
    pub all_roles: bool,

    /// Emit `COMMENT ON` statements
    pub include_comments: bool,

    /// Table data only, no DDL
    pub data_only: bool,

    /// DDL only, no table data
    pub structure_only: bool,

    /// Rows per statement for the `multi` insert format
    pub batch_size: usize,

    pub insert_format: InsertFormat,

    /// Rows per cursor fetch; derived from the table's row width when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            clean: false,
            if_not_exists: false,
            roles: false,
            all_roles: false,
            include_comments: true,
            data_only: false,
            structure_only: false,
            batch_size: default_batch_size(),
            insert_format: InsertFormat::default(),
            chunk_size: None,
        }
    }
}

impl DumpOptions {
    #[must_use]
    pub const fn with_structure(&self) -> bool {
        !self.data_only
    }

    #[must_use]
    pub const fn with_data(&self) -> bool {
        !self.structure_only
    }
}

/// What a failed statement does to the rest of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Stop at the first failed statement
    #[default]
    Abort,
    /// Count the failure and carry on
    Continue,
}

impl ErrorMode {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "abort" => Some(Self::Abort),
            "continue" => Some(Self::Continue),
            _ => None,
        }
    }
}

/// Options of one import run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Execute `DROP` statements
    pub allow_drops: bool,

    /// Queue `OWNER TO` / `REASSIGN OWNED` statements for the end of the run
    pub ownership: bool,

    /// Queue `GRANT` / `REVOKE` statements for the end of the run
    pub rights: bool,

    /// Execute `CREATE|ALTER|DROP ROLE|USER`
    pub roles: bool,

    /// Execute tablespace statements
    pub tablespaces: bool,

    /// Execute `CREATE SCHEMA`
    pub schema_create: bool,

    /// Truncate each table once before its first data statement
    pub truncate: bool,

    /// Execute `INSERT` and `COPY` statements
    pub data: bool,

    pub error_mode: ErrorMode,

    /// Hold statements that change the importing role until the end
    pub defer_self: bool,

    /// Log every statement before executing it
    pub verbose: bool,

    /// Bytes read from the input per parser chunk
    pub chunk_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            allow_drops: false,
            ownership: false,
            rights: false,
            roles: false,
            tablespaces: false,
            schema_create: default_true(),
            truncate: false,
            data: default_true(),
            error_mode: ErrorMode::default(),
            defer_self: default_true(),
            verbose: false,
            chunk_size: default_read_chunk(),
        }
    }
}

/// Named connection plus option overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProfile {
    #[serde(flatten)]
    pub connection: ConnectionConfig,

    /// Environment variable holding the password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    #[serde(default)]
    pub dump: DumpOptions,

    #[serde(default)]
    pub import: ImportOptions,
}

impl RunProfile {
    /// Connection settings with `password_env` resolved
    pub fn resolve_connection(&self) -> Result<ConnectionConfig> {
        let mut config = self.connection.clone();

        if let Some(env_var) = &self.password_env {
            match std::env::var(env_var) {
                Ok(password) => config.password = Some(password),
                Err(_) => {
                    return Err(FerryError::config_error(format!(
                        "Environment variable {env_var} not found for password"
                    )));
                }
            }
        }

        Ok(config)
    }
}

/// Profile registry as stored in a config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRegistry {
    #[serde(default)]
    pub profiles: BTreeMap<String, RunProfile>,

    /// Profile used when none is named
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ProfileRegistry {
    /// Overlay `local` on top of `self`; local profiles win by name
    #[must_use]
    pub fn merged_with(mut self, local: Self) -> Self {
        self.profiles.extend(local.profiles);
        if local.default.is_some() {
            self.default = local.default;
        }
        self
    }

    /// Look up a profile by name, or the default one
    pub fn profile(&self, name: Option<&str>) -> Result<&RunProfile> {
        let name = match name {
            Some(n) => n,
            None => self.default.as_deref().ok_or_else(|| {
                let available: Vec<_> = self.profiles.keys().collect();
                FerryError::config_error(format!(
                    "No default profile set. Available profiles: {available:?}. Specify one with --profile."
                ))
            })?,
        };

        self.profiles.get(name).ok_or_else(|| {
            let available: Vec<_> = self.profiles.keys().collect();
            FerryError::config_error(format!("Profile '{name}' not found. Available profiles: {available:?}"))
        })
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.pgferry/config.json` (team-shareable)
    Local,
    /// Global config: `~/.config/pgferry/profiles.json` (per-user)
    Global,
}

/// Get path to local config file (`.pgferry/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        FerryError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".pgferry").join("config.json"))
}

/// Get path to global config file (`~/.config/pgferry/profiles.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| FerryError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("pgferry").join("profiles.json"))
}

/// Load a profile registry; a missing file is an empty registry
pub fn load_registry(path: &Path) -> Result<ProfileRegistry> {
    if !path.exists() {
        return Ok(ProfileRegistry::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| FerryError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str(&contents)
        .map_err(|e| FerryError::config_error(format!("Invalid config file format: {e}")))
}

/// Save a profile registry, creating the parent directory
pub fn save_registry(path: &Path, registry: &ProfileRegistry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            FerryError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(registry)
        .map_err(|e| FerryError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| FerryError::config_error(format!("Could not write config file: {e}")))?;

    Ok(())
}

/// Global registry with the local one laid over it
pub fn load_with_precedence() -> Result<ProfileRegistry> {
    let global = load_registry(&global_config_path()?)?;
    let local = load_registry(&local_config_path()?)?;
    Ok(global.merged_with(local))
}

/// Resolve a profile by name (or the default) from the merged registry
pub fn resolve_profile(name: Option<&str>) -> Result<RunProfile> {
    let registry = load_with_precedence()?;
    registry.profile(name).cloned()
}

/// Store a profile; the first profile of a registry becomes its default
pub fn save_profile(name: &str, profile: RunProfile, location: ConfigLocation) -> Result<()> {
    let path = match location {
        ConfigLocation::Local => local_config_path()?,
        ConfigLocation::Global => global_config_path()?,
    };

    let mut registry = load_registry(&path)?;
    if registry.profiles.is_empty() {
        registry.default = Some(name.to_string());
    }
    registry.profiles.insert(name.to_string(), profile);

    save_registry(&path, &registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(host: &str) -> RunProfile {
        RunProfile {
            connection: ConnectionConfig::postgres(host, 5432, "user", "pass", "db"),
            ..RunProfile::default()
        }
    }

    #[test]
    fn test_option_defaults() {
        let dump = DumpOptions::default();
        assert!(dump.include_comments);
        assert_eq!(dump.batch_size, 100);
        assert_eq!(dump.insert_format, InsertFormat::Copy);
        assert!(dump.with_structure() && dump.with_data());

        let import = ImportOptions::default();
        assert!(import.data);
        assert!(import.defer_self);
        assert!(import.schema_create);
        assert!(!import.allow_drops);
        assert_eq!(import.error_mode, ErrorMode::Abort);
    }

    #[test]
    fn test_partial_options_fill_defaults() {
        let import: ImportOptions =
            serde_json::from_str(r#"{"allow_drops": true, "error_mode": "continue"}"#).unwrap();
        assert!(import.allow_drops);
        assert_eq!(import.error_mode, ErrorMode::Continue);
        assert!(import.defer_self);

        let dump: DumpOptions = serde_json::from_str(r#"{"insert_format": "multi", "batch_size": 5}"#).unwrap();
        assert_eq!(dump.insert_format, InsertFormat::Multi);
        assert_eq!(dump.batch_size, 5);
    }

    #[test]
    fn test_profile_flattens_connection() {
        let json = r#"{
            "host": "localhost", "port": 5433, "user": "u", "database": "d",
            "import": { "truncate": true }
        }"#;
        let profile: RunProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.connection.port, Some(5433));
        assert_eq!(profile.connection.password, None);
        assert!(profile.import.truncate);
        assert_eq!(profile.dump, DumpOptions::default());
    }

    #[test]
    fn test_resolve_password_from_env() {
        std::env::set_var("PGFERRY_TEST_PASSWORD", "secret");
        let stored = RunProfile {
            connection: ConnectionConfig { password: None, ..profile("localhost").connection },
            password_env: Some("PGFERRY_TEST_PASSWORD".to_string()),
            ..RunProfile::default()
        };
        assert_eq!(stored.resolve_connection().unwrap().password, Some("secret".to_string()));
        std::env::remove_var("PGFERRY_TEST_PASSWORD");
    }

    #[test]
    fn test_resolve_missing_env_var() {
        let stored = RunProfile {
            password_env: Some("PGFERRY_NONEXISTENT_VAR".to_string()),
            ..profile("localhost")
        };
        let err = stored.resolve_connection().unwrap_err();
        assert!(err.message().contains("Environment variable PGFERRY_NONEXISTENT_VAR not found"));
    }

    #[test]
    fn test_local_overrides_global() {
        let mut global = ProfileRegistry::default();
        global.profiles.insert("shared".into(), profile("global-host"));
        global.profiles.insert("only-global".into(), profile("g"));
        global.default = Some("only-global".into());

        let mut local = ProfileRegistry::default();
        local.profiles.insert("shared".into(), profile("local-host"));
        local.default = Some("shared".into());

        let merged = global.merged_with(local);
        assert_eq!(merged.profiles.len(), 2);
        assert_eq!(merged.profile(None).unwrap().connection.host.as_deref(), Some("local-host"));
        assert_eq!(merged.profile(Some("only-global")).unwrap().connection.host.as_deref(), Some("g"));
    }

    #[test]
    fn test_unknown_profile() {
        let registry = ProfileRegistry::default();
        assert_eq!(registry.profile(None).unwrap_err().error_code(), "CONFIG_ERROR");
        assert!(registry.profile(Some("prod")).unwrap_err().message().contains("'prod' not found"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("pgferry-config-{}", std::process::id()));
        let path = dir.join("profiles.json");

        let mut registry = ProfileRegistry::default();
        registry.profiles.insert("dev".into(), profile("localhost"));
        registry.default = Some("dev".into());
        save_registry(&path, &registry).unwrap();

        assert_eq!(load_registry(&path).unwrap(), registry);
        assert_eq!(load_registry(&dir.join("missing.json")).unwrap(), ProfileRegistry::default());

        fs::remove_dir_all(&dir).unwrap();
    }
}
