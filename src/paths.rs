use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment override for the config directory
pub const CONFIG_DIR_ENV: &str = "NODEPLAY_CONFIG_DIR";

/// Files that make the current directory count as a local config dir
const LOCAL_FILES: [&str; 2] = ["nodeplay.json", "nodeplay.log"];

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (NODEPLAY_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. NODEPLAY_CONFIG_DIR environment variable
/// 3. Local folder IF nodeplay.json or nodeplay.log exists there
/// 4. Platform-specific config directory from dirs-next (default)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config_dir(config).join(name)
}

/// Get path to a data file (logs). Same priority as `config_file`, with the
/// platform data directory as default.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    data_dir(config).join(name)
}

/// Create config and data directories if missing.
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = config_dir(config);
    let data_dir = data_dir(config);

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    if data_dir != config_dir {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

fn has_local_files(dir: &Path) -> bool {
    LOCAL_FILES.iter().any(|f| dir.join(f).exists())
}

fn resolve(config: &PathConfig, platform: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Ok(cwd) = std::env::current_dir() {
        if has_local_files(&cwd) {
            return cwd;
        }
    }
    platform
        .map(|d| d.join("nodeplay"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn config_dir(config: &PathConfig) -> PathBuf {
    resolve(config, dirs_next::config_dir())
}

fn data_dir(config: &PathConfig) -> PathBuf {
    resolve(config, dirs_next::data_dir())
}
