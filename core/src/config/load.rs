use std::path::{Path, PathBuf};

use super::types::AppConfig;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// `~/.taskmux`
pub fn data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".taskmux"))
}

/// Expands `~` and `$VARS`; unknown variables leave the path untouched.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
    toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))
}

/// `~/.taskmux/config.toml`, else `./config.toml`, else defaults; then the
/// `TASKMUX_*` environment overrides.
pub fn load_default() -> anyhow::Result<AppConfig> {
    let data_dir = data_dir()?;
    let user_config = data_dir.join(CONFIG_FILE_NAME);
    let local_config = Path::new(CONFIG_FILE_NAME);

    let mut cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    resolve_paths(&mut cfg, &data_dir);
    Ok(cfg)
}

/// Applies `TASKMUX_*` overrides read through `lookup`. Blank or unparsable
/// values are ignored.
pub fn apply_env_overrides(cfg: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("TASKMUX_MAX_PARALLEL") {
        match v.parse::<usize>() {
            Ok(n) if n > 0 => cfg.executor.max_parallel = Some(n),
            _ => tracing::warn!(value = %v, "ignoring invalid TASKMUX_MAX_PARALLEL"),
        }
    }
    if let Some(v) = get("TASKMUX_STORE_DIR") {
        cfg.store.directory = Some(v);
    }
    if let Some(v) = get("TASKMUX_FALLBACK_BACKEND") {
        cfg.executor.fallback.default_backend = Some(v);
    }
    if let Some(v) = get("TASKMUX_LOG_LEVEL") {
        cfg.logging.level = v;
    }
}

fn resolve_paths(cfg: &mut AppConfig, data_dir: &Path) {
    let store_dir = match cfg.store.directory.as_deref().map(str::trim) {
        Some(dir) if !dir.is_empty() => expand_path(dir),
        _ => data_dir.join("runs"),
    };
    cfg.store.directory = Some(store_dir.to_string_lossy().to_string());

    let logs_dir = match cfg.logging.directory.as_deref().map(str::trim) {
        Some(dir) if !dir.is_empty() => expand_path(dir),
        _ => data_dir.join("logs"),
    };
    cfg.logging.directory = Some(logs_dir.to_string_lossy().to_string());

    if cfg.events_out.path != "stdout:" {
        cfg.events_out.path = expand_path(&cfg.events_out.path)
            .to_string_lossy()
            .to_string();
    }
}
