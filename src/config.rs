#![forbid(unsafe_code)]

//! Runtime configuration for the transfer binaries.
//!
//! Settings are layered: explicit CLI overrides win over process environment
//! variables, which win over the `.env` file, which wins over the built-in
//! defaults. Every key has a default except the ranking API key, which stays
//! optional because assisted selection is itself optional.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_LOG_FILE: &str = "transfer_log.json";
pub const DEFAULT_SOURCE_TOKEN_FILE: &str = "token_source.json";
pub const DEFAULT_DEST_TOKEN_FILE: &str = "token_dest.json";
pub const DEFAULT_RANKING_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_RANKING_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_UPLOAD_VISIBILITY: &str = "public";
pub const DEFAULT_MAX_LIST_RESULTS: usize = 200;

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub download_dir: PathBuf,
    pub log_file: PathBuf,
    pub source_token_file: PathBuf,
    pub dest_token_file: PathBuf,
    pub ranking_api_key: Option<String>,
    pub ranking_api_url: String,
    pub ranking_model: String,
    pub upload_visibility: String,
    pub max_list_results: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub download_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub upload_visibility: Option<String>,
    pub max_list_results: Option<usize>,
    pub env_path: Option<PathBuf>,
}

pub fn load_config() -> Result<TransferConfig> {
    resolve_config(ConfigOverrides::default())
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<TransferConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_config_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> TransferConfig {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> TransferConfig {
    let download_dir = overrides
        .download_dir
        .or_else(|| lookup_value("TRANSFER_DOWNLOAD_DIR", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));
    let log_file = overrides
        .log_file
        .or_else(|| lookup_value("TRANSFER_LOG_FILE", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
    let source_token_file = lookup_value("SOURCE_TOKEN_FILE", file_vars, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_TOKEN_FILE));
    let dest_token_file = lookup_value("DEST_TOKEN_FILE", file_vars, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DEST_TOKEN_FILE));
    let ranking_api_key = lookup_value("RANKING_API_KEY", file_vars, &env_lookup);
    let ranking_api_url = lookup_value("RANKING_API_URL", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_RANKING_API_URL.to_string());
    let ranking_model = lookup_value("RANKING_MODEL", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_RANKING_MODEL.to_string());
    let upload_visibility = overrides
        .upload_visibility
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
        .or_else(|| lookup_value("UPLOAD_VISIBILITY", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_UPLOAD_VISIBILITY.to_string());
    let max_list_results = overrides
        .max_list_results
        .or_else(|| {
            lookup_value("MAX_LIST_RESULTS", file_vars, &env_lookup)
                .and_then(|value| value.parse::<usize>().ok())
        })
        .unwrap_or(DEFAULT_MAX_LIST_RESULTS);

    TransferConfig {
        download_dir,
        log_file,
        source_token_file,
        dest_token_file,
        ranking_api_key,
        ranking_api_url,
        ranking_model,
        upload_visibility,
        max_list_results,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
