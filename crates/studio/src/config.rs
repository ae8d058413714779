use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant for fullstack web development. You can help with weather, stocks, and code analysis.";

/// Environment variables checked for an API key, in order
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_GENERATIVE_AI_API_KEY"];

/// Studio settings loaded from ~/.config/code-studio/settings.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub model: String,
    pub base_url: String,
    pub system_prompt: String,
    /// Model round trips allowed per message, tool calls included
    pub max_steps: usize,
    /// 0 disables the idle timeout
    pub idle_timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: llm::GeminiClient::default_base_url(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: 5,
            idle_timeout_secs: 120,
            api_key: None,
        }
    }
}

impl StudioConfig {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_dir()?.join("settings.json"),
        };
        if !path.exists() {
            tracing::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let mut config: StudioConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;

        if let Some(api_key) = config.api_key.take() {
            match substitute_env_vars(&api_key) {
                Ok(resolved) => config.api_key = Some(resolved),
                Err(e) => tracing::warn!("Ignoring api_key from settings: {e:#}"),
            }
        }
        Ok(config)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Command line key first, then the settings file, then the environment
    pub fn resolve_api_key(&self, cli_key: Option<&str>) -> Option<String> {
        self.resolve_api_key_with(cli_key, |name| std::env::var(name).ok())
    }

    fn resolve_api_key_with(
        &self,
        cli_key: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        cli_key
            .map(str::to_string)
            .or_else(|| self.api_key.clone())
            .or_else(|| API_KEY_VARS.iter().find_map(|name| env(name)))
            .filter(|key| !key.trim().is_empty())
    }
}

pub fn config_dir() -> Result<PathBuf> {
    if let Ok(custom_dir) = std::env::var("CODE_STUDIO_CONFIG_DIR") {
        return Ok(PathBuf::from(custom_dir));
    }
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg_config).join("code-studio"));
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home.join(".config").join("code-studio"))
}

/// Replace `${VAR}` references. Substituted values are not scanned again.
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let end = start
            + rest[start..]
                .find('}')
                .ok_or_else(|| anyhow::anyhow!("Unterminated variable reference in {input:?}"))?;
        let var_name = &rest[start + 2..end];
        let value = std::env::var(var_name)
            .with_context(|| format!("Environment variable {var_name} is not set"))?;
        result.push_str(&rest[..start]);
        result.push_str(&value);
        rest = &rest[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}
