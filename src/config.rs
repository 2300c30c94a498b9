use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

use crate::llm::{HarmBlockThreshold, HarmCategory, SafetySetting};
use crate::webhook::HEALTH_PATH;

pub const PLACEHOLDER_BOT_TOKEN: &str = "YOUR_BOT_TOKEN";
pub const PLACEHOLDER_API_KEY: &str = "YOUR_GEMINI_API_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api_base_url")]
    pub api_base_url: String,
    /// Reply to `/start`.
    #[serde(default = "default_welcome_text")]
    pub welcome_text: String,
    /// Sent in place of a completion when the Gemini call fails.
    #[serde(default = "default_error_text")]
    pub error_text: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default)]
    pub system_instruction: String,
    #[serde(default = "default_safety_settings")]
    pub safety_settings: Vec<SafetySetting>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_webhook_path() -> String {
    "/api/webhook".to_string()
}

fn default_telegram_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_welcome_text() -> String {
    "به ربات خوش آمدید.".to_string()
}

fn default_error_text() -> String {
    "خطایی در پردازش درخواست شما رخ داد.".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

/// Every harm category at `BLOCK_NONE`.
pub fn default_safety_settings() -> Vec<SafetySetting> {
    [
        HarmCategory::DangerousContent,
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: HarmBlockThreshold::BlockNone,
    })
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            webhook_path: default_webhook_path(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_telegram_api_base_url(),
            welcome_text: default_welcome_text(),
            error_text: default_error_text(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
            system_instruction: String::new(),
            safety_settings: default_safety_settings(),
        }
    }
}

impl Config {
    /// Load the optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject values the router would panic on at startup.
    pub fn validate(&self) -> Result<()> {
        let path = &self.server.webhook_path;
        anyhow::ensure!(
            path.starts_with('/'),
            "server.webhook_path must start with '/': {path:?}"
        );
        anyhow::ensure!(
            path != HEALTH_PATH,
            "server.webhook_path must not be {HEALTH_PATH}"
        );
        anyhow::ensure!(
            !path.contains(['{', '}', '*']),
            "server.webhook_path must be a literal path: {path:?}"
        );
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML")
    }

    /// Overlay values from `lookup` (normally the process environment) and
    /// substitute placeholders for secrets that are still missing.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            self.gemini.api_key = key;
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.gemini.model = model;
        }
        if let Some(addr) = get("BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if self.telegram.bot_token.is_empty() {
            warn!("TELEGRAM_TOKEN not set, outbound Telegram calls will fail");
            self.telegram.bot_token = PLACEHOLDER_BOT_TOKEN.to_string();
        }
        if self.gemini.api_key.is_empty() {
            warn!("GEMINI_API_KEY not set, completion calls will fail");
            self.gemini.api_key = PLACEHOLDER_API_KEY.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.server.webhook_path, "/api/webhook");
        assert_eq!(config.telegram.api_base_url, "https://api.telegram.org");
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert!(config.gemini.system_instruction.is_empty());
        assert_eq!(config.gemini.safety_settings.len(), 4);
        assert!(config
            .gemini
            .safety_settings
            .iter()
            .all(|s| s.threshold == HarmBlockThreshold::BlockNone));
    }

    #[test]
    fn test_toml_overrides() {
        let config = Config::from_toml_str(
            r#"
[server]
webhook_path = "/hook"

[telegram]
bot_token = "123:abc"
welcome_text = "Welcome!"

[gemini]
api_key = "key-1"
model = "gemini-2.0-flash"
safety_settings = [
    { category = "HARM_CATEGORY_HARASSMENT", threshold = "BLOCK_ONLY_HIGH" },
]
"#,
        )
        .unwrap();

        assert_eq!(config.server.webhook_path, "/hook");
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.welcome_text, "Welcome!");
        assert_eq!(config.telegram.error_text, default_error_text());
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.gemini.safety_settings.len(), 1);
        assert_eq!(
            config.gemini.safety_settings[0].category,
            HarmCategory::Harassment
        );
        assert_eq!(
            config.gemini.safety_settings[0].threshold,
            HarmBlockThreshold::BlockOnlyHigh
        );
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_toml_str(include_str!("../config.example.toml")).unwrap();
        assert_eq!(config.gemini.safety_settings, default_safety_settings());
        assert_eq!(config.telegram.welcome_text, default_welcome_text());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml_str("[telegram\nbot_token = 1").is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::from_toml_str(
            r#"
[telegram]
bot_token = "from-file"
"#,
        )
        .unwrap();
        config.apply_env(env(&[
            ("TELEGRAM_TOKEN", "from-env"),
            ("GEMINI_API_KEY", "gem-env"),
            ("BIND_ADDR", "127.0.0.1:8080"),
        ]));

        assert_eq!(config.telegram.bot_token, "from-env");
        assert_eq!(config.gemini.api_key, "gem-env");
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_missing_secrets_fall_back_to_placeholders() {
        let mut config = Config::default();
        config.apply_env(env(&[("TELEGRAM_TOKEN", "  ")]));

        assert_eq!(config.telegram.bot_token, PLACEHOLDER_BOT_TOKEN);
        assert_eq!(config.gemini.api_key, PLACEHOLDER_API_KEY);
    }

    #[test]
    fn test_default_webhook_path_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_webhook_paths_are_rejected() {
        for path in ["api/webhook", "", "/health", "/hook/{id}", "/*rest"] {
            let mut config = Config::default();
            config.server.webhook_path = path.to_string();
            assert!(config.validate().is_err(), "accepted {path:?}");
        }
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/relay.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }
}
