//! 用户设置：API 密钥、模型、语言、安全设置和题目数量

use crate::services::gemini::{SessionConfig, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const MODEL_ENV: &str = "RECAP_MODEL";

/// 可选模型
pub const MODEL_OPTIONS: [&str; 2] = ["gemini-2.0-pro-exp-02-05", "gemini-2.0-flash"];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is invalid: {0}")]
    Format(#[from] serde_json::Error),
    #[error("no API key configured (set GEMINI_API_KEY or add it to the settings file)")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub api_key: String,
    pub model_name: String,
    pub language: String,
    pub safety_enabled: bool,
    pub number_of_questions: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model_name: DEFAULT_MODEL.to_string(),
            language: "English".to_string(),
            safety_enabled: false,
            number_of_questions: 5,
        }
    }
}

impl AppSettings {
    /// 读取设置文件，不存在时使用默认值
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// 用查找函数覆盖密钥和模型，空值忽略
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_key = key.trim().to_string();
        }
        if let Some(model) = lookup(MODEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.model_name = model.trim().to_string();
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub fn session_config(&self) -> Result<SessionConfig, SettingsError> {
        if self.api_key.trim().is_empty() {
            return Err(SettingsError::MissingApiKey);
        }
        if !MODEL_OPTIONS.contains(&self.model_name.as_str()) {
            log::warn!("Model {} is not one of the known options", self.model_name);
        }
        let mut config = SessionConfig::new(self.api_key.clone(), self.model_name.clone());
        config.language = self.language.clone();
        config.safety_enabled = self.safety_enabled;
        config.question_count = self.number_of_questions;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("recap-settings-{}.json", Uuid::new_v4()));
        assert_eq!(AppSettings::load(&path).unwrap(), AppSettings::default());
    }

    #[test]
    fn test_save_and_load_partial_file() {
        let dir = std::env::temp_dir().join(format!("recap-settings-{}", Uuid::new_v4()));
        let path = dir.join("settings.json");

        let mut settings = AppSettings::default();
        settings.language = "French".to_string();
        settings.safety_enabled = true;
        settings.save(&path).unwrap();
        assert_eq!(AppSettings::load(&path).unwrap(), settings);

        std::fs::write(&path, br#"{"apiKey": "abc"}"#).unwrap();
        let partial = AppSettings::load(&path).unwrap();
        assert_eq!(partial.api_key, "abc");
        assert_eq!(partial.number_of_questions, 5);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_overrides_and_session_config() {
        let mut settings = AppSettings::default();
        assert!(matches!(
            settings.session_config(),
            Err(SettingsError::MissingApiKey)
        ));

        settings.apply_overrides(|name| match name {
            API_KEY_ENV => Some(" key-123 ".to_string()),
            MODEL_ENV => Some(String::new()),
            _ => None,
        });
        settings.number_of_questions = 10;

        let config = settings.session_config().unwrap();
        assert_eq!(config.api_key, "key-123");
        assert_eq!(config.model_name, DEFAULT_MODEL);
        assert_eq!(config.question_count, 10);
        assert!(!config.safety_enabled);
    }
}
