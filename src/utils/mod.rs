//! 路径、设置和日志等通用工具

pub mod logger;
pub mod settings;

use std::path::PathBuf;

const HISTORY_FILE: &str = "quiz.data";
const SETTINGS_FILE: &str = "settings.json";

/// 应用数据目录：优先 `RECAP_HOME`，否则 `$HOME/.local/share/recap`
pub fn get_app_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("RECAP_HOME") {
        return PathBuf::from(dir);
    }
    let mut path = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    path.push(".local/share/recap");
    path
}

pub fn get_history_path() -> PathBuf {
    get_app_data_dir().join(HISTORY_FILE)
}

pub fn get_settings_path() -> PathBuf {
    get_app_data_dir().join(SETTINGS_FILE)
}

pub fn get_log_path() -> PathBuf {
    get_app_data_dir().join("recap.log")
}
