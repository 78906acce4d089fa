//! 日志初始化：控制台输出，可选写入日志文件

use log::LevelFilter;
use std::path::Path;

pub const LOG_LEVEL_ENV: &str = "RECAP_LOG";

/// 解析日志级别，无法识别时使用 info
pub fn parse_level(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// 初始化全局 logger，只能调用一次
pub fn init(log_file: Option<&Path>) -> Result<(), fern::InitError> {
    let level = parse_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref());

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // 依赖库的调试日志太多
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .chain(std::io::stderr());

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// 测试用，重复调用不会报错
pub fn init_test() {
    let _ = fern::Dispatch::new()
        .level(LevelFilter::Debug)
        .chain(std::io::stdout())
        .apply();
}
