//! 日志系统模块职责：
//! 1. 初始化 stdout tracing 日志，过滤规则优先读取 `RUST_LOG`。
//! 2. 设置 `LM_LOG_DIR` 时额外按天滚动写入文件日志。

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// 文件日志目录环境变量；未设置时不落盘。
const LOG_DIR_ENV: &str = "LM_LOG_DIR";
/// 文件日志级别环境变量（独立于 `RUST_LOG`）。
const FILE_LOG_LEVEL_ENV: &str = "LM_FILE_LOG_LEVEL";
/// stdout 默认日志过滤。
const DEFAULT_STDOUT_FILTER: &str = "info";

/// 日志运行时守卫，防止 non-blocking writer 提前析构。
pub(crate) struct LogRuntime {
    _stdout_guard: WorkerGuard,
    _file_guard: Option<WorkerGuard>,
}

/// 初始化 CLI 日志系统。
pub(crate) fn init(service_name: &str) -> Result<LogRuntime> {
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(stdout_writer)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .with_filter(resolve_stdout_env_filter());

    let (file_layer, file_guard) = match resolve_log_dir() {
        Some(dir) => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("create log dir: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, format!("{service_name}.log"));
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(resolve_file_level_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LogRuntime {
        _stdout_guard: stdout_guard,
        _file_guard: file_guard,
    })
}

/// 解析 stdout 日志过滤规则：优先 `RUST_LOG`，回退默认级别。
fn resolve_stdout_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDOUT_FILTER))
}

/// 解析文件日志级别；默认 `debug`。
fn resolve_file_level_filter() -> LevelFilter {
    parse_level(std::env::var(FILE_LOG_LEVEL_ENV).ok()).unwrap_or(LevelFilter::DEBUG)
}

fn parse_level(raw: Option<String>) -> Option<LevelFilter> {
    raw.and_then(|raw| raw.trim().parse::<LevelFilter>().ok())
}

/// 将日志目录解析成绝对路径。
fn resolve_log_dir() -> Option<PathBuf> {
    let raw = std::env::var(LOG_DIR_ENV).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = PathBuf::from(trimmed);
    if path.is_absolute() {
        return Some(path);
    }
    Some(
        std::env::current_dir()
            .map(|dir| dir.join(&path))
            .unwrap_or(path),
    )
}
