//! 配置模块职责：
//! 1. 读取 CLI 运行所需的环境变量（账号、设备序列号、身份文件路径），并提供默认值。
//! 2. 校验 API 根地址与超时等可选覆盖项。

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, anyhow};
use lm_cloud::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, normalize_base_url};

/// 默认身份文件名（相对当前工作目录）。
const DEFAULT_KEY_FILE: &str = "installation_key.json";

/// CLI 运行时配置。
#[derive(Clone)]
pub(crate) struct Config {
    /// 云端账号。
    pub(crate) username: String,
    /// 云端密码。
    pub(crate) password: String,
    /// 目标设备序列号；为空时仅校验鉴权流程。
    pub(crate) serial: Option<String>,
    /// 安装实例身份文件路径。
    pub(crate) key_path: PathBuf,
    /// customer-app API 根地址。
    pub(crate) api_base_url: String,
    /// 单次请求等待上限。
    pub(crate) timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("serial", &self.serial)
            .field("key_path", &self.key_path)
            .field("api_base_url", &self.api_base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// 从进程环境变量构建配置。
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源构建配置；`LM_USERNAME` 与 `LM_PASSWORD` 必填。
    pub(crate) fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let username = non_empty("LM_USERNAME").ok_or_else(|| missing("LM_USERNAME"))?;
        // 密码不做 trim，首尾空白可能是密码的一部分。
        let password = lookup("LM_PASSWORD")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| missing("LM_PASSWORD"))?;

        let raw_base = non_empty("LM_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_base_url = normalize_base_url(&raw_base)
            .with_context(|| format!("invalid LM_API_BASE_URL: {raw_base}"))?
            .to_string();

        let key_path = non_empty("LM_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_key_path);

        let timeout = non_empty("LM_TIMEOUT_MS")
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self {
            username,
            password,
            serial: non_empty("LM_SERIAL"),
            key_path,
            api_base_url,
            timeout,
        })
    }
}

/// 默认身份文件路径：当前目录下的 `installation_key.json`。
fn default_key_path() -> PathBuf {
    match std::env::current_dir() {
        Ok(dir) => dir.join(DEFAULT_KEY_FILE),
        Err(_) => PathBuf::from(DEFAULT_KEY_FILE),
    }
}

fn missing(name: &str) -> anyhow::Error {
    anyhow!("Missing {name} in environment.")
}
