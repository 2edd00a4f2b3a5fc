//! 时间与随机源抽象，便于测试注入固定值。

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 当前时间来源。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟。
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 请求 nonce 来源。
pub trait NonceSource: Send + Sync {
    fn next_nonce(&self) -> String;
}

/// 随机小写 UUID nonce。
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidNonce;

impl NonceSource for UuidNonce {
    fn next_nonce(&self) -> String {
        Uuid::new_v4().to_string().to_lowercase()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
