//! 云端鉴权客户端。
//!
//! 本 crate 提供：
//! - 安装实例身份（P-256 密钥对 + 32 字节共享密钥）的生成与校验
//! - 请求 proof 与 ECDSA 请求签名
//! - access/refresh token 的惰性续期
//! - 注册、登录、dashboard 查询与电源切换等云端调用

mod client;
mod clock;
mod error;
mod http;
mod identity;
mod proof;
mod signer;
mod token;

pub use client::{CloudClient, CloudConfig};
pub use clock::{Clock, NonceSource, SystemClock, UuidNonce};
pub use error::{CloudError, CloudResult};
pub use http::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, normalize_base_url};
pub use identity::{InstallationKey, InstallationKeyDocument, new_installation_id};
pub use proof::{SECRET_LEN, compute_proof};
pub use signer::{RequestSigner, SignedHeaders};
pub use token::{
    BearerCredential, CredentialIssuer, REFRESH_WINDOW_MINUTES, TOKEN_LIFETIME_MINUTES,
    TokenManager, TokenState,
};

pub use lm_shared_protocol::{Dashboard, MachineMode, extract_power};
