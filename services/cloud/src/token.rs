//! Bearer 凭证生命周期模块职责：
//! 1. 持有当前 access/refresh token，整体替换、从不局部修改。
//! 2. 每次取 token 时按过期时间惰性决定：复用、续期或重新登录。
//! 3. 同一管理器内的续期串行化，并发调用者复用同一次续期结果。

use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, TimeDelta, Utc};
use lm_shared_protocol::TokenResponse;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    clock::{Clock, SystemClock},
    error::CloudResult,
};

/// access token 固定有效期（分钟），不读取服务端声明的 TTL。
pub const TOKEN_LIFETIME_MINUTES: i64 = 60;
/// 到期前多少分钟开始主动续期。
pub const REFRESH_WINDOW_MINUTES: i64 = 10;

/// 当前 bearer 凭证。
#[derive(Clone, PartialEq, Eq)]
pub struct BearerCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredential")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// 凭证状态，由 `expires_at` 与当前时间比较得出。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Valid,
    NearExpiry,
    Expired,
}

impl TokenState {
    fn classify(credential: Option<&BearerCredential>, now: DateTime<Utc>) -> Self {
        let Some(credential) = credential else {
            return TokenState::NoToken;
        };
        if credential.expires_at <= now {
            TokenState::Expired
        } else if credential.expires_at <= now + TimeDelta::minutes(REFRESH_WINDOW_MINUTES) {
            TokenState::NearExpiry
        } else {
            TokenState::Valid
        }
    }
}

/// 登录与续期的实际发起方（通常是已签名的 HTTP 调用）。
pub trait CredentialIssuer: Sync {
    /// 用账号密码登录。
    fn sign_in(&self) -> impl Future<Output = CloudResult<TokenResponse>> + Send;
    /// 用 refresh token 换取新的 token 对。
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = CloudResult<TokenResponse>> + Send;
}

/// 单个安装实例的凭证持有者。
pub struct TokenManager {
    clock: Arc<dyn Clock>,
    current: RwLock<Option<BearerCredential>>,
    renewal: Mutex<()>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            current: RwLock::new(None),
            renewal: Mutex::new(()),
        }
    }

    /// 当前凭证快照。
    pub fn current(&self) -> Option<BearerCredential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 当前凭证状态。
    pub fn state(&self) -> TokenState {
        TokenState::classify(self.current().as_ref(), self.clock.now())
    }

    /// 返回可用的 access token；必要时登录或续期。
    ///
    /// 无凭证或已过期时重新登录，临近过期时续期，其余情况直接复用。
    pub async fn get_access_token<I>(&self, issuer: &I) -> CloudResult<String>
    where
        I: CredentialIssuer,
    {
        if let Some(token) = self.valid_access_token() {
            return Ok(token);
        }

        let _renewal = self.renewal.lock().await;
        let snapshot = self.current();
        let credential = match TokenState::classify(snapshot.as_ref(), self.clock.now()) {
            TokenState::Valid => {
                debug!("access token renewed by concurrent caller");
                return Ok(snapshot.map(|cred| cred.access_token).unwrap_or_default());
            }
            TokenState::NoToken | TokenState::Expired => self.sign_in(issuer).await?,
            TokenState::NearExpiry => self.refresh(issuer).await?,
        };
        Ok(credential.access_token)
    }

    /// 登录并替换当前凭证；失败时保留原凭证。
    pub async fn sign_in<I>(&self, issuer: &I) -> CloudResult<BearerCredential>
    where
        I: CredentialIssuer,
    {
        let tokens = issuer.sign_in().await?;
        let credential = self.store(tokens);
        info!("signed in, access token valid until {}", credential.expires_at);
        Ok(credential)
    }

    /// 续期并替换当前凭证；尚无 refresh token 时回退为登录。
    pub async fn refresh<I>(&self, issuer: &I) -> CloudResult<BearerCredential>
    where
        I: CredentialIssuer,
    {
        let Some(existing) = self.current() else {
            debug!("no refresh token yet, falling back to sign-in");
            return self.sign_in(issuer).await;
        };
        let tokens = issuer.refresh(&existing.refresh_token).await?;
        let credential = self.store(tokens);
        info!("access token refreshed, valid until {}", credential.expires_at);
        Ok(credential)
    }

    fn valid_access_token(&self) -> Option<String> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        let credential = guard.as_ref()?;
        match TokenState::classify(Some(credential), self.clock.now()) {
            TokenState::Valid => Some(credential.access_token.clone()),
            _ => None,
        }
    }

    fn store(&self, tokens: TokenResponse) -> BearerCredential {
        let credential = BearerCredential {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: self.clock.now() + TimeDelta::minutes(TOKEN_LIFETIME_MINUTES),
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        credential
    }
}
