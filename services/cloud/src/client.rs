//! 云端客户端模块职责：
//! 1. 注册安装实例公钥，并以签名请求完成登录与 token 续期。
//! 2. 为每次业务调用附加 bearer token 与新鲜签名 header。
//! 3. 提供 dashboard 查询与电源模式切换命令。

use std::{fmt, sync::Arc, time::Duration};

use lm_shared_protocol::{
    ChangeModeCommand, Dashboard, HEADER_INSTALLATION_ID, HEADER_REQUEST_PROOF,
    RefreshTokenRequest, RegistrationRequest, SignInRequest, TokenResponse,
};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::{
    clock::{Clock, NonceSource, SystemClock, UuidNonce},
    error::{CloudError, CloudResult},
    http::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, JsonTransport, normalize_base_url},
    identity::InstallationKey,
    signer::{RequestSigner, SignedHeaders},
    token::{BearerCredential, CredentialIssuer, TokenManager},
};

/// 客户端配置。
#[derive(Clone)]
pub struct CloudConfig {
    /// customer-app API 根地址（以 `/` 结尾）。
    pub base_url: Url,
    pub username: String,
    pub password: String,
    /// 单次请求等待上限。
    pub timeout: Duration,
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CloudConfig {
    /// 使用默认 API 地址与超时构建配置。
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> CloudResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(DEFAULT_BASE_URL)?,
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// 覆盖 API 根地址。
    pub fn with_base_url(mut self, raw: &str) -> CloudResult<Self> {
        self.base_url = normalize_base_url(raw)?;
        Ok(self)
    }

    /// 覆盖请求超时。
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// 鉴权端点：注册、登录与续期，均由安装实例签名。
struct AuthApi {
    transport: JsonTransport,
    identity: InstallationKey,
    signer: RequestSigner,
    username: String,
    password: String,
}

impl AuthApi {
    fn signed(&self, request: RequestBuilder) -> RequestBuilder {
        apply_signed_headers(request, &self.signer.sign(&self.identity))
    }

    async fn post_signed<B: Serialize>(&self, path: &str, body: &B) -> CloudResult<TokenResponse> {
        let url = self.transport.endpoint(path)?;
        let request = self.signed(self.transport.request(Method::POST, url)).json(body);
        let data = self.transport.send(request).await?;
        serde_json::from_value(data)
            .map_err(|err| CloudError::Decode(format!("{path} response missing tokens: {err}")))
    }
}

impl CredentialIssuer for AuthApi {
    async fn sign_in(&self) -> CloudResult<TokenResponse> {
        let body = SignInRequest {
            username: self.username.clone(),
            password: self.password.clone(),
        };
        self.post_signed("auth/signin", &body).await
    }

    async fn refresh(&self, refresh_token: &str) -> CloudResult<TokenResponse> {
        let body = RefreshTokenRequest {
            username: self.username.clone(),
            refresh_token: refresh_token.to_string(),
        };
        self.post_signed("auth/refreshtoken", &body).await
    }
}

fn apply_signed_headers(mut request: RequestBuilder, headers: &SignedHeaders) -> RequestBuilder {
    for (name, value) in headers.pairs() {
        request = request.header(name, value);
    }
    request
}

/// 单个安装实例的云端客户端；token 由实例内的 [`TokenManager`] 独占持有。
pub struct CloudClient {
    auth: AuthApi,
    tokens: TokenManager,
}

impl fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudClient")
            .field("installation_id", &self.auth.identity.installation_id())
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl CloudClient {
    /// 使用系统时钟与随机 nonce 构建客户端。
    pub fn new(config: CloudConfig, identity: InstallationKey) -> CloudResult<Self> {
        Self::with_sources(config, identity, Arc::new(SystemClock), Arc::new(UuidNonce))
    }

    /// 指定时钟与 nonce 来源构建客户端。
    pub fn with_sources(
        config: CloudConfig,
        identity: InstallationKey,
        clock: Arc<dyn Clock>,
        nonces: Arc<dyn NonceSource>,
    ) -> CloudResult<Self> {
        let transport = JsonTransport::new(config.base_url, config.timeout)?;
        Ok(Self {
            auth: AuthApi {
                transport,
                identity,
                signer: RequestSigner::new(clock.clone(), nonces),
                username: config.username,
                password: config.password,
            },
            tokens: TokenManager::new(clock),
        })
    }

    pub fn identity(&self) -> &InstallationKey {
        &self.auth.identity
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// 向服务端注册安装实例公钥；新身份必须先注册才能调用其他接口。
    pub async fn register_client(&self) -> CloudResult<()> {
        let identity = &self.auth.identity;
        let url = self.auth.transport.endpoint("auth/init")?;
        let request = self
            .auth
            .transport
            .request(Method::POST, url)
            .header(HEADER_INSTALLATION_ID, identity.installation_id())
            .header(HEADER_REQUEST_PROOF, identity.registration_proof())
            .json(&RegistrationRequest {
                pk: identity.public_key_base64(),
            });
        self.auth.transport.send(request).await?;
        info!(
            "installation registered installation_id={}",
            identity.installation_id()
        );
        Ok(())
    }

    /// 强制重新登录。
    pub async fn sign_in(&self) -> CloudResult<BearerCredential> {
        self.tokens.sign_in(&self.auth).await
    }

    /// 强制续期；尚未登录时回退为登录。
    pub async fn refresh_token(&self) -> CloudResult<BearerCredential> {
        self.tokens.refresh(&self.auth).await
    }

    /// 返回可用 access token，按需登录或续期。
    pub async fn get_access_token(&self) -> CloudResult<String> {
        self.tokens.get_access_token(&self.auth).await
    }

    /// 通用鉴权调用：附加 bearer token 与签名 header 后发送。
    ///
    /// `path` 相对 API 根地址；传入绝对 URL 时原样使用。
    pub async fn api_call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> CloudResult<Value> {
        let token = self.get_access_token().await?;
        let url = self.auth.transport.endpoint(path)?;
        let mut request = self
            .auth
            .signed(self.auth.transport.request(method, url))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.auth.transport.send(request).await
    }

    /// 查询设备 dashboard。
    ///
    /// 成功响应按宽松模型解析，结构不符时电源状态为未知而非报错。
    pub async fn get_dashboard(&self, serial: &str) -> CloudResult<Dashboard> {
        let serial = require_serial(serial)?;
        let data = self
            .api_call(Method::GET, &format!("things/{serial}/dashboard"), None)
            .await?;
        Ok(Dashboard::from(data))
    }

    /// 切换电源：开机为 `BrewingMode`，关机为 `StandBy`。
    pub async fn set_power(&self, serial: &str, enabled: bool) -> CloudResult<Value> {
        let serial = require_serial(serial)?;
        let command = ChangeModeCommand::for_power(enabled);
        let body = serde_json::to_value(&command)
            .map_err(|err| CloudError::Decode(format!("encode command failed: {err}")))?;
        info!("changing machine mode serial={serial} mode={}", command.mode.as_str());
        self.api_call(
            Method::POST,
            &format!("things/{serial}/command/CoffeeMachineChangeMode"),
            Some(&body),
        )
        .await
    }
}

fn require_serial(serial: &str) -> CloudResult<&str> {
    let serial = serial.trim();
    if serial.is_empty() || serial.contains('/') {
        return Err(CloudError::Validation(format!(
            "invalid machine serial number: {serial:?}"
        )));
    }
    Ok(serial)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::TimeDelta;
    use reqwest::{Method, StatusCode};
    use serde_json::{Value, json};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, body_partial_json, header, header_exists, method, path},
    };

    use super::{CloudClient, CloudConfig};
    use crate::{
        clock::{ManualClock, UuidNonce},
        error::CloudError,
        identity::InstallationKey,
        token::TokenState,
    };

    const PREFIX: &str = "/api/customer-app";

    fn config(server: &MockServer) -> CloudConfig {
        CloudConfig::new("user@example.com", "hunter2")
            .expect("config")
            .with_base_url(&format!("{}{PREFIX}/", server.uri()))
            .expect("base url")
    }

    fn client(server: &MockServer) -> CloudClient {
        let identity = InstallationKey::generate("inst-test").expect("generate");
        CloudClient::new(config(server), identity).expect("client")
    }

    fn token_body(access: &str, refresh: &str) -> Value {
        json!({ "accessToken": access, "refreshToken": refresh })
    }

    async fn mount_sign_in(server: &MockServer, expected: u64) {
        Mock::given(method("POST"))
            .and(path(format!("{PREFIX}/auth/signin")))
            .and(header_exists("X-Request-Signature"))
            .and(header_exists("X-Nonce"))
            .and(header_exists("X-Timestamp"))
            .and(header("X-App-Installation-Id", "inst-test"))
            .and(body_json(json!({
                "username": "user@example.com",
                "password": "hunter2"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1", "refresh-1")))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn register_client_sends_proof_and_public_key() {
        let server = MockServer::start().await;
        let client = client(&server);
        let identity = client.identity();

        Mock::given(method("POST"))
            .and(path(format!("{PREFIX}/auth/init")))
            .and(header("X-App-Installation-Id", "inst-test"))
            .and(header("X-Request-Proof", identity.registration_proof().as_str()))
            .and(body_json(json!({ "pk": identity.public_key_base64() })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client.register_client().await.expect("register");
        assert_eq!(client.tokens().state(), TokenState::NoToken);
    }

    #[tokio::test]
    async fn dashboard_calls_reuse_a_single_sign_in() {
        let server = MockServer::start().await;
        mount_sign_in(&server, 1).await;
        Mock::given(method("GET"))
            .and(path(format!("{PREFIX}/things/GS01234/dashboard")))
            .and(header("Authorization", "Bearer access-1"))
            .and(header_exists("X-Request-Signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "widgets": [{ "code": "CMMachineStatus", "output": { "mode": "BrewingMode" } }]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&server);
        let first = client.get_dashboard("GS01234").await.expect("dashboard");
        let second = client.get_dashboard("GS01234").await.expect("dashboard");

        assert_eq!(first.power(), Some(true));
        assert_eq!(second.power(), Some(true));
    }

    #[tokio::test]
    async fn set_power_sends_identical_payloads() {
        let server = MockServer::start().await;
        mount_sign_in(&server, 1).await;
        Mock::given(method("POST"))
            .and(path(format!(
                "{PREFIX}/things/GS01234/command/CoffeeMachineChangeMode"
            )))
            .and(header("Authorization", "Bearer access-1"))
            .and(body_json(json!({ "mode": "BrewingMode" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "status": "Pending" }])))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!(
                "{PREFIX}/things/GS01234/command/CoffeeMachineChangeMode"
            )))
            .and(body_json(json!({ "mode": "StandBy" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let first = client.set_power("GS01234", true).await.expect("power on");
        let second = client.set_power("GS01234", true).await.expect("power on");
        let off = client.set_power("GS01234", false).await.expect("standby");

        assert_eq!(first, second);
        assert_eq!(off, Value::Null);
    }

    #[tokio::test]
    async fn near_expiry_uses_refresh_endpoint() {
        let server = MockServer::start().await;
        mount_sign_in(&server, 1).await;
        Mock::given(method("POST"))
            .and(path(format!("{PREFIX}/auth/refreshtoken")))
            .and(header_exists("X-Request-Signature"))
            .and(body_partial_json(json!({
                "username": "user@example.com",
                "refreshToken": "refresh-1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-2", "refresh-2")))
            .expect(1)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new());
        let identity = InstallationKey::generate("inst-test").expect("generate");
        let client = CloudClient::with_sources(
            config(&server),
            identity,
            clock.clone(),
            Arc::new(UuidNonce),
        )
        .expect("client");

        assert_eq!(client.get_access_token().await.expect("token"), "access-1");
        clock.advance(TimeDelta::minutes(51));
        assert_eq!(client.get_access_token().await.expect("token"), "access-2");
        assert_eq!(client.get_access_token().await.expect("token"), "access-2");
    }

    #[tokio::test]
    async fn malformed_dashboards_report_unknown_power() {
        let server = MockServer::start().await;
        mount_sign_in(&server, 1).await;
        let bodies = [
            (
                "NULLWIDGET",
                ResponseTemplate::new(200).set_body_json(json!({
                    "widgets": [
                        null,
                        { "code": "CMMachineStatus", "output": { "mode": "BrewingMode" } }
                    ]
                })),
                Some(true),
            ),
            (
                "NOTALIST",
                ResponseTemplate::new(200).set_body_json(json!({ "widgets": "x" })),
                None,
            ),
            (
                "NUMERICMODE",
                ResponseTemplate::new(200).set_body_json(json!({
                    "widgets": [{ "code": "CMMachineStatus", "output": { "mode": 3 } }]
                })),
                None,
            ),
            ("EMPTYBODY", ResponseTemplate::new(200), None),
        ];
        for (serial, response, _) in &bodies {
            Mock::given(method("GET"))
                .and(path(format!("{PREFIX}/things/{serial}/dashboard")))
                .respond_with(response.clone())
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = client(&server);
        for (serial, _, expected) in bodies {
            let dashboard = client
                .get_dashboard(serial)
                .await
                .unwrap_or_else(|err| panic!("{serial}: {err}"));
            assert_eq!(dashboard.power(), expected, "{serial}");
        }
    }

    #[tokio::test]
    async fn non_success_status_carries_parsed_payload() {
        let server = MockServer::start().await;
        mount_sign_in(&server, 1).await;
        Mock::given(method("GET"))
            .and(path(format!("{PREFIX}/things/MISSING/dashboard")))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "message": "thing not found" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{PREFIX}/things/BROKEN/dashboard")))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = client(&server);
        match client.get_dashboard("MISSING").await {
            Err(CloudError::Http { status, payload }) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(payload, json!({ "message": "thing not found" }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        match client.get_dashboard("BROKEN").await {
            Err(CloudError::Http { status, payload }) => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(payload, json!("bad gateway"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_sign_in_keeps_no_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{PREFIX}/auth/signin")))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "code": "bad_credentials" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.get_dashboard("GS01234").await.expect_err("should fail");
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(client.tokens().state(), TokenState::NoToken);
    }

    #[tokio::test]
    async fn sign_in_response_without_tokens_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{PREFIX}/auth/signin")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "a" })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(client.sign_in().await, Err(CloudError::Decode(_))));
        assert!(client.tokens().current().is_none());
    }

    #[tokio::test]
    async fn slow_responses_become_timeouts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{PREFIX}/auth/init")))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let identity = InstallationKey::generate("inst-test").expect("generate");
        let client = CloudClient::new(
            config(&server).with_timeout(Duration::from_millis(50)),
            identity,
        )
        .expect("client");

        let err = client.register_client().await.expect_err("should time out");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let identity = InstallationKey::generate("inst-test").expect("generate");
        let config = CloudConfig::new("u", "p")
            .expect("config")
            .with_base_url("http://127.0.0.1:1/api/customer-app/")
            .expect("base url");
        let client = CloudClient::new(config, identity).expect("client");

        assert!(matches!(
            client.register_client().await,
            Err(CloudError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn api_call_accepts_relative_paths() {
        let server = MockServer::start().await;
        mount_sign_in(&server, 1).await;
        Mock::given(method("GET"))
            .and(path(format!("{PREFIX}/things")))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "serialNumber": "GS01234" }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let things = client
            .api_call(Method::GET, "things", None)
            .await
            .expect("things");
        assert_eq!(things, json!([{ "serialNumber": "GS01234" }]));
    }

    #[tokio::test]
    async fn blank_serial_is_rejected_before_network() {
        let server = MockServer::start().await;
        let client = client(&server);
        assert!(matches!(
            client.set_power("  ", true).await,
            Err(CloudError::Validation(_))
        ));
        assert_eq!(client.tokens().state(), TokenState::NoToken);
    }
}
