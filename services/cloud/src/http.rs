//! JSON HTTP 传输：拼接 API 地址、限制等待时间、统一响应体与错误。

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, header::CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{CloudError, CloudResult};

/// 默认 customer-app API 根地址。
pub const DEFAULT_BASE_URL: &str = "https://lion.lamarzocco.io/api/customer-app/";
/// 默认单次请求等待上限。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// 规范化 API 根地址：仅允许 http/https，并保证路径以 `/` 结尾。
pub fn normalize_base_url(raw: &str) -> CloudResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CloudError::Config("api base url cannot be empty".to_string()));
    }
    let mut parsed = Url::parse(trimmed)
        .map_err(|err| CloudError::Config(format!("invalid api base url {trimmed}: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CloudError::Config(format!(
                "unsupported api base url scheme: {other}"
            )));
        }
    }
    if parsed.host().is_none() {
        return Err(CloudError::Config("api base url missing host".to_string()));
    }
    parsed.set_query(None);
    parsed.set_fragment(None);
    // 结尾保留 `/`，确保 `Url::join("auth/signin")` 落在 base 路径之下。
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

/// 带超时与响应归一化的 JSON 传输。
#[derive(Debug, Clone)]
pub(crate) struct JsonTransport {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl JsonTransport {
    pub(crate) fn new(base_url: Url, timeout: Duration) -> CloudResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    /// 相对路径拼到 base 之下；传入绝对 URL 时原样使用。
    pub(crate) fn endpoint(&self, path: &str) -> CloudResult<Url> {
        self.base_url
            .join(path)
            .map_err(|err| CloudError::Config(format!("build endpoint {path} failed: {err}")))
    }

    /// 创建带 JSON content-type 的请求。
    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
    }

    /// 发送请求并读取响应体；超过等待上限即取消并返回超时错误。
    pub(crate) async fn send(&self, request: RequestBuilder) -> CloudResult<Value> {
        let request = request.build()?;
        let method = request.method().clone();
        let path = request.url().path().to_string();
        debug!("cloud request {method} {path}");

        let outcome = tokio::time::timeout(self.timeout, async {
            let response = self.http.execute(request).await?;
            read_response(response).await
        })
        .await;

        let result = match outcome {
            Ok(Err(CloudError::Transport(err))) if err.is_timeout() => {
                Err(CloudError::Timeout(self.timeout))
            }
            Ok(result) => result,
            Err(_) => Err(CloudError::Timeout(self.timeout)),
        };
        if let Err(err) = &result {
            warn!("cloud request {method} {path} failed: {err}");
        }
        result
    }
}

/// 响应体归一化：空体为 `null`，非 JSON 文本保留为字符串；非 2xx 转为 HTTP 错误。
async fn read_response(response: Response) -> CloudResult<Value> {
    let status = response.status();
    let text = response.text().await?;
    let payload = parse_body(text);
    if !status.is_success() {
        return Err(CloudError::Http { status, payload });
    }
    Ok(payload)
}

fn parse_body(text: String) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
