//! 请求签名：为每次鉴权请求生成 nonce/时间戳/proof 与 ECDSA 签名 header。

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use lm_shared_protocol::{
    HEADER_INSTALLATION_ID, HEADER_NONCE, HEADER_REQUEST_SIGNATURE, HEADER_TIMESTAMP,
};
use p256::ecdsa::{Signature, signature::Signer};

use crate::{
    clock::{Clock, NonceSource, SystemClock, UuidNonce},
    identity::InstallationKey,
    proof::compute_proof,
};

/// 单次请求的签名 header。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub installation_id: String,
    /// unix 毫秒字符串。
    pub timestamp: String,
    pub nonce: String,
    /// base64 编码的 DER ECDSA 签名。
    pub signature: String,
}

impl SignedHeaders {
    /// 以 `(header 名, 值)` 形式返回四个必需 header。
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            (HEADER_INSTALLATION_ID, self.installation_id.as_str()),
            (HEADER_TIMESTAMP, self.timestamp.as_str()),
            (HEADER_NONCE, self.nonce.as_str()),
            (HEADER_REQUEST_SIGNATURE, self.signature.as_str()),
        ]
    }
}

/// 请求签名器；时钟与 nonce 来源可替换。
#[derive(Clone)]
pub struct RequestSigner {
    clock: Arc<dyn Clock>,
    nonces: Arc<dyn NonceSource>,
}

impl Default for RequestSigner {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(UuidNonce))
    }
}

impl RequestSigner {
    pub fn new(clock: Arc<dyn Clock>, nonces: Arc<dyn NonceSource>) -> Self {
        Self { clock, nonces }
    }

    /// 生成签名 header。
    ///
    /// `proof_input = <id>.<nonce>.<timestamp>`，签名数据为 `<proof_input>.<proof>`。
    pub fn sign(&self, identity: &InstallationKey) -> SignedHeaders {
        let nonce = self.nonces.next_nonce();
        let timestamp = self.clock.now().timestamp_millis().to_string();
        let proof_input = format!("{}.{nonce}.{timestamp}", identity.installation_id());
        let proof = compute_proof(&proof_input, identity.secret());
        let signature_data = format!("{proof_input}.{proof}");

        let signature: Signature = identity.signing_key().sign(signature_data.as_bytes());

        SignedHeaders {
            installation_id: identity.installation_id().to_string(),
            timestamp,
            nonce,
            signature: STANDARD.encode(signature.to_der().as_bytes()),
        }
    }
}
