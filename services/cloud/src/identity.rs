//! 安装实例身份模块职责：
//! 1. 生成 P-256 密钥对，并由安装 ID 与公钥推导 32 字节共享密钥。
//! 2. 校验并加载外部存储提供的身份文档（`installation_id`/`secret`/`private_key`）。
//! 3. 提供注册所需的公钥编码、注册 base string 与注册 proof。

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use p256::{
    SecretKey,
    ecdsa::SigningKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey},
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    error::{CloudError, CloudResult},
    proof::{SECRET_LEN, compute_proof},
};

/// 身份持久化文档；三个字段均为 base64 或明文字符串。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationKeyDocument {
    /// 安装实例 ID。
    #[serde(default)]
    pub installation_id: String,
    /// base64 编码的 32 字节共享密钥。
    #[serde(default)]
    pub secret: String,
    /// base64 编码的 PKCS#8 DER 私钥。
    #[serde(default)]
    pub private_key: String,
}

/// 已校验的安装实例身份，创建后不可变。
#[derive(Clone)]
pub struct InstallationKey {
    installation_id: String,
    secret: [u8; SECRET_LEN],
    signing_key: SigningKey,
    private_key_der: Vec<u8>,
    public_key_der: Vec<u8>,
}

impl fmt::Debug for InstallationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationKey")
            .field("installation_id", &self.installation_id)
            .finish_non_exhaustive()
    }
}

/// 生成新的安装实例 ID（小写 UUID）。
pub fn new_installation_id() -> String {
    Uuid::new_v4().to_string().to_lowercase()
}

impl InstallationKey {
    /// 为给定安装 ID 生成全新身份，不访问网络。
    pub fn generate(installation_id: &str) -> CloudResult<Self> {
        require_installation_id(installation_id)?;

        let secret_key = SecretKey::random(&mut OsRng);
        let private_key_der = secret_key
            .to_pkcs8_der()
            .map_err(|err| CloudError::Key(format!("encode private key failed: {err}")))?
            .as_bytes()
            .to_vec();
        let public_key_der = public_key_der(&secret_key)?;
        let secret = derive_secret(installation_id, &public_key_der);

        Ok(Self {
            installation_id: installation_id.to_string(),
            secret,
            signing_key: SigningKey::from(&secret_key),
            private_key_der,
            public_key_der,
        })
    }

    /// 校验持久化文档并加载身份；缺字段、密钥长度不为 32 或私钥无法解码时返回校验错误。
    pub fn parse(raw: Option<&InstallationKeyDocument>) -> CloudResult<Self> {
        let Some(doc) = raw else {
            return Err(CloudError::validation("installation key data is missing"));
        };

        let installation_id = doc.installation_id.as_str();
        if installation_id.is_empty() {
            return Err(CloudError::validation("installation key missing installation_id"));
        }
        require_installation_id(installation_id)?;
        if doc.secret.trim().is_empty() {
            return Err(CloudError::validation("installation key missing secret"));
        }
        if doc.private_key.trim().is_empty() {
            return Err(CloudError::validation("installation key missing private_key"));
        }

        let secret_raw = STANDARD
            .decode(doc.secret.trim())
            .map_err(|err| CloudError::validation(format!("secret is not base64: {err}")))?;
        let secret: [u8; SECRET_LEN] = secret_raw.as_slice().try_into().map_err(|_| {
            CloudError::validation(format!(
                "secret must be {SECRET_LEN} bytes, got {}",
                secret_raw.len()
            ))
        })?;

        let private_key_der = STANDARD
            .decode(doc.private_key.trim())
            .map_err(|err| CloudError::validation(format!("private_key is not base64: {err}")))?;
        let secret_key = SecretKey::from_pkcs8_der(&private_key_der).map_err(|err| {
            CloudError::validation(format!("private_key is not a P-256 PKCS#8 key: {err}"))
        })?;
        let public_key_der = public_key_der(&secret_key)?;

        Ok(Self {
            installation_id: installation_id.to_string(),
            secret,
            signing_key: SigningKey::from(&secret_key),
            private_key_der,
            public_key_der,
        })
    }

    /// 从 JSON 文本加载；`null` 与缺字段同样视为校验错误。
    pub fn from_json(raw: &str) -> CloudResult<Self> {
        let doc: Option<InstallationKeyDocument> = serde_json::from_str(raw)
            .map_err(|err| CloudError::validation(format!("decode installation key failed: {err}")))?;
        Self::parse(doc.as_ref())
    }

    /// 导出持久化文档。
    pub fn to_document(&self) -> InstallationKeyDocument {
        InstallationKeyDocument {
            installation_id: self.installation_id.clone(),
            secret: STANDARD.encode(self.secret),
            private_key: STANDARD.encode(&self.private_key_der),
        }
    }

    /// 安装实例 ID。
    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    /// 共享密钥，仅供本地计算 proof。
    pub fn secret(&self) -> &[u8; SECRET_LEN] {
        &self.secret
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// base64 编码的 SPKI DER 公钥（由私钥推导）。
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(&self.public_key_der)
    }

    /// 注册时被证明的字符串：`<installation_id>.<base64(sha256(公钥 DER))>`。
    pub fn registration_base_string(&self) -> String {
        let pub_hash_b64 = STANDARD.encode(Sha256::digest(&self.public_key_der));
        format!("{}.{pub_hash_b64}", self.installation_id)
    }

    /// 注册请求携带的 `X-Request-Proof`。
    pub fn registration_proof(&self) -> String {
        compute_proof(&self.registration_base_string(), &self.secret)
    }
}

/// 由私钥推导 SPKI DER 公钥。
fn public_key_der(secret_key: &SecretKey) -> CloudResult<Vec<u8>> {
    secret_key
        .public_key()
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|err| CloudError::Key(format!("encode public key failed: {err}")))
}

/// `sha256(<id>.<base64(公钥 DER)>.<base64(sha256(id))>)`。
/// 安装 ID 原样参与签名与注册，首尾带空白的 ID 直接拒绝，不做静默修剪。
fn require_installation_id(installation_id: &str) -> CloudResult<()> {
    if installation_id.trim().is_empty() {
        return Err(CloudError::validation("installation_id cannot be empty"));
    }
    if installation_id.trim() != installation_id {
        return Err(CloudError::validation(
            "installation_id must not have surrounding whitespace",
        ));
    }
    Ok(())
}

fn derive_secret(installation_id: &str, public_key_der: &[u8]) -> [u8; SECRET_LEN] {
    let pub_b64 = STANDARD.encode(public_key_der);
    let inst_hash_b64 = STANDARD.encode(Sha256::digest(installation_id.as_bytes()));
    let digest = Sha256::digest(format!("{installation_id}.{pub_b64}.{inst_hash_b64}").as_bytes());
    let mut secret = [0_u8; SECRET_LEN];
    secret.copy_from_slice(&digest);
    secret
}
