//! 请求 proof 计算：基于 32 字节共享密钥的逐字节变换，再做 SHA-256。

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

/// 共享密钥长度。
pub const SECRET_LEN: usize = 32;

/// 对 `base_string` 计算 proof，输出 base64。
///
/// 工作区是密钥的本地副本，调用方持有的密钥不会被改写。
/// 输入按 UTF-8 字节处理；每个字节 `b` 选中 `work[b % 32]`，
/// 与之异或后按相邻槽位低 3 位做 8 位循环左移并写回。
pub fn compute_proof(base_string: &str, secret: &[u8; SECRET_LEN]) -> String {
    let mut work = *secret;
    for &byte in base_string.as_bytes() {
        let idx = usize::from(byte) % SECRET_LEN;
        let shift_idx = (idx + 1) % SECRET_LEN;
        let shift_amount = u32::from(work[shift_idx] & 0b111);
        work[idx] = (byte ^ work[idx]).rotate_left(shift_amount);
    }
    STANDARD.encode(Sha256::digest(work))
}
