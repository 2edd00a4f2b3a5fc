//! 安装实例身份文件的读取与首次生成。

use std::{fs, io::Write, path::Path};

use anyhow::Context;
use lm_cloud::{InstallationKey, new_installation_id};
use tracing::info;

/// 读取身份文件；不存在时生成新身份并以 0600 权限落盘。返回值第二项表示是否新建。
pub(crate) fn load_or_create_installation_key(path: &Path) -> anyhow::Result<(InstallationKey, bool)> {
    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read installation key failed: {}", path.display()))?;
        let key = InstallationKey::from_json(&raw)
            .with_context(|| format!("load installation key failed: {}", path.display()))?;
        return Ok((key, false));
    }

    let key = InstallationKey::generate(&new_installation_id())
        .context("generate installation key failed")?;
    write_installation_key(path, &key)?;
    info!(
        "installation key created installation_id={} path={}",
        key.installation_id(),
        path.display()
    );
    Ok((key, true))
}

/// 持久化身份文档（pretty JSON）。
fn write_installation_key(path: &Path, key: &InstallationKey) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create key directory failed: {}", parent.display()))?;
    }
    let payload = serde_json::to_string_pretty(&key.to_document())
        .context("encode installation key failed")?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("create installation key failed: {}", path.display()))?;
    file.write_all(payload.as_bytes())
        .with_context(|| format!("write installation key failed: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::load_or_create_installation_key;

    #[test]
    fn creates_then_reloads_same_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("installation_key.json");

        let (created, was_created) = load_or_create_installation_key(&path).expect("create");
        assert!(was_created);
        assert!(path.exists());

        let (loaded, was_created) = load_or_create_installation_key(&path).expect("load");
        assert!(!was_created);
        assert_eq!(loaded.installation_id(), created.installation_id());
        assert_eq!(loaded.secret(), created.secret());

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        for field in ["installation_id", "secret", "private_key"] {
            assert!(raw.get(field).and_then(|v| v.as_str()).is_some(), "{field}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn new_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("installation_key.json");
        load_or_create_installation_key(&path).expect("create");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_is_reported_not_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("installation_key.json");
        fs::write(&path, r#"{"installation_id":"x"}"#).expect("write");

        assert!(load_or_create_installation_key(&path).is_err());
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            r#"{"installation_id":"x"}"#
        );
    }
}
