//! The host key provider (spec.md §6): yields a private signing key for the
//! SSH server, generating one on first use and persisting it with
//! owner-only permissions.

use std::path::{Path, PathBuf};

use russh::keys::{load_secret_key, ssh_key, Algorithm, PrivateKey};

const DEFAULT_HOST_KEY_PATH: &str = "/data/ssh_host_ed25519_key";

fn path_from_env() -> PathBuf {
    std::env::var("HOST_KEY_PATH")
        .unwrap_or_else(|_| DEFAULT_HOST_KEY_PATH.to_string())
        .into()
}

/// Loads the host key at `HOST_KEY_PATH`, generating and persisting a fresh
/// Ed25519 key if none exists yet.
pub fn load_or_create() -> std::io::Result<PrivateKey> {
    let path = path_from_env();
    if path.exists() {
        return load_secret_key(&path, None)
            .map_err(|e| std::io::Error::other(format!("failed to load host key: {e}")));
    }

    let key = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)
        .map_err(|e| std::io::Error::other(format!("failed to generate host key: {e}")))?;
    write_key(&path, &key)?;
    Ok(key)
}

fn write_key(path: &Path, key: &PrivateKey) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let pem = key
        .to_openssh(ssh_key::LineEnding::LF)
        .map_err(|e| std::io::Error::other(format!("failed to encode host key: {e}")))?;
    std::fs::write(path, pem.as_str())?;
    set_owner_only(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host_key");
        // SAFETY: tests in this module run single-threaded with respect to
        // this env var; no other test reads HOST_KEY_PATH.
        unsafe { std::env::set_var("HOST_KEY_PATH", &path) };

        let key1 = load_or_create().unwrap();
        assert!(path.exists());
        let key2 = load_or_create().unwrap();
        assert_eq!(
            key1.public_key().to_bytes().unwrap(),
            key2.public_key().to_bytes().unwrap()
        );

        unsafe { std::env::remove_var("HOST_KEY_PATH") };
    }
}
