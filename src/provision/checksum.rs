//! Package hashing and checksum policy enforcement.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use super::definitions::ChecksumPolicy;
use super::error::{ProvisionError, ProvisionResult};

/// Streaming SHA256 of a file, lowercase hex.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Apply `policy` to a package at `path` whose hash is `actual`.
///
/// No expected checksum means nothing to compare. Under `strict` a
/// mismatched file is deleted.
pub async fn enforce(
    policy: ChecksumPolicy,
    engine: &str,
    expected: &str,
    actual: &str,
    path: &Path,
) -> ProvisionResult<()> {
    let expected = expected.trim();
    if policy == ChecksumPolicy::Off || expected.is_empty() || expected.eq_ignore_ascii_case(actual) {
        return Ok(());
    }

    match policy {
        ChecksumPolicy::Strict => {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::debug!(path = %path.display(), error = %e, "could not remove rejected package");
            }
            Err(ProvisionError::Checksum {
                engine: engine.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
        _ => {
            tracing::warn!(
                engine,
                expected,
                actual,
                "driver package checksum mismatch, continuing under warn policy"
            );
            Ok(())
        }
    }
}
