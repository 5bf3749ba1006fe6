//! Connection fingerprints for cache keys.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::ConnectionConfig;
use crate::db::catalog::normalize_engine;

/// Lowercase hex SHA256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// The identity fields of a connection. The password is not one of them.
#[derive(Serialize)]
struct FingerprintFields<'a> {
    engine: String,
    user: &'a str,
    host: &'a str,
    port: u16,
    database: &'a str,
    ssh_host: &'a str,
    use_ssh: bool,
}

/// Cache key for a connection config.
///
/// Deterministic over engine type (normalized, so aliases share a bucket),
/// user, host, port, database, SSH host and the SSH flag.
pub fn fingerprint(config: &ConnectionConfig) -> String {
    let fields = FingerprintFields {
        engine: normalize_engine(&config.engine),
        user: &config.user,
        host: &config.host,
        port: config.port,
        database: &config.database,
        ssh_host: &config.ssh.host,
        use_ssh: config.use_ssh,
    };
    // a struct of strings and integers always serializes
    sha256_hex(&serde_json::to_vec(&fields).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let config = ConnectionConfig::network("mariadb", "db1", 3306, "root", "");
        let hash1 = fingerprint(&config);
        let hash2 = fingerprint(&config.clone());
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA256 hex = 64 chars
    }

    #[test]
    fn test_fingerprint_ignores_password() {
        let a = ConnectionConfig::network("mariadb", "db1", 3306, "root", "one");
        let b = ConnectionConfig::network("mariadb", "db1", 3306, "root", "two");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_tracks_identity_fields() {
        let base = ConnectionConfig::network("mariadb", "db1", 3306, "root", "");
        let mut other = base.clone();
        other.database = "sales".into();
        assert_ne!(fingerprint(&base), fingerprint(&other));

        let mut tunneled = base.clone();
        tunneled.use_ssh = true;
        assert_ne!(fingerprint(&base), fingerprint(&tunneled));
    }
}
