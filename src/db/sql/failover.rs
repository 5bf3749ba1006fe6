//! Endpoint candidates and ordered multi-host failover.

use std::fmt;

use crate::config::{ConnectionConfig, SshConfig, Topology};
use crate::error::{DbError, DbResult};

/// One address a session can be opened against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host:port` for network engines, a file path for file engines.
    pub address: String,
    /// Position in the candidate list; 0 is the primary.
    pub index: usize,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, index: usize) -> Self {
        Self {
            address: address.into(),
            index,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.index == 0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    pub address: String,
    pub error: String,
}

/// Outcome of the last connect attempt of a binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectReport {
    /// Endpoint the session is bound to, if any attempt succeeded.
    pub bound: Option<Endpoint>,
    /// Failures of the attempts made before the bound one (or all of them).
    pub failures: Vec<EndpointFailure>,
}

impl ConnectReport {
    /// `addr: error; addr: error` list of failed attempts.
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.address, f.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Opens a local forward through an SSH bastion.
///
/// Implementations live outside this crate; the SQL binding only asks for a
/// local address to dial instead of the remote one.
pub trait TunnelDialer: Send + Sync {
    /// Return the local `host:port` that forwards to `target`.
    fn dial(&self, ssh: &SshConfig, target: &str) -> DbResult<String>;
}

/// Append `:port` unless the address already carries one.
pub fn with_port(host: &str, port: u16) -> String {
    let host = host.trim();
    if port == 0 || has_port(host) {
        host.to_string()
    } else if host.contains(':') && !host.starts_with('[') {
        // bare IPv6 literal
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn has_port(address: &str) -> bool {
    if let Some(rest) = address.strip_prefix('[') {
        return rest
            .split_once("]:")
            .map(|(_, port)| port.parse::<u16>().is_ok())
            .unwrap_or(false);
    }
    match address.rsplit_once(':') {
        Some((host, port)) => !host.contains(':') && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Primary host followed by `hosts`, each with a port, deduplicated in order.
pub fn candidate_addresses(config: &ConnectionConfig, default_port: u16) -> Vec<String> {
    let port = if config.port == 0 {
        default_port
    } else {
        config.port
    };

    let mut out: Vec<String> = Vec::new();
    let primary = config.host.trim();
    if !primary.is_empty() {
        out.push(with_port(primary, port));
    }
    for host in &config.hosts {
        let host = host.trim();
        if host.is_empty() {
            continue;
        }
        let address = with_port(host, port);
        if !out.contains(&address) {
            out.push(address);
        }
    }
    out
}

/// Credentials for a candidate endpoint.
///
/// Replica topologies use the replica credentials for every non-primary
/// endpoint when a replica user is configured.
pub fn credentials_for(config: &ConnectionConfig, endpoint: &Endpoint) -> Credentials {
    let use_replica = !endpoint.is_primary()
        && config.topology == Topology::Replica
        && !config.replica_user.trim().is_empty();

    if use_replica {
        Credentials {
            user: config.replica_user.clone(),
            password: config.replica_password.clone(),
        }
    } else {
        Credentials {
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

/// Try endpoints in order until one opens.
///
/// The report is returned in both outcomes so callers can see which hosts
/// failed before the bound one.
pub fn connect_in_order<S, F>(
    endpoints: &[Endpoint],
    engine: &str,
    mut open: F,
) -> (DbResult<S>, ConnectReport)
where
    F: FnMut(&Endpoint) -> DbResult<S>,
{
    let mut report = ConnectReport::default();

    if endpoints.is_empty() {
        return (
            Err(DbError::Connection(format!("{}: no address configured", engine))),
            report,
        );
    }

    for endpoint in endpoints {
        match open(endpoint) {
            Ok(session) => {
                if !report.failures.is_empty() {
                    tracing::info!(
                        engine,
                        bound = %endpoint,
                        failed = report.failures.len(),
                        "connected after failover"
                    );
                }
                report.bound = Some(endpoint.clone());
                return (Ok(session), report);
            }
            Err(e) => {
                tracing::warn!(engine, address = %endpoint, error = %e, "endpoint failed");
                report.failures.push(EndpointFailure {
                    address: endpoint.address.clone(),
                    error: e.detail(),
                });
            }
        }
    }

    let message = if report.failures.len() == 1 {
        report.failure_summary()
    } else {
        format!("all {} endpoints failed: {}", report.failures.len(), report.failure_summary())
    };
    (Err(DbError::Connection(message)), report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("db1", 3306), "db1:3306");
        assert_eq!(with_port("db1:3307", 3306), "db1:3307");
        assert_eq!(with_port("db1", 0), "db1");
        assert_eq!(with_port("::1", 5432), "[::1]:5432");
        assert_eq!(with_port("[::1]:5433", 5432), "[::1]:5433");
    }

    #[test]
    fn test_candidates_dedup_in_order() {
        let mut config = ConnectionConfig::network("mariadb", "db1", 3306, "u", "p");
        config.hosts = vec!["db2".into(), "db1:3306".into(), " ".into(), "db3:3310".into()];
        assert_eq!(
            candidate_addresses(&config, 3306),
            vec!["db1:3306", "db2:3306", "db3:3310"]
        );
    }

    #[test]
    fn test_replica_credentials_for_secondaries() {
        let mut config = ConnectionConfig::network("mongodb", "a", 27017, "main", "pw");
        config.topology = Topology::Replica;
        config.replica_user = "reader".into();
        config.replica_password = "rpw".into();

        let primary = credentials_for(&config, &Endpoint::new("a:27017", 0));
        let secondary = credentials_for(&config, &Endpoint::new("b:27017", 1));
        assert_eq!(primary.user, "main");
        assert_eq!(secondary.user, "reader");
        assert_eq!(secondary.password, "rpw");

        config.topology = Topology::Single;
        assert_eq!(credentials_for(&config, &Endpoint::new("b", 1)).user, "main");
    }

    #[test]
    fn test_failover_binds_second_endpoint() {
        let endpoints = vec![Endpoint::new("down:1", 0), Endpoint::new("up:2", 1)];
        let (result, report) = connect_in_order(&endpoints, "Test", |ep| {
            if ep.address == "down:1" {
                Err(DbError::Connection("refused".into()))
            } else {
                Ok(ep.address.clone())
            }
        });

        assert_eq!(result.unwrap(), "up:2");
        assert_eq!(report.bound, Some(Endpoint::new("up:2", 1)));
        assert_eq!(report.failure_summary(), "down:1: refused");
    }

    #[test]
    fn test_failover_total_failure_lists_all() {
        let endpoints = vec![Endpoint::new("a", 0), Endpoint::new("b", 1)];
        let (result, report) = connect_in_order::<(), _>(&endpoints, "Test", |ep| {
            Err(DbError::Connection(format!("{} down", ep.address)))
        });

        let message = result.unwrap_err().to_string();
        assert!(message.contains("all 2 endpoints failed"));
        assert!(message.contains("a: a down"));
        assert!(message.contains("b: b down"));
        assert!(report.bound.is_none());
    }
}
