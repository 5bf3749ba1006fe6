//! Engine catalog: canonical type names, aliases and display names.

/// Engine used when a config leaves its type empty.
pub const DEFAULT_ENGINE: &str = "sqlite";

/// Engines always linked into the main binary.
pub const BUILTIN_ENGINES: &[&str] = &["sqlite"];

/// Engines hosted by `driver-agent` subprocesses.
pub const OPTIONAL_ENGINES: &[&str] = &[
    "duckdb",
    "mariadb",
    "diros",
    "sphinx",
    "sqlserver",
    "dameng",
    "kingbase",
    "highgo",
    "vastbase",
    "mongodb",
    "tdengine",
];

/// Normalize an engine type name.
///
/// Lowercases, trims, resolves aliases and maps an empty name to
/// [`DEFAULT_ENGINE`].
pub fn normalize_engine(engine: &str) -> String {
    let lowered = engine.trim().to_lowercase();
    match lowered.as_str() {
        "" => DEFAULT_ENGINE.to_string(),
        "doris" => "diros".to_string(),
        "postgresql" => "postgres".to_string(),
        "sqlite3" => "sqlite".to_string(),
        "mssql" | "sql_server" => "sqlserver".to_string(),
        "mongo" => "mongodb".to_string(),
        _ => lowered,
    }
}

/// Whether the engine is compiled into every binary.
pub fn is_builtin(engine: &str) -> bool {
    BUILTIN_ENGINES.contains(&normalize_engine(engine).as_str())
}

/// Whether the engine is known to this catalog at all.
pub fn is_known(engine: &str) -> bool {
    let normalized = normalize_engine(engine);
    BUILTIN_ENGINES.contains(&normalized.as_str()) || OPTIONAL_ENGINES.contains(&normalized.as_str())
}

/// Human-readable engine name used in messages and status listings.
pub fn display_name(engine: &str) -> String {
    let normalized = normalize_engine(engine);
    let name = match normalized.as_str() {
        "sqlite" => "SQLite",
        "duckdb" => "DuckDB",
        "mariadb" => "MariaDB",
        "diros" => "Doris",
        "sphinx" => "Sphinx",
        "sqlserver" => "SQL Server",
        "dameng" => "Dameng",
        "kingbase" => "Kingbase",
        "highgo" => "HighGo",
        "vastbase" => "Vastbase",
        "mongodb" => "MongoDB",
        "tdengine" => "TDengine",
        "postgres" => "PostgreSQL",
        _ => return normalized,
    };
    name.to_string()
}

/// Default TCP port, 0 for file engines.
pub fn default_port(engine: &str) -> u16 {
    match normalize_engine(engine).as_str() {
        "mariadb" => 3306,
        "diros" => 9030,
        "sphinx" => 9306,
        "sqlserver" => 1433,
        "dameng" => 5236,
        "kingbase" => 54321,
        "highgo" => 5866,
        "vastbase" => 5432,
        "postgres" => 5432,
        "mongodb" => 27017,
        "tdengine" => 6041,
        _ => 0,
    }
}
