//! Data tier definition

use serde::{Deserialize, Serialize};

/// Managed relational database engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbEngine {
    #[default]
    Postgres,
    Mysql,
    Mariadb,
}

impl DbEngine {
    pub fn default_port(&self) -> u16 {
        match self {
            DbEngine::Postgres => 5432,
            DbEngine::Mysql | DbEngine::Mariadb => 3306,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::Postgres => "postgres",
            DbEngine::Mysql => "mysql",
            DbEngine::Mariadb => "mariadb",
        }
    }
}

impl std::str::FromStr for DbEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" | "postgresql" => Ok(DbEngine::Postgres),
            "mysql" => Ok(DbEngine::Mysql),
            "mariadb" => Ok(DbEngine::Mariadb),
            other => Err(format!(
                "unknown database engine '{}' (expected postgres, mysql or mariadb)",
                other
            )),
        }
    }
}

impl std::fmt::Display for DbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Managed database placed in the private subnets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTierSpec {
    pub engine: DbEngine,
    #[serde(default)]
    pub engine_version: Option<String>,
    /// Instance class (e.g. "db.t3.micro")
    pub class: String,
    /// Listener port; the engine default when unset
    #[serde(default)]
    pub port: Option<u16>,
    /// Synchronous standby in the second zone
    #[serde(default)]
    pub multi_zone: bool,
    /// Allocated storage in GiB
    pub storage_gb: u32,
    /// Storage autoscaling ceiling in GiB
    #[serde(default)]
    pub max_storage_gb: Option<u32>,
    pub backup_retention_days: u32,
    #[serde(default)]
    pub deletion_protection: bool,
    /// Initial database name
    #[serde(default)]
    pub database_name: Option<String>,
}

impl Default for DataTierSpec {
    fn default() -> Self {
        Self {
            engine: DbEngine::Postgres,
            engine_version: None,
            class: "db.t3.micro".to_string(),
            port: None,
            multi_zone: false,
            storage_gb: 20,
            max_storage_gb: None,
            backup_retention_days: 7,
            deletion_protection: false,
            database_name: None,
        }
    }
}

impl DataTierSpec {
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }
}
