use serde::{Deserialize, Serialize};

/// PostgreSQL connection config from task YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

impl PgConfig {
    /// Problems that make the config unusable, all at once.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.host.trim().is_empty() {
            problems.push("destination.host must not be empty".to_string());
        }
        if self.user.trim().is_empty() {
            problems.push("destination.user must not be empty".to_string());
        }
        if self.database.trim().is_empty() {
            problems.push("destination.database must not be empty".to_string());
        }
        if self.schema.trim().is_empty() {
            problems.push("destination.schema must not be empty".to_string());
        }
        if self.port == 0 {
            problems.push("destination.port must be greater than 0".to_string());
        }
        problems
    }

    /// `host:port/database`, for logs. Never includes the password.
    #[must_use]
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_port_and_schema() {
        let config: PgConfig =
            serde_yaml::from_str("host: localhost\nuser: loader\ndatabase: market\n").unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.schema, "public");
        assert!(config.password.is_empty());
        assert!(config.problems().is_empty());
        assert_eq!(config.display_target(), "localhost:5432/market");
    }

    #[test]
    fn reports_every_problem() {
        let config = PgConfig {
            host: String::new(),
            port: 0,
            user: "u".into(),
            password: String::new(),
            database: " ".into(),
            schema: "public".into(),
        };
        assert_eq!(config.problems().len(), 3);
    }
}
