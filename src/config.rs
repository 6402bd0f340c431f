use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::logic::QuerySettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub repository: RepositoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL of the index; without one the index is kept in memory
    pub connection_string: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Root directory of the file store
    pub root: PathBuf,
    /// Public URL prefix under which the file tree is served
    pub url_root: String,
    /// Shared secret required by mutating endpoints
    pub api_key: Option<String>,
    pub max_page_limit: usize,
    pub default_page_limit: usize,
    /// Problem classes to serve; all built-in classes when unset
    pub problems: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            max_connections: 20,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./REPOSITORY"),
            url_root: "/files".to_string(),
            api_key: None,
            max_page_limit: 1000,
            default_page_limit: 100,
            problems: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file and
    /// `IRB_`-prefixed environment variables, in increasing precedence.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        // IRB_REPOSITORY__API_KEY, IRB_SERVER__PORT, ...
        config = config.add_source(
            config::Environment::with_prefix("IRB")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("repository.problems")
                .try_parsing(true),
        );

        let config = config.build()?;
        let mut app_config: AppConfig = config.try_deserialize()?;

        if app_config.repository.api_key.is_none() {
            app_config.repository.api_key = std::env::var("IRB_API_KEY").ok().filter(|k| !k.is_empty());
        }
        app_config.validate()?;

        Ok(app_config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.repository.max_page_limit == 0 {
            anyhow::bail!("repository.max_page_limit must be positive");
        }
        if self.repository.default_page_limit > self.repository.max_page_limit {
            anyhow::bail!(
                "repository.default_page_limit ({}) exceeds repository.max_page_limit ({})",
                self.repository.default_page_limit,
                self.repository.max_page_limit
            );
        }
        Ok(())
    }

    /// Get the database URL from config or environment, if any
    pub fn database_url(&self) -> Option<String> {
        if let Some(connection_string) = &self.database.connection_string {
            return Some(connection_string.clone());
        }

        // Fall back to environment variable
        std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty())
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings {
            url_root: self.repository.url_root.clone(),
            default_page_limit: self.repository.default_page_limit,
            max_page_limit: self.repository.max_page_limit,
        }
    }
}
