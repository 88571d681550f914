//! Sink database connection pool and migrations

use saleflow_common::env;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{EtlError, EtlResult};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PORT: u16 = 5432;

/// Connection settings, either a full URL or its `POSTGRES_*` parts
#[derive(Clone, Default)]
pub struct DbConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl_mode: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl DbConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            ..Default::default()
        }
    }

    pub fn from_env() -> EtlResult<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL"),
            host: env::var("POSTGRES_HOST"),
            port: env::parse_or("POSTGRES_PORT", DEFAULT_PORT)?,
            user: env::var("POSTGRES_USER"),
            password: env::var("POSTGRES_PASSWORD"),
            database: env::var("POSTGRES_DB"),
            ssl_mode: env::var("POSTGRES_SSLMODE"),
            max_connections: env::parse_or("DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            connect_timeout_secs: env::parse_or("DB_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        })
    }

    pub fn validate(&self) -> EtlResult<()> {
        self.connect_options()?;

        if self.max_connections == 0 {
            return Err(EtlError::config("DB_MAX_CONNECTIONS must be greater than 0"));
        }

        Ok(())
    }

    /// Build connect options. `DATABASE_URL` wins over the individual parts.
    pub fn connect_options(&self) -> EtlResult<PgConnectOptions> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| EtlError::config(format!("DATABASE_URL is invalid: {e}")));
        }

        let (Some(host), Some(user), Some(database)) = (&self.host, &self.user, &self.database)
        else {
            return Err(EtlError::config(
                "DATABASE_URL or POSTGRES_HOST, POSTGRES_USER and POSTGRES_DB must be set",
            ));
        };

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(self.port)
            .username(user)
            .database(database);

        if let Some(password) = &self.password {
            options = options.password(password);
        }

        if let Some(mode) = &self.ssl_mode {
            let mode = PgSslMode::from_str(mode)
                .map_err(|e| EtlError::config(format!("POSTGRES_SSLMODE is invalid: {e}")))?;
            options = options.ssl_mode(mode);
        }

        Ok(options)
    }
}

/// Build the pool without connecting. The first query opens a connection,
/// so an unreachable database surfaces inside the job that needs it.
pub fn create_pool(config: &DbConfig) -> EtlResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_lazy_with(config.connect_options()?);

    info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Apply the bundled DDL
pub async fn run_migrations(pool: &PgPool) -> EtlResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}
