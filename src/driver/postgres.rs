//! `PostgreSQL` Driver over `tokio-postgres`
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver) on a current-thread runtime owned by
//!   the driver; every call blocks on it, so callers stay synchronous
//! - Queries go through the simple query protocol, which returns every value
//!   in text output form regardless of its type
//! - Column types come from preparing the query ([`Driver::describe`])
//! - `COPY ... FROM stdin` blocks are streamed through `copy_in`
//! - No TLS (`NoTls`), matching local and tunnelled restore targets

use bytes::Bytes;
use futures::SinkExt;
use tokio::runtime::Runtime;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

use super::{split_copy_block, version_from_num, ConnectionConfig, Driver, FieldInfo, RecordSet};
use crate::error::{FerryError, Result};

/// Blocking `PostgreSQL` session
pub struct PostgresDriver {
    runtime: Runtime,
    client: Client,
    version: f64,
    user: String,
    superuser: bool,
}

impl PostgresDriver {
    /// Connect and read the server version and session role
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let pg_config = build_pg_config(config)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FerryError::connection_failed(format!("Failed to start runtime: {e}")))?;

        let client = runtime.block_on(async {
            let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
                FerryError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
            })?;

            // Note: Connection errors are not logged to prevent credential leakage
            tokio::spawn(async move {
                let _ = connection.await;
            });

            Ok::<_, FerryError>(client)
        })?;

        let mut driver = Self { runtime, client, version: 0.0, user: String::new(), superuser: false };

        let set = driver.select_set("SHOW server_version_num")?;
        let num = set.first().and_then(|row| row.int("server_version_num")).ok_or_else(|| {
            FerryError::connection_failed("Server did not report server_version_num")
        })?;
        driver.version = version_from_num(num);

        let set = driver.select_set(
            "SELECT current_user AS usename, r.rolsuper FROM pg_catalog.pg_roles r WHERE r.rolname = current_user",
        )?;
        if let Some(row) = set.first() {
            driver.user = row.text("usename").to_string();
            driver.superuser = row.flag("rolsuper");
        }

        tracing::debug!(version = driver.version, user = %driver.user, "connected");
        Ok(driver)
    }

    fn copy_in(&mut self, command: &str, data: &str) -> Result<()> {
        let client = &self.client;
        let payload = Bytes::copy_from_slice(data.as_bytes());

        self.runtime.block_on(async move {
            let sink = client.copy_in::<str, Bytes>(command).await?;
            tokio::pin!(sink);
            if !payload.is_empty() {
                sink.send(payload).await?;
            }
            sink.finish().await?;
            Ok::<_, tokio_postgres::Error>(())
        })
        .map_err(|e| FerryError::driver(command, server_message(&e)))
    }
}

impl Driver for PostgresDriver {
    fn execute(&mut self, sql: &str) -> Result<()> {
        if let Some((command, data)) = split_copy_block(sql) {
            return self.copy_in(command, data);
        }

        self.runtime
            .block_on(self.client.batch_execute(sql))
            .map_err(|e| FerryError::driver(sql, server_message(&e)))
    }

    fn select_set(&mut self, sql: &str) -> Result<RecordSet> {
        let messages = self
            .runtime
            .block_on(self.client.simple_query(sql))
            .map_err(|e| FerryError::driver(sql, server_message(&e)))?;

        let mut fields: Vec<FieldInfo> = Vec::new();
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if fields.is_empty() {
                    fields = row.columns().iter().map(|c| FieldInfo::new(c.name(), "")).collect();
                }
                rows.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
        }

        Ok(RecordSet::new(fields, rows))
    }

    fn describe(&mut self, sql: &str) -> Result<Vec<FieldInfo>> {
        let statement = self
            .runtime
            .block_on(self.client.prepare(sql))
            .map_err(|e| FerryError::driver(sql, server_message(&e)))?;

        Ok(statement
            .columns()
            .iter()
            .map(|c| FieldInfo::new(c.name(), c.type_().name()))
            .collect())
    }

    fn server_version(&self) -> f64 {
        self.version
    }

    fn current_user(&self) -> &str {
        &self.user
    }

    fn is_superuser(&self) -> bool {
        self.superuser
    }
}

/// Prefer the server's own message over the client's wrapper text
fn server_message(err: &tokio_postgres::Error) -> String {
    err.as_db_error().map_or_else(|| err.to_string(), |db| db.message().to_string())
}

/// Build `PostgreSQL` connection config from `ConnectionConfig`
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| FerryError::invalid_input("PostgreSQL requires 'host' parameter"))?;

    let port = config
        .port
        .ok_or_else(|| FerryError::invalid_input("PostgreSQL requires 'port' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| FerryError::invalid_input("PostgreSQL requires 'user' parameter"))?;

    let database = config
        .database
        .as_ref()
        .ok_or_else(|| FerryError::invalid_input("PostgreSQL requires 'database' parameter"))?;

    let mut pg_config = Config::new();
    pg_config.host(host).port(port).user(user).dbname(database).application_name("pgferry");
    if let Some(password) = &config.password {
        pg_config.password(password);
    }

    Ok(pg_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: Tests marked #[ignore] require a running PostgreSQL instance
    // cargo test -- --ignored

    #[test]
    fn test_build_config() {
        let config = ConnectionConfig::postgres("localhost", 5432, "postgres", "postgres", "app");
        let result = build_pg_config(&config);
        assert!(result.is_ok(), "Failed to build Postgres config: {:?}", result.err());
    }

    #[test]
    fn test_password_is_optional() {
        let config = ConnectionConfig { password: None, ..ConnectionConfig::postgres("h", 5432, "u", "", "d") };
        assert!(build_pg_config(&config).is_ok());
    }

    #[test]
    fn test_missing_database_error() {
        let config = ConnectionConfig { database: None, ..ConnectionConfig::postgres("h", 5432, "u", "p", "d") };
        let error = build_pg_config(&config).unwrap_err();
        assert!(error.message().contains("PostgreSQL requires 'database' parameter"));
        assert_eq!(error.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_missing_host_error() {
        let config = ConnectionConfig { host: None, ..ConnectionConfig::postgres("h", 5432, "u", "p", "d") };
        let error = build_pg_config(&config).unwrap_err();
        assert!(error.message().contains("'host'"));
    }

    #[test]
    #[ignore = "Requires running PostgreSQL instance"]
    fn test_connect_and_copy_roundtrip() {
        let config = ConnectionConfig::postgres("localhost", 5432, "postgres", "postgres", "postgres");
        let mut driver = PostgresDriver::connect(&config).unwrap();
        assert!(driver.server_version() >= 9.0);

        driver.execute("CREATE TEMP TABLE ferry_copy (id int, note text)").unwrap();
        driver.execute("COPY ferry_copy (id, note) FROM stdin;\n1\tone\n2\t\\N\n\\.\n").unwrap();

        let set = driver.select_set("SELECT id, note FROM ferry_copy ORDER BY id").unwrap();
        assert_eq!(set.len(), 2);
        let fields = driver.describe("SELECT id, note FROM ferry_copy").unwrap();
        assert_eq!(fields[0].type_name, "int4");
    }
}
