//! PostgreSQL event source.

use std::time::Duration;

use alerts_core::config::DatabaseConfig;
use alerts_core::error::{AlertsError, Result};
use alerts_core::traits::EventSource;
use alerts_core::types::{Event, EventFilter};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row};
use tokio::sync::Mutex;

use crate::query::{PreparedQuery, QueryParam, load_sql_query, rewrite_named_params};
use crate::tunnel::SshTunnel;

/// Columns consumed by [`Event`] itself rather than carried as extras.
const ID_COLUMN: &str = "id";
const CREATED_COLUMN: &str = "created_at";
const NAME_COLUMNS: [&str; 2] = ["event_name", "name"];

pub struct PostgresEventSource {
    pool: PgPool,
    query: PreparedQuery,
    type_name_query: Option<PreparedQuery>,
    config: DatabaseConfig,
    tunnel: Option<Mutex<SshTunnel>>,
    tz: Tz,
}

impl PostgresEventSource {
    /// Load the query file, open the tunnel if configured, and set up a lazy pool.
    ///
    /// No database round trip happens here; the first fetch connects.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let sql = load_sql_query(&config.query_path())?;
        let query = rewrite_named_params(&sql);
        query.bind_values(&EventFilter::default())?;
        tracing::debug!(params = ?query.params, "loaded query {}", config.query_file);
        let type_name_query = load_type_name_query(config);

        let tunnel = if config.ssh.enabled {
            Some(SshTunnel::open(&config.ssh, &config.host, config.port, config.ssh.local_port).await?)
        } else {
            None
        };
        let (host, port) = match &tunnel {
            Some(t) => ("127.0.0.1".to_string(), t.local_port()),
            None => (config.host.clone(), config.port),
        };

        let options = PgConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy_with(options);

        Ok(Self {
            pool,
            query,
            type_name_query,
            config: config.clone(),
            tunnel: tunnel.map(Mutex::new),
            tz: Tz::UTC,
        })
    }

    /// Zone used to render timestamp columns carried as extra fields.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// Restart the ssh child on the same local port if it has died.
    async fn ensure_tunnel(&self) -> Result<()> {
        let Some(tunnel) = &self.tunnel else {
            return Ok(());
        };
        let mut guard = tunnel.lock().await;
        if guard.is_alive() {
            return Ok(());
        }
        tracing::warn!("SSH tunnel process exited, reopening");
        let port = guard.local_port();
        *guard = SshTunnel::open(&self.config.ssh, &self.config.host, self.config.port, port).await?;
        Ok(())
    }

    /// Display name of the configured event type, when the lookup query is set
    /// and returns a non-empty name.
    pub async fn fetch_type_name(&self, filter: &EventFilter) -> Result<Option<String>> {
        let Some(prepared) = &self.type_name_query else {
            return Ok(None);
        };
        self.ensure_tunnel().await?;

        let mut query = sqlx::query(&prepared.sql);
        for value in prepared.bind_values(filter)? {
            query = bind_param(query, value);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AlertsError::source(format!("type name query failed: {e}")))?;

        Ok(row.and_then(|row| type_name_from_row(&row)))
    }

    /// `SELECT 1` through the pool.
    pub async fn check_connection(&self) -> Result<()> {
        self.ensure_tunnel().await?;
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AlertsError::source(format!("database check failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for PostgresEventSource {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn fetch_candidates(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        self.ensure_tunnel().await?;

        let values = self.query.bind_values(filter)?;
        tracing::info!(
            "Executing query: type_id={}, name_filter='{}', name_excluded='{}', lookback_days={}",
            filter.type_id,
            filter.name_filter_pattern(),
            filter.name_excluded_pattern(),
            filter.lookback_days
        );

        let mut query = sqlx::query(&self.query.sql);
        for value in values {
            query = bind_param(query, value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AlertsError::source(format!("query failed: {e}")))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_event(row, self.tz) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("skipping row: {e}"),
            }
        }
        Ok(events)
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_param(query: PgQuery<'_>, value: QueryParam) -> PgQuery<'_> {
    match value {
        QueryParam::BigInt(v) => query.bind(v),
        QueryParam::NullableBigInt(v) => query.bind(v),
        QueryParam::Int(v) => query.bind(v),
        QueryParam::Text(v) => query.bind(v),
    }
}

/// The optional type-name query; problems disable the lookup instead of failing startup.
fn load_type_name_query(config: &DatabaseConfig) -> Option<PreparedQuery> {
    let path = config.type_name_query_path()?;
    let prepared = match load_sql_query(&path) {
        Ok(sql) => rewrite_named_params(&sql),
        Err(e) => {
            tracing::warn!("event type name lookup disabled: {e}");
            return None;
        }
    };
    if let Err(e) = prepared.bind_values(&EventFilter::default()) {
        tracing::warn!("event type name lookup disabled: {e}");
        return None;
    }
    Some(prepared)
}

/// Name from a `name`/`event_name` column, else the last column.
fn type_name_from_row(row: &PgRow) -> Option<String> {
    let columns = row.columns();
    let idx = NAME_COLUMNS
        .iter()
        .find_map(|c| columns.iter().find(|col| col.name() == *c))
        .map(|col| col.ordinal())
        .or_else(|| columns.len().checked_sub(1))?;
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn row_to_event(row: &PgRow, tz: Tz) -> Result<Event> {
    let id = if let Ok(v) = row.try_get::<i64, _>(ID_COLUMN) {
        v.to_string()
    } else if let Ok(v) = row.try_get::<i32, _>(ID_COLUMN) {
        v.to_string()
    } else {
        row.try_get::<String, _>(ID_COLUMN)
            .map_err(|e| AlertsError::source(format!("row has no usable '{ID_COLUMN}': {e}")))?
    };

    let name_column = NAME_COLUMNS
        .iter()
        .copied()
        .find(|c| row.columns().iter().any(|col| col.name() == *c))
        .ok_or_else(|| AlertsError::source("row has neither 'event_name' nor 'name'"))?;
    let name: String = row
        .try_get::<Option<String>, _>(name_column)
        .map_err(|e| AlertsError::source(format!("bad '{name_column}' for event {id}: {e}")))?
        .unwrap_or_default();

    let created_at = if let Ok(ts) = row.try_get::<DateTime<Utc>, _>(CREATED_COLUMN) {
        ts
    } else {
        row.try_get::<NaiveDateTime, _>(CREATED_COLUMN)
            .map(|naive| naive.and_utc())
            .map_err(|e| AlertsError::source(format!("bad '{CREATED_COLUMN}' for event {id}: {e}")))?
    };

    let mut event = Event::new(id, name, created_at);
    for column in row.columns() {
        let col = column.name();
        if col == ID_COLUMN || col == CREATED_COLUMN || col == name_column {
            continue;
        }
        event = event.with_field(col, display_value(row, column.ordinal(), tz));
    }
    Ok(event)
}

/// Best-effort text for an extra column; NULL renders as empty.
fn display_value(row: &PgRow, idx: usize, tz: Tz) -> String {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return v
            .map(|v| v.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string())
            .unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return v.map(|v| v.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> DatabaseConfig {
        DatabaseConfig {
            host: "127.0.0.1".into(),
            name: "events".into(),
            user: "reader".into(),
            queries_dir: dir.display().to_string(),
            query_file: "EventHotWork.sql".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_is_lazy_and_prepares_query() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("EventHotWork.sql"),
            "SELECT id, event_name, created_at FROM events WHERE type_id = :type_id AND created_at >= NOW() - make_interval(days => :lookback_days)",
        )
        .unwrap();

        let source = PostgresEventSource::connect(&config(dir.path())).await.unwrap();
        assert_eq!(source.query.params, vec!["type_id", "lookback_days"]);
        assert!(source.type_name_query.is_none());
        assert!(source.query.sql.contains("type_id = $1"));
        assert_eq!(source.name(), "postgres");
    }

    #[tokio::test]
    async fn test_unknown_parameter_fails_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("EventHotWork.sql"), "SELECT 1 WHERE x = :vessel").unwrap();
        assert!(matches!(
            PostgresEventSource::connect(&config(dir.path())).await,
            Err(AlertsError::ConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_query_file_fails_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PostgresEventSource::connect(&config(dir.path())).await,
            Err(AlertsError::ConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_type_name_query_is_prepared_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("EventHotWork.sql"), "SELECT 1 WHERE 1 = :type_id").unwrap();
        std::fs::write(
            dir.path().join("get_events_name.sql"),
            "SELECT id, name FROM event_types WHERE id = :type_id",
        )
        .unwrap();

        let source = PostgresEventSource::connect(&config(dir.path())).await.unwrap();
        let prepared = source.type_name_query.as_ref().unwrap();
        assert_eq!(prepared.sql, "SELECT id, name FROM event_types WHERE id = $1");
        assert_eq!(prepared.params, vec!["type_id"]);
    }

    #[tokio::test]
    async fn test_bad_type_name_query_disables_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("EventHotWork.sql"), "SELECT 1 WHERE 1 = :type_id").unwrap();
        std::fs::write(dir.path().join("get_events_name.sql"), "SELECT :nope").unwrap();

        let source = PostgresEventSource::connect(&config(dir.path())).await.unwrap();
        assert!(source.type_name_query.is_none());
        assert_eq!(source.fetch_type_name(&EventFilter::default()).await.unwrap(), None);
    }
}
