//! InfluxDB implementation of [`TimeSeriesBackend`] over the v2 HTTP API.
//!
//! InfluxDB 1.8 serves the same write/query/health endpoints; credentials are
//! then passed as a `user:password` token (see [`InfluxSettings::auth_token`])
//! and the database is created through the 1.x `/query` endpoint on connect.
use async_trait::async_trait;
use futures::stream;
use influxdb2::Client;
use influxdb2::models::{DataPoint, Query};
use influxdb2_structmap::value::Value;
use serde::Deserialize;
use tracing::{debug, info};

use super::{FieldValue, Point, TimeSeriesBackend};
use crate::config::InfluxSettings;
use crate::error::BackendError;

pub struct InfluxBackend {
    client: Client,
    bucket: String,
    v1: Option<V1Admin>,
}

/// 1.x `/query` access used to create the database on startup.
struct V1Admin {
    http: reqwest::Client,
    query_url: String,
    user: String,
    password: String,
    database: String,
}

#[derive(Deserialize, Debug, Default)]
struct V1QueryResponse {
    #[serde(default)]
    results: Vec<V1StatementResult>,
    error: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct V1StatementResult {
    error: Option<String>,
}

impl InfluxBackend {
    pub fn new(settings: &InfluxSettings) -> Self {
        let v1 = settings.v1_credentials().map(|(user, password)| V1Admin {
            http: reqwest::Client::new(),
            query_url: format!("{}/query", settings.url.trim_end_matches('/')),
            user: user.to_string(),
            password: password.to_string(),
            database: settings.database().to_string(),
        });
        Self {
            client: Client::new(settings.url.clone(), settings.org.clone(), settings.auth_token()),
            bucket: settings.bucket.clone(),
            v1,
        }
    }

    /// Builds the client, checks `/health` and, against InfluxDB 1.8, makes
    /// sure the target database exists.
    pub async fn connect(settings: &InfluxSettings) -> Result<Self, BackendError> {
        let backend = Self::new(settings);
        backend.health().await?;
        backend.ensure_database().await?;
        Ok(backend)
    }

    /// Issues `CREATE DATABASE` in 1.8 mode; a no-op for InfluxDB 2.x.
    ///
    /// The statement is idempotent, so an existing database is left as is.
    pub async fn ensure_database(&self) -> Result<(), BackendError> {
        let Some(admin) = &self.v1 else {
            return Ok(());
        };
        let statement = create_database_statement(&admin.database);
        let response = admin
            .http
            .post(&admin.query_url)
            .basic_auth(&admin.user, Some(&admin.password))
            .form(&[("q", statement.as_str())])
            .send()
            .await
            .map_err(|e| BackendError::Connectivity(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Connectivity(e.to_string()))?;
        if !status.is_success() {
            return Err(BackendError::Connectivity(format!(
                "{statement} returned {status}: {}",
                body.trim()
            )));
        }
        if let Some(reason) = query_error(&body) {
            return Err(BackendError::Connectivity(format!("{statement} failed: {reason}")));
        }
        info!(database = %admin.database, "InfluxDB 1.8 database ready.");
        Ok(())
    }

    fn count_query(&self) -> String {
        format!(
            r#"from(bucket: "{bucket}")
  |> range(start: 0)
  |> filter(fn: (r) => r._measurement == "{measurement}" and r._field == "download")
  |> group()
  |> count()"#,
            bucket = self.bucket,
            measurement = super::point::MEASUREMENT,
        )
    }
}

fn create_database_statement(database: &str) -> String {
    format!("CREATE DATABASE \"{}\"", database.replace('\\', "\\\\").replace('"', "\\\""))
}

/// First error reported in a 1.x `/query` response body, if any.
fn query_error(body: &str) -> Option<String> {
    let response: V1QueryResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => return Some(format!("unparsable response: {e}")),
    };
    response
        .error
        .or_else(|| response.results.into_iter().find_map(|r| r.error))
}

fn to_data_point(point: Point) -> Result<DataPoint, BackendError> {
    let mut builder = DataPoint::builder(point.measurement);
    for (key, value) in point.tags {
        builder = builder.tag(key, value);
    }
    for (key, value) in point.fields {
        builder = match value {
            FieldValue::Float(v) => builder.field(key, v),
            FieldValue::Integer(v) => builder.field(key, v),
            FieldValue::Text(v) => builder.field(key, v),
        };
    }
    let nanos = point.timestamp.timestamp_nanos_opt().ok_or_else(|| {
        BackendError::InvalidPoint(format!("timestamp out of range: {}", point.timestamp))
    })?;
    builder
        .timestamp(nanos)
        .build()
        .map_err(|e| BackendError::InvalidPoint(e.to_string()))
}

#[async_trait]
impl TimeSeriesBackend for InfluxBackend {
    async fn health(&self) -> Result<(), BackendError> {
        let health = self
            .client
            .health()
            .await
            .map_err(|e| BackendError::Connectivity(e.to_string()))?;
        info!(
            status = ?health.status,
            version = ?health.version,
            "InfluxDB connection established."
        );
        Ok(())
    }

    async fn write_points(&self, points: Vec<Point>) -> Result<(), BackendError> {
        let count = points.len();
        let data_points = points
            .into_iter()
            .map(to_data_point)
            .collect::<Result<Vec<_>, _>>()?;
        self.client
            .write(&self.bucket, stream::iter(data_points))
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        debug!(bucket = %self.bucket, count, "Points written to InfluxDB.");
        Ok(())
    }

    async fn count_records(&self) -> Result<u64, BackendError> {
        let records = self
            .client
            .query_raw(Some(Query::new(self.count_query())))
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let Some(record) = records.first() else {
            return Ok(0);
        };
        match record.values.get("_value") {
            Some(Value::Long(count)) => Ok((*count).max(0) as u64),
            Some(Value::UnsignedLong(count)) => Ok(*count),
            other => Err(BackendError::UnexpectedResponse(format!(
                "count() returned {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::offline_record;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_offline_point_converts() {
        let record = offline_record(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(to_data_point(Point::from(&record)).is_ok());
    }

    fn settings(user: Option<&str>, password: Option<&str>) -> InfluxSettings {
        InfluxSettings {
            url: "http://localhost:8086/".to_string(),
            token: "token".to_string(),
            org: "speedtest".to_string(),
            bucket: "speedtest/autogen".to_string(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn test_database_bootstrap_only_in_v1_mode() {
        assert!(InfluxBackend::new(&settings(None, None)).v1.is_none());
        assert!(InfluxBackend::new(&settings(Some("admin"), None)).v1.is_none());

        let backend = InfluxBackend::new(&settings(Some("admin"), Some("secret")));
        let admin = backend.v1.as_ref().unwrap();
        assert_eq!(admin.query_url, "http://localhost:8086/query");
        assert_eq!(admin.database, "speedtest");
    }

    #[tokio::test]
    async fn test_ensure_database_is_noop_for_v2() {
        let backend = InfluxBackend::new(&settings(None, None));
        assert!(backend.ensure_database().await.is_ok());
    }

    #[test]
    fn test_create_database_statement_quotes_name() {
        assert_eq!(create_database_statement("speedtest"), r#"CREATE DATABASE "speedtest""#);
        assert_eq!(create_database_statement(r#"a"b"#), r#"CREATE DATABASE "a\"b""#);
    }

    #[test]
    fn test_query_error_extraction() {
        assert_eq!(query_error(r#"{"results":[{"statement_id":0}]}"#), None);
        assert_eq!(
            query_error(r#"{"results":[{"statement_id":0,"error":"unauthorized"}]}"#),
            Some("unauthorized".to_string())
        );
        assert_eq!(
            query_error(r#"{"error":"authorization failed"}"#),
            Some("authorization failed".to_string())
        );
        assert!(query_error("<html>").is_some());
    }

    #[test]
    fn test_count_query_targets_bucket() {
        let backend = InfluxBackend::new(&InfluxSettings {
            url: "http://localhost:8086".to_string(),
            token: "token".to_string(),
            org: "speedtest".to_string(),
            bucket: "history".to_string(),
            user: None,
            password: None,
        });
        let query = backend.count_query();
        assert!(query.starts_with(r#"from(bucket: "history")"#));
        assert!(query.contains(r#"r._measurement == "speedtest""#));
    }
}
