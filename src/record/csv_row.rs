//! Adapter for rows of the historical CSV export.
use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

use super::{EndpointInfo, MeasurementRecord, RawReading, split_server_location};
use crate::error::ParseError;

const NOT_AVAILABLE: &str = "N/A";
const DEFAULT_EXPORTER_OFFSET_SECS: i32 = 8 * 3600;
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub const COL_TIME: &str = "Time";
pub const COL_DOWNLOAD: &str = "Download";
pub const COL_UPLOAD: &str = "Upload";
pub const COL_LATENCY: &str = "Latency";
pub const COL_JITTER: &str = "Jitter";
pub const COL_PACKET_LOSS: &str = "Packet_loss";
pub const COL_DOWNLOAD_BYTES: &str = "Download_bytes";
pub const COL_UPLOAD_BYTES: &str = "Upload_bytes";
pub const COL_ISP: &str = "ISP";
pub const COL_SERVER_NAME: &str = "Server_name";
pub const COL_SERVER_ID: &str = "Server_id";
pub const COL_IP: &str = "IP";
pub const COL_SHARE_URL: &str = "Share_url";

/// Values the export itself does not carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDefaults {
    pub server_country: String,
    /// Offset the exporter wrote its local timestamps in.
    pub exporter_offset: FixedOffset,
}

impl Default for ImportDefaults {
    fn default() -> Self {
        Self {
            server_country: "Malaysia".to_string(),
            exporter_offset: FixedOffset::east_opt(DEFAULT_EXPORTER_OFFSET_SECS)
                .unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// One CSV row keyed by header name.
#[derive(Debug, Clone, Default)]
pub struct CsvRow {
    columns: HashMap<String, String>,
}

impl CsvRow {
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (k.into().trim().to_string(), v.into()))
                .collect(),
        }
    }

    fn get(&self, column: &'static str) -> Result<&str, ParseError> {
        self.columns
            .get(column)
            .map(|v| v.trim())
            .ok_or(ParseError::MissingColumn(column))
    }

    fn text(&self, column: &'static str) -> Result<String, ParseError> {
        Ok(self.get(column)?.trim_matches('"').to_string())
    }

    fn text_or(&self, column: &'static str, fallback: &str) -> Result<String, ParseError> {
        let value = self.text(column)?;
        if value.is_empty() {
            return Ok(fallback.to_string());
        }
        Ok(value)
    }

    /// Float column where `N/A` and an empty cell mean "not available".
    fn optional_float(&self, column: &'static str) -> Result<Option<f64>, ParseError> {
        let value = self.get(column)?;
        if value.is_empty() || value == NOT_AVAILABLE {
            return Ok(None);
        }
        value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ParseError::InvalidNumber {
                column,
                value: value.to_string(),
            })
    }

    /// Integer byte counter; empty is 0, anything else must be numeric.
    fn counter(&self, column: &'static str) -> Result<u64, ParseError> {
        let value = self.get(column)?;
        if value.is_empty() {
            return Ok(0);
        }
        value.parse::<u64>().map_err(|_| ParseError::InvalidNumber {
            column,
            value: value.to_string(),
        })
    }
}

/// Normalizes one export row.
pub fn from_csv_row(
    row: &CsvRow,
    defaults: &ImportDefaults,
) -> Result<MeasurementRecord, ParseError> {
    let timestamp = parse_export_timestamp(row.get(COL_TIME)?, defaults.exporter_offset)?;

    let raw = RawReading {
        download_bytes_per_sec: row.optional_float(COL_DOWNLOAD)?,
        upload_bytes_per_sec: row.optional_float(COL_UPLOAD)?,
        latency_ms: row.optional_float(COL_LATENCY)?,
        jitter_ms: row.optional_float(COL_JITTER)?,
        packet_loss: row.optional_float(COL_PACKET_LOSS)?,
        download_bytes: row.counter(COL_DOWNLOAD_BYTES)?,
        upload_bytes: row.counter(COL_UPLOAD_BYTES)?,
    };

    let sentinels = EndpointInfo::default();
    let server_name = row.text_or(COL_SERVER_NAME, &sentinels.server_name)?;
    let endpoint = EndpointInfo {
        isp: row.text_or(COL_ISP, &sentinels.isp)?,
        server_location: split_server_location(&server_name),
        server_name,
        server_id: row.text_or(COL_SERVER_ID, &sentinels.server_id)?,
        server_country: defaults.server_country.clone(),
        external_ip: row.text(COL_IP)?,
        result_url: row.text(COL_SHARE_URL)?,
        ..sentinels
    };

    Ok(MeasurementRecord::online(timestamp, raw, endpoint))
}

/// Parses an export timestamp.
///
/// The trailing offset suffix is dropped and the wall-clock time is read in
/// `exporter_offset`, the zone the exporter ran in; it is never taken as UTC.
pub fn parse_export_timestamp(
    value: &str,
    exporter_offset: FixedOffset,
) -> Result<DateTime<Utc>, ParseError> {
    let naive_part = strip_offset_suffix(value.trim().trim_matches('"'));
    let naive = TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive_part, format).ok())
        .ok_or_else(|| ParseError::InvalidTimestamp {
            value: value.to_string(),
            reason: "expected YYYY-MM-DDTHH:MM:SS".to_string(),
        })?;

    exporter_offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ParseError::InvalidTimestamp {
            value: value.to_string(),
            reason: "not representable in the exporter offset".to_string(),
        })
}

fn strip_offset_suffix(value: &str) -> &str {
    if let Some(stripped) = value.strip_suffix('Z') {
        return stripped;
    }
    let bytes = value.as_bytes();
    if bytes.len() > 6 {
        let suffix = &bytes[bytes.len() - 6..];
        let is_offset = matches!(suffix[0], b'+' | b'-')
            && suffix[1].is_ascii_digit()
            && suffix[2].is_ascii_digit()
            && suffix[3] == b':'
            && suffix[4].is_ascii_digit()
            && suffix[5].is_ascii_digit();
        if is_offset {
            return &value[..value.len() - 6];
        }
    }
    value
}
