use chrono::{DateTime, Utc};

use crate::record::MeasurementRecord;

pub const MEASUREMENT: &str = "speedtest";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Text(String),
}

/// Backend-neutral time-series point: measurement name, tags, typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl Point {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

impl From<&MeasurementRecord> for Point {
    fn from(record: &MeasurementRecord) -> Self {
        let mut tags = vec![("status", record.status().as_tag().to_string())];
        let mut fields = vec![
            ("download", FieldValue::Float(record.download_rate())),
            ("upload", FieldValue::Float(record.upload_rate())),
            ("latency", FieldValue::Float(record.latency())),
            ("jitter", FieldValue::Float(record.jitter())),
            ("packet_loss", FieldValue::Float(record.packet_loss())),
            ("download_bytes", FieldValue::Integer(saturating_i64(record.download_bytes()))),
            ("upload_bytes", FieldValue::Integer(saturating_i64(record.upload_bytes()))),
        ];

        // Addresses and result links are fields, not tags.
        if let Some(endpoint) = record.endpoint() {
            tags.extend([
                ("isp", endpoint.isp.clone()),
                ("server_name", endpoint.server_name.clone()),
                ("server_id", endpoint.server_id.clone()),
                ("server_location", endpoint.server_location.clone()),
                ("server_country", endpoint.server_country.clone()),
                ("interface_name", endpoint.interface_name.clone()),
            ]);
            fields.extend([
                ("external_ip", FieldValue::Text(endpoint.external_ip.clone())),
                ("internal_ip", FieldValue::Text(endpoint.internal_ip.clone())),
                ("result_url", FieldValue::Text(endpoint.result_url.clone())),
            ]);
        }

        Self {
            measurement: MEASUREMENT,
            timestamp: record.timestamp(),
            tags,
            fields,
        }
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
