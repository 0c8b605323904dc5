//! Canonical measurement record shared by the live poller and the CSV importer.
use chrono::{DateTime, Utc};

pub mod csv_row;
pub mod live;
pub mod units;

pub use csv_row::{CsvRow, ImportDefaults, from_csv_row};
pub use live::{LiveResult, from_live_result};

use units::{rate_to_canonical, round_to};

pub const UNKNOWN: &str = "Unknown";
const RATE_DECIMALS: i32 = 2;
const TIMING_DECIMALS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }
}

/// Endpoint metadata of an online measurement. Absent values hold sentinels, never empty options.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointInfo {
    pub isp: String,
    pub server_name: String,
    pub server_id: String,
    pub server_location: String,
    pub server_country: String,
    pub external_ip: String,
    pub internal_ip: String,
    pub interface_name: String,
    pub result_url: String,
}

impl Default for EndpointInfo {
    fn default() -> Self {
        Self {
            isp: UNKNOWN.to_string(),
            server_name: UNKNOWN.to_string(),
            server_id: "0".to_string(),
            server_location: UNKNOWN.to_string(),
            server_country: UNKNOWN.to_string(),
            external_ip: String::new(),
            internal_ip: String::new(),
            interface_name: UNKNOWN.to_string(),
            result_url: String::new(),
        }
    }
}

/// Raw numbers as read from a source, before unit conversion and rounding.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawReading {
    pub download_bytes_per_sec: Option<f64>,
    pub upload_bytes_per_sec: Option<f64>,
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub download_bytes: u64,
    pub upload_bytes: u64,
}

/// One measurement, immutable once built.
///
/// The status is carried structurally: a record is online exactly when it has
/// endpoint metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    timestamp: DateTime<Utc>,
    download_rate: f64,
    upload_rate: f64,
    latency: f64,
    jitter: f64,
    packet_loss: f64,
    download_bytes: u64,
    upload_bytes: u64,
    endpoint: Option<EndpointInfo>,
}

impl MeasurementRecord {
    /// Builds an online record. This is the single rounding point for both input adapters:
    /// rates to 2 decimals, latency and jitter to 3.
    pub fn online(timestamp: DateTime<Utc>, raw: RawReading, endpoint: EndpointInfo) -> Self {
        Self {
            timestamp,
            download_rate: round_to(rate_to_canonical(raw.download_bytes_per_sec), RATE_DECIMALS),
            upload_rate: round_to(rate_to_canonical(raw.upload_bytes_per_sec), RATE_DECIMALS),
            latency: round_to(finite_or_zero(raw.latency_ms), TIMING_DECIMALS),
            jitter: round_to(finite_or_zero(raw.jitter_ms), TIMING_DECIMALS),
            packet_loss: finite_or_zero(raw.packet_loss),
            download_bytes: raw.download_bytes,
            upload_bytes: raw.upload_bytes,
            endpoint: Some(endpoint),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> Status {
        if self.endpoint.is_some() {
            Status::Online
        } else {
            Status::Offline
        }
    }

    pub fn download_rate(&self) -> f64 {
        self.download_rate
    }

    pub fn upload_rate(&self) -> f64 {
        self.upload_rate
    }

    pub fn latency(&self) -> f64 {
        self.latency
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn packet_loss(&self) -> f64 {
        self.packet_loss
    }

    pub fn download_bytes(&self) -> u64 {
        self.download_bytes
    }

    pub fn upload_bytes(&self) -> u64 {
        self.upload_bytes
    }

    pub fn endpoint(&self) -> Option<&EndpointInfo> {
        self.endpoint.as_ref()
    }
}

/// Record for a cycle where connectivity or the measurement failed.
pub fn offline_record(now: DateTime<Utc>) -> MeasurementRecord {
    MeasurementRecord {
        timestamp: now,
        download_rate: 0.0,
        upload_rate: 0.0,
        latency: 0.0,
        jitter: 0.0,
        packet_loss: 0.0,
        download_bytes: 0,
        upload_bytes: 0,
        endpoint: None,
    }
}

/// Derives the location from a combined `"name - location"` server string.
///
/// Splits on the last separator; without one the location is unknown.
pub fn split_server_location(combined: &str) -> String {
    match combined.rsplit_once(" - ") {
        Some((_, location)) if !location.trim().is_empty() => location.trim().to_string(),
        _ => UNKNOWN.to_string(),
    }
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_offline_record_is_zeroed() {
        let record = offline_record(at(3));
        assert_eq!(record.status(), Status::Offline);
        assert_eq!(record.timestamp(), at(3));
        assert_eq!(record.download_rate(), 0.0);
        assert_eq!(record.upload_rate(), 0.0);
        assert_eq!(record.latency(), 0.0);
        assert_eq!(record.jitter(), 0.0);
        assert_eq!(record.packet_loss(), 0.0);
        assert_eq!(record.download_bytes(), 0);
        assert_eq!(record.upload_bytes(), 0);
        assert!(record.endpoint().is_none());
    }

    #[test]
    fn test_online_record_rounds_once() {
        let raw = RawReading {
            download_bytes_per_sec: Some(123_456.0),
            upload_bytes_per_sec: None,
            latency_ms: Some(15.23456),
            jitter_ms: Some(1.0004),
            packet_loss: Some(2.5),
            download_bytes: 10,
            upload_bytes: 20,
        };
        let record = MeasurementRecord::online(at(0), raw, EndpointInfo::default());

        assert_eq!(record.status(), Status::Online);
        assert_eq!(record.download_rate(), 0.99);
        assert_eq!(record.upload_rate(), 0.0);
        assert_eq!(record.latency(), 15.235);
        assert_eq!(record.jitter(), 1.0);
        assert_eq!(record.packet_loss(), 2.5);
        assert_eq!(record.download_bytes(), 10);
        assert_eq!(record.upload_bytes(), 20);
    }

    #[test]
    fn test_split_server_location() {
        assert_eq!(split_server_location("TIME dotCom - Kuala Lumpur"), "Kuala Lumpur");
        assert_eq!(split_server_location("A - B - Penang"), "Penang");
        assert_eq!(split_server_location("Maxis"), UNKNOWN);
        assert_eq!(split_server_location("Maxis-KL"), UNKNOWN);
    }

    #[test]
    fn test_endpoint_defaults_are_sentinels() {
        let endpoint = EndpointInfo::default();
        assert_eq!(endpoint.isp, UNKNOWN);
        assert_eq!(endpoint.server_id, "0");
        assert_eq!(endpoint.external_ip, "");
        assert_eq!(endpoint.result_url, "");
    }
}
