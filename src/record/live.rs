//! Adapter for the JSON result printed by the speedtest CLI (`-f json`).
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{EndpointInfo, MeasurementRecord, RawReading, UNKNOWN, split_server_location};
use crate::error::ParseError;

/// Live measurement payload. Every substructure is independently optional.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveResult {
    pub timestamp: Option<String>,
    pub isp: Option<String>,
    pub server: Option<LiveServer>,
    pub download: Option<LiveTransfer>,
    pub upload: Option<LiveTransfer>,
    pub ping: Option<LivePing>,
    pub packet_loss: Option<f64>,
    pub interface: Option<LiveInterface>,
    pub result: Option<LiveResultLink>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LiveServer {
    pub id: Option<ServerId>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
}

/// The CLI reports server ids as numbers; older builds emit strings.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ServerId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerId::Numeric(id) => write!(f, "{id}"),
            ServerId::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct LiveTransfer {
    /// Bytes per second.
    pub bandwidth: Option<f64>,
    pub bytes: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct LivePing {
    pub latency: Option<f64>,
    pub jitter: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveInterface {
    pub name: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LiveResultLink {
    pub url: Option<String>,
}

impl LiveResult {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ParseError> {
        serde_json::from_slice(bytes).map_err(|e| ParseError::InvalidPayload(e.to_string()))
    }
}

/// Normalizes a live result. Never fails: absent fields take their defaults.
///
/// The payload's own `timestamp` is used when it parses as RFC 3339, otherwise `now`.
pub fn from_live_result(result: &LiveResult, now: DateTime<Utc>) -> MeasurementRecord {
    let timestamp = result
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(now);

    let download = result.download.unwrap_or_default();
    let upload = result.upload.unwrap_or_default();
    let ping = result.ping.unwrap_or_default();

    let raw = RawReading {
        download_bytes_per_sec: download.bandwidth,
        upload_bytes_per_sec: upload.bandwidth,
        latency_ms: ping.latency,
        jitter_ms: ping.jitter,
        packet_loss: result.packet_loss,
        download_bytes: download.bytes.unwrap_or(0),
        upload_bytes: upload.bytes.unwrap_or(0),
    };

    let mut endpoint = EndpointInfo::default();
    if let Some(isp) = non_empty(&result.isp) {
        endpoint.isp = isp;
    }
    if let Some(server) = &result.server {
        if let Some(name) = non_empty(&server.name) {
            endpoint.server_name = name;
        }
        if let Some(id) = server.id.as_ref().map(ToString::to_string).filter(|id| !id.is_empty()) {
            endpoint.server_id = id;
        }
        endpoint.server_location = non_empty(&server.location).unwrap_or_else(|| {
            if endpoint.server_name == UNKNOWN {
                UNKNOWN.to_string()
            } else {
                split_server_location(&endpoint.server_name)
            }
        });
        if let Some(country) = non_empty(&server.country) {
            endpoint.server_country = country;
        }
    }
    if let Some(interface) = &result.interface {
        if let Some(name) = non_empty(&interface.name) {
            endpoint.interface_name = name;
        }
        endpoint.internal_ip = interface.internal_ip.clone().unwrap_or_default();
        endpoint.external_ip = interface.external_ip.clone().unwrap_or_default();
    }
    if let Some(link) = &result.result {
        endpoint.result_url = link.url.clone().unwrap_or_default();
    }

    MeasurementRecord::online(timestamp, raw, endpoint)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Status;
    use chrono::TimeZone;

    const FULL_RESULT: &str = r#"{
        "type": "result",
        "timestamp": "2024-03-05T10:00:12Z",
        "ping": { "jitter": 0.8125, "latency": 4.2371, "low": 3.9, "high": 5.1 },
        "download": { "bandwidth": 12500000, "bytes": 150000000, "elapsed": 12000 },
        "upload": { "bandwidth": 2500000, "bytes": 30000000, "elapsed": 12000 },
        "packetLoss": 0.5,
        "isp": "TM Net",
        "interface": {
            "internalIp": "192.168.1.20",
            "name": "eth0",
            "macAddr": "00:11:22:33:44:55",
            "isVpn": false,
            "externalIp": "203.0.113.7"
        },
        "server": {
            "id": 12345,
            "host": "speedtest.example.net",
            "port": 8080,
            "name": "TIME dotCom",
            "location": "Kuala Lumpur",
            "country": "Malaysia",
            "ip": "198.51.100.1"
        },
        "result": { "id": "abc", "url": "https://www.speedtest.net/result/c/abc", "persisted": true }
    }"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 1, 0).unwrap()
    }

    #[test]
    fn test_full_result_normalizes() {
        let result = LiveResult::from_json(FULL_RESULT.as_bytes()).unwrap();
        let record = from_live_result(&result, now());

        assert_eq!(record.status(), Status::Online);
        assert_eq!(record.timestamp(), Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 12).unwrap());
        assert_eq!(record.download_rate(), 100.0);
        assert_eq!(record.upload_rate(), 20.0);
        assert_eq!(record.latency(), 4.237);
        assert_eq!(record.jitter(), 0.813);
        assert_eq!(record.packet_loss(), 0.5);
        assert_eq!(record.download_bytes(), 150_000_000);
        assert_eq!(record.upload_bytes(), 30_000_000);

        let endpoint = record.endpoint().unwrap();
        assert_eq!(endpoint.isp, "TM Net");
        assert_eq!(endpoint.server_name, "TIME dotCom");
        assert_eq!(endpoint.server_id, "12345");
        assert_eq!(endpoint.server_location, "Kuala Lumpur");
        assert_eq!(endpoint.server_country, "Malaysia");
        assert_eq!(endpoint.interface_name, "eth0");
        assert_eq!(endpoint.internal_ip, "192.168.1.20");
        assert_eq!(endpoint.external_ip, "203.0.113.7");
        assert_eq!(endpoint.result_url, "https://www.speedtest.net/result/c/abc");
    }

    #[test]
    fn test_empty_result_uses_defaults() {
        let result = LiveResult::from_json(b"{}").unwrap();
        let record = from_live_result(&result, now());

        assert_eq!(record.status(), Status::Online);
        assert_eq!(record.timestamp(), now());
        assert_eq!(record.download_rate(), 0.0);
        assert_eq!(record.latency(), 0.0);
        assert_eq!(record.packet_loss(), 0.0);
        assert_eq!(record.download_bytes(), 0);
        assert_eq!(record.endpoint().unwrap(), &EndpointInfo::default());
    }

    #[test]
    fn test_substructures_are_independent() {
        let result =
            LiveResult::from_json(br#"{"download": {"bandwidth": 1250000}, "result": {}}"#)
                .unwrap();
        let record = from_live_result(&result, now());

        assert_eq!(record.download_rate(), 10.0);
        assert_eq!(record.upload_rate(), 0.0);
        let endpoint = record.endpoint().unwrap();
        assert_eq!(endpoint.server_name, UNKNOWN);
        assert_eq!(endpoint.interface_name, UNKNOWN);
        assert_eq!(endpoint.result_url, "");
    }

    #[test]
    fn test_location_derived_from_combined_name() {
        let result =
            LiveResult::from_json(br#"{"server": {"id": "777", "name": "Maxis - Penang"}}"#)
                .unwrap();
        let endpoint = from_live_result(&result, now()).endpoint().cloned().unwrap();
        assert_eq!(endpoint.server_id, "777");
        assert_eq!(endpoint.server_location, "Penang");

        let result = LiveResult::from_json(br#"{"server": {"name": "Maxis"}}"#).unwrap();
        let endpoint = from_live_result(&result, now()).endpoint().cloned().unwrap();
        assert_eq!(endpoint.server_location, UNKNOWN);
    }

    #[test]
    fn test_invalid_payload() {
        let err = LiveResult::from_json(b"Speedtest by Ookla\nerror").unwrap_err();
        assert!(matches!(err, ParseError::InvalidPayload(_)));
    }

    #[test]
    fn test_unparsable_timestamp_falls_back_to_now() {
        let result = LiveResult::from_json(br#"{"timestamp": "soon"}"#).unwrap();
        assert_eq!(from_live_result(&result, now()).timestamp(), now());
    }
}
