//! mtr report model and payload decoding.
//!
//! Probes publish one JSON document per traceroute run:
//!
//! ```json
//! {
//!   "time": "2024-05-01T10:00:00Z",
//!   "hosts": [{"ip": "10.0.0.1", "hostname": "", "hop-number": 1, "sent": 5,
//!              "lost-percent": 0.0, "last": 1.2, "avg": 1.1, "best": 0.9,
//!              "worst": 1.5, "standard-dev": 0.2}],
//!   "hops": 1,
//!   "elapsed_time": 5000000000,
//!   "location": {"ip": "1.2.3.4", "country_code": "US", "country_name": "United States",
//!                "city": "", "latitude": 0.0, "longitude": 0.0}
//! }
//! ```
//!
//! Every field is optional. `elapsed_time` is a duration in nanoseconds and a
//! `null` host list decodes as empty. The report, each host and the location
//! must be JSON objects.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{
    de::{self, DeserializeOwned, Unexpected},
    Deserialize, Deserializer,
};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Error decoding json report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error decoding json report: expected an object, found {0}")]
    NotAnObject(&'static str),
}

/// One probed hop.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Host {
    pub ip: String,

    /// Resolved name, empty when unresolved.
    #[serde(rename = "hostname")]
    pub name: String,

    #[serde(rename = "hop-number")]
    pub hop: u32,

    pub sent: u64,

    #[serde(rename = "lost-percent")]
    pub lost_percent: f64,

    pub last: f64,
    pub avg: f64,
    pub best: f64,
    pub worst: f64,

    #[serde(rename = "standard-dev")]
    pub std_dev: f64,
}

/// Where the probe that produced a report is located.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Location {
    pub ip: String,
    pub country_code: String,
    pub country_name: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// A location without a country code cannot be attributed.
    pub fn is_usable(&self) -> bool {
        !self.country_code.is_empty()
    }
}

/// One complete traceroute run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Report {
    pub time: Option<DateTime<Utc>>,

    /// Hops in the order the probe sent them.
    #[serde(deserialize_with = "host_list")]
    pub hosts: Vec<Host>,

    pub hops: u32,

    #[serde(deserialize_with = "nanos")]
    pub elapsed_time: Duration,

    #[serde(deserialize_with = "optional_object")]
    pub location: Option<Location>,
}

impl Report {
    /// The probe location, if it carries a country code.
    pub fn origin(&self) -> Option<&Location> {
        self.location.as_ref().filter(|location| location.is_usable())
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// Derived struct impls also accept positional arrays; only maps are allowed here.
fn object<T, E>(value: Value) -> Result<T, E>
where
    T: DeserializeOwned,
    E: de::Error,
{
    if !value.is_object() {
        return Err(E::invalid_type(Unexpected::Other(kind(&value)), &"an object"));
    }
    T::deserialize(value).map_err(E::custom)
}

fn host_list<'de, D>(deserializer: D) -> Result<Vec<Host>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<Value>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .map(object)
        .collect()
}

fn optional_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Option::<Value>::deserialize(deserializer)?
        .map(object)
        .transpose()
}

// Negative durations are clamped to zero.
fn nanos<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let nanos = Option::<i64>::deserialize(deserializer)?.unwrap_or_default();
    Ok(Duration::from_nanos(nanos.max(0) as u64))
}

/// Decodes one message payload.
pub fn decode(payload: &[u8]) -> Result<Report, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject(kind(&value)));
    }
    Ok(Report::deserialize(value)?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const FULL: &str = r#"{
        "time": "2024-05-01T10:00:00Z",
        "hosts": [
            {"ip": "10.0.0.1", "hostname": "gw", "hop-number": 1, "sent": 5,
             "lost-percent": 0.0, "last": 1.2, "avg": 1.1, "best": 0.9, "worst": 1.5,
             "standard-dev": 0.2},
            {"ip": "192.0.2.7", "hostname": "", "hop-number": 2, "sent": 5,
             "lost-percent": 20.0, "last": 9.8, "avg": 10.4, "best": 9.1, "worst": 12.0,
             "standard-dev": 1.1}
        ],
        "hops": 2,
        "elapsed_time": 5000000000,
        "location": {"ip": "1.2.3.4", "country_code": "US", "country_name": "United States",
                     "city": "Boston", "latitude": 42.36, "longitude": -71.06}
    }"#;

    #[test]
    fn test_decode_full_report() {
        let report = decode(FULL.as_bytes()).unwrap();

        assert_eq!(
            report.time,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(report.hops, 2);
        assert_eq!(report.elapsed_time, Duration::from_secs(5));
        assert_eq!(report.hosts.len(), 2);
        assert_eq!(report.hosts[0].name, "gw");
        assert_eq!(report.hosts[1].hop, 2);
        assert_eq!(report.hosts[1].lost_percent, 20.0);
        assert_eq!(report.hosts[1].std_dev, 1.1);

        let origin = report.origin().unwrap();
        assert_eq!(origin.country_code, "US");
        assert_eq!(origin.city, "Boston");
    }

    #[test]
    fn test_host_order_is_preserved() {
        let payload = br#"{"hosts":[{"hop-number":3},{"hop-number":1},{"hop-number":2}]}"#;
        let hops: Vec<u32> = decode(payload).unwrap().hosts.iter().map(|h| h.hop).collect();
        assert_eq!(hops, vec![3, 1, 2]);
    }

    #[test]
    fn test_missing_fields_default() {
        let report = decode(b"{}").unwrap();
        assert!(report.hosts.is_empty());
        assert!(report.location.is_none());
        assert!(report.origin().is_none());
        assert_eq!(report.elapsed_time, Duration::ZERO);
    }

    #[test]
    fn test_null_hosts_and_location() {
        let report = decode(br#"{"hosts":null,"location":null,"elapsed_time":null}"#).unwrap();
        assert!(report.hosts.is_empty());
        assert!(report.location.is_none());
    }

    #[test]
    fn test_empty_location_has_no_origin() {
        let report = decode(br#"{"location":{}}"#).unwrap();
        assert!(report.location.is_some());
        assert!(report.origin().is_none());
    }

    #[test]
    fn test_malformed_payloads_fail() {
        for payload in [
            &b"not json"[..],
            b"",
            b"{\"hosts\":[",
            b"[]",
            b"{\"hops\":\"three\"}",
            b"{\"hosts\":[{\"hop-number\":-1}]}",
        ] {
            assert!(decode(payload).is_err(), "{:?}", String::from_utf8_lossy(payload));
        }
    }

    #[test]
    fn test_top_level_must_be_object() {
        for payload in [
            &b"[]"[..],
            b"null",
            b"42",
            b"\"report\"",
            br#"[null,[{"ip":"10.0.0.1"}],1,0,{"country_code":"US"}]"#,
        ] {
            let err = decode(payload).unwrap_err();
            assert!(
                matches!(err, DecodeError::NotAnObject(_)),
                "{:?}",
                String::from_utf8_lossy(payload)
            );
        }
        assert_eq!(
            decode(b"[]").unwrap_err().to_string(),
            "Error decoding json report: expected an object, found array"
        );
    }

    #[test]
    fn test_nested_arrays_fail() {
        for payload in [
            &br#"{"location":["1.2.3.4","US","United States","",0.0,0.0]}"#[..],
            br#"{"location":[]}"#,
            br#"{"location":"US"}"#,
            br#"{"hosts":[["10.0.0.1","gw",1,5,0.0,1.2,1.1,0.9,1.5,0.2]]}"#,
            br#"{"hosts":[{"hop-number":1},[]]}"#,
            br#"{"hosts":[null]}"#,
        ] {
            assert!(
                matches!(decode(payload), Err(DecodeError::Json(_))),
                "{:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }
}
