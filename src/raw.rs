//! Loosely typed records as they arrive from the Nightscout REST API.
//!
//! Nightscout is inconsistent about primitive encodings: numbers are often
//! sent as strings and timestamps may be strings or epoch milliseconds.
//! These types accept every observed form; conversion into the strongly
//! typed model happens in [`crate::schedule`] and [`crate::profile`].

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::{ProfileError, Result};

/// A number encoded either natively or as a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
}

impl RawNumber {
    pub fn to_f64(&self, field: &'static str) -> Result<f64> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| ProfileError::invalid(field, s.clone(), e.to_string()))?,
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ProfileError::invalid(field, value.to_string(), "not a finite number"))
        }
    }
}

impl From<f64> for RawNumber {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// A timestamp encoded as epoch milliseconds or as a date string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl RawTimestamp {
    pub fn to_utc(&self, field: &'static str) -> Result<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| ProfileError::invalid(field, ms.to_string(), "out of range")),
            Self::Text(s) => parse_timestamp(s, field),
        }
    }
}

/// Parse a Nightscout date string into UTC.
///
/// Accepts RFC 3339, offsets without a colon (`+0000`) and naive strings,
/// which are taken to be UTC.
pub fn parse_timestamp(value: &str, field: &'static str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(ProfileError::invalid(
        field,
        value,
        "expected an RFC 3339 timestamp",
    ))
}

/// One change point of a daily schedule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawScheduleEntry {
    /// Local start time as "HH:MM".
    #[serde(default)]
    pub time: Option<String>,
    #[serde(rename = "timeAsSeconds", default)]
    pub time_as_seconds: Option<RawNumber>,
    pub value: RawNumber,
}

impl RawScheduleEntry {
    pub fn at_seconds(seconds: u32, value: f64) -> Self {
        Self {
            time: None,
            time_as_seconds: Some(RawNumber::Number(f64::from(seconds))),
            value: RawNumber::Number(value),
        }
    }
}

/// A single named profile from a definition's `store`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawProfile {
    pub dia: Option<RawNumber>,
    pub timezone: Option<String>,
    pub basal: Option<Vec<RawScheduleEntry>>,
    pub carbratio: Option<Vec<RawScheduleEntry>>,
    pub sens: Option<Vec<RawScheduleEntry>>,
    pub target_low: Option<Vec<RawScheduleEntry>>,
    pub target_high: Option<Vec<RawScheduleEntry>>,
    pub carbs_hr: Option<RawNumber>,
    pub delay: Option<RawNumber>,
    pub units: Option<String>,
}

/// One dated version of the user's therapy settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawProfileDefinition {
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "defaultProfile")]
    pub default_profile: Option<String>,
    pub store: Option<BTreeMap<String, RawProfile>>,
    pub units: Option<String>,
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    #[test]
    fn test_number_from_string_and_native() {
        let n: RawNumber = serde_json::from_str("\"0.45\"").unwrap();
        assert_eq!(n.to_f64("value").unwrap(), 0.45);

        let n: RawNumber = serde_json::from_str("21600").unwrap();
        assert_eq!(n.to_f64("value").unwrap(), 21600.0);
    }

    #[test]
    fn test_number_rejects_garbage() {
        let n = RawNumber::Text("fast".to_string());
        let err = n.to_f64("dia").unwrap_err();
        assert!(matches!(err, ProfileError::InvalidField { field: "dia", .. }));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2017, 3, 24, 3, 54, 0).unwrap();
        assert_eq!(
            parse_timestamp("2017-03-24T03:54:00.000Z", "startDate").unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("2017-03-23T22:54:00-05:00", "startDate").unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("2017-03-24T03:54:00.000+0000", "startDate").unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("2017-03-24T03:54:00", "startDate").unwrap(),
            expected
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday", "startDate").is_err());
    }

    #[test]
    fn test_timestamp_from_millis() {
        let ts: RawTimestamp = serde_json::from_str("1596654066533").unwrap();
        let dt = ts.to_utc("date").unwrap();
        assert_eq!(dt.hour(), 19);
        assert_eq!(dt.timestamp_subsec_millis(), 533);
    }

    #[test]
    fn test_raw_definition_ignores_unknown_fields() {
        let json = r#"{
            "_id": "58c0e02447d5af0c00e37593",
            "defaultProfile": "Default",
            "startDate": "2017-03-24T03:54:00.000Z",
            "mills": "1489035240000",
            "store": {
                "Default": {
                    "dia": "4",
                    "timezone": "US/Central",
                    "basal": [{"time": "00:00", "value": "0.45", "timeAsSeconds": "0"}]
                }
            }
        }"#;
        let raw: RawProfileDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(raw.default_profile.as_deref(), Some("Default"));
        let store = raw.store.unwrap();
        assert_eq!(store["Default"].basal.as_ref().unwrap().len(), 1);
    }
}
