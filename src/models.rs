//! Glucose, treatment, device and server records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ProfileError, Result};
use crate::raw::{RawNumber, RawTimestamp, parse_timestamp};

fn mgdl_to_mmol(mgdl: f64) -> f64 {
    (mgdl / 18.0 * 10.0).round() / 10.0
}

fn optional_number(raw: Option<RawNumber>, field: &'static str) -> Result<Option<f64>> {
    raw.map(|n| n.to_f64(field)).transpose()
}

fn optional_timestamp(raw: Option<String>, field: &'static str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(&s, field)).transpose()
}

// ==================== Sensor Glucose ====================

#[derive(Debug, Deserialize)]
pub struct RawSgv {
    sgv: Option<RawNumber>,
    delta: Option<RawNumber>,
    #[serde(rename = "dateString")]
    date_string: Option<String>,
    date: Option<RawTimestamp>,
    direction: Option<String>,
    device: Option<String>,
}

/// A single sensor glucose value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawSgv")]
pub struct Sgv {
    /// mg/dL
    pub sgv: f64,
    /// mmol/L, one decimal
    pub sgv_mmol: f64,
    pub delta: Option<f64>,
    pub delta_mmol: Option<f64>,
    pub date: DateTime<Utc>,
    /// Trend arrow, e.g. `"FortyFiveDown"`.
    pub direction: String,
    pub device: String,
}

impl TryFrom<RawSgv> for Sgv {
    type Error = ProfileError;

    fn try_from(raw: RawSgv) -> Result<Self> {
        let missing = |field| ProfileError::MissingField { record: "sgv", field };

        let sgv = raw.sgv.ok_or(missing("sgv"))?.to_f64("sgv")?;
        let delta = optional_number(raw.delta, "delta")?;
        // dateString carries the precision the epoch field sometimes drops
        let date = match (raw.date_string, raw.date) {
            (Some(s), _) => parse_timestamp(&s, "dateString")?,
            (None, Some(ts)) => ts.to_utc("date")?,
            (None, None) => return Err(missing("dateString")),
        };

        Ok(Self {
            sgv,
            sgv_mmol: mgdl_to_mmol(sgv),
            delta,
            delta_mmol: delta.map(mgdl_to_mmol),
            date,
            direction: raw.direction.ok_or(missing("direction"))?,
            device: raw.device.ok_or(missing("device"))?,
        })
    }
}

// ==================== Treatments ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTreatment {
    event_type: Option<String>,
    #[serde(rename = "created_at")]
    created_at: Option<String>,
    timestamp: Option<RawTimestamp>,
    entered_by: Option<String>,
    temp: Option<String>,
    glucose: Option<RawNumber>,
    glucose_type: Option<String>,
    units: Option<String>,
    device: Option<String>,
    absolute: Option<RawNumber>,
    rate: Option<RawNumber>,
    duration: Option<RawNumber>,
    carbs: Option<RawNumber>,
    insulin: Option<RawNumber>,
    programmed: Option<RawNumber>,
    food_type: Option<String>,
    absorption_time: Option<RawNumber>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// An entry in the treatments store: boluses, carbs, temp basals and so on.
///
/// Which fields are set depends on `event_type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTreatment")]
pub struct Treatment {
    /// e.g. `"Temp Basal"`, `"Meal Bolus"`, `"BG Check"`.
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub timestamp: Option<DateTime<Utc>>,
    pub entered_by: Option<String>,
    pub temp: Option<String>,
    /// mg/dL for BG checks.
    pub glucose: Option<f64>,
    pub glucose_type: Option<String>,
    pub units: Option<String>,
    pub device: Option<String>,
    pub absolute: Option<f64>,
    /// Temp basal rate, U/hr.
    pub rate: Option<f64>,
    /// Temp basal duration, minutes.
    pub duration: Option<f64>,
    /// Grams.
    pub carbs: Option<f64>,
    /// Units delivered.
    pub insulin: Option<f64>,
    /// Units programmed; exceeds `insulin` when delivery was interrupted.
    pub programmed: Option<f64>,
    pub food_type: Option<String>,
    pub absorption_time: Option<f64>,
    pub kind: Option<String>,
}

impl TryFrom<RawTreatment> for Treatment {
    type Error = ProfileError;

    fn try_from(raw: RawTreatment) -> Result<Self> {
        let missing = |field| ProfileError::MissingField {
            record: "treatment",
            field,
        };

        Ok(Self {
            event_type: raw.event_type.ok_or(missing("eventType"))?,
            created_at: parse_timestamp(
                &raw.created_at.ok_or(missing("created_at"))?,
                "created_at",
            )?,
            timestamp: raw
                .timestamp
                .map(|ts| ts.to_utc("timestamp"))
                .transpose()?,
            entered_by: raw.entered_by,
            temp: raw.temp,
            glucose: optional_number(raw.glucose, "glucose")?,
            glucose_type: raw.glucose_type,
            units: raw.units,
            device: raw.device,
            absolute: optional_number(raw.absolute, "absolute")?,
            rate: optional_number(raw.rate, "rate")?,
            duration: optional_number(raw.duration, "duration")?,
            carbs: optional_number(raw.carbs, "carbs")?,
            insulin: optional_number(raw.insulin, "insulin")?,
            programmed: optional_number(raw.programmed, "programmed")?,
            food_type: raw.food_type,
            absorption_time: optional_number(raw.absorption_time, "absorptionTime")?,
            kind: raw.kind,
        })
    }
}

// ==================== Device Status ====================

/// Battery of the phone or bridge uploading data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploaderBattery {
    #[serde(rename = "batteryVoltage")]
    pub battery_voltage: Option<f64>,
    /// Percent.
    pub battery: Option<f64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PumpBattery {
    pub status: Option<String>,
    pub voltage: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RawPumpStatus {
    status: Option<String>,
    bolusing: Option<bool>,
    suspended: Option<bool>,
    timestamp: Option<RawTimestamp>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawPumpStatus")]
pub struct PumpStatus {
    pub status: Option<String>,
    pub bolusing: Option<bool>,
    pub suspended: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<RawPumpStatus> for PumpStatus {
    type Error = ProfileError;

    fn try_from(raw: RawPumpStatus) -> Result<Self> {
        Ok(Self {
            status: raw.status,
            bolusing: raw.bolusing,
            suspended: raw.suspended,
            timestamp: raw
                .timestamp
                .map(|ts| ts.to_utc("timestamp"))
                .transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawPumpDevice {
    clock: Option<String>,
    battery: Option<PumpBattery>,
    reservoir: Option<f64>,
    status: Option<PumpStatus>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawPumpDevice")]
pub struct PumpDevice {
    pub clock: Option<DateTime<Utc>>,
    pub battery: Option<PumpBattery>,
    /// Units of insulin remaining.
    pub reservoir: Option<f64>,
    pub status: Option<PumpStatus>,
}

impl TryFrom<RawPumpDevice> for PumpDevice {
    type Error = ProfileError;

    fn try_from(raw: RawPumpDevice) -> Result<Self> {
        Ok(Self {
            clock: optional_timestamp(raw.clock, "clock")?,
            battery: raw.battery,
            reservoir: raw.reservoir,
            status: raw.status,
        })
    }
}

/// State reported by an xDrip-js CGM bridge.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct XDripJs {
    pub state: Option<i64>,
    pub state_string: Option<String>,
    pub state_string_short: Option<String>,
    pub tx_id: Option<String>,
    pub tx_status: Option<f64>,
    pub tx_status_string: Option<String>,
    pub tx_status_string_short: Option<String>,
    /// Epoch milliseconds.
    pub tx_activation: Option<i64>,
    pub mode: Option<String>,
    pub timestamp: Option<i64>,
    pub rssi: Option<i64>,
    pub unfiltered: Option<f64>,
    pub filtered: Option<f64>,
    pub noise: Option<i64>,
    pub noise_string: Option<String>,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    pub cal_type: Option<String>,
    pub last_calibration_date: Option<i64>,
    pub session_start: Option<i64>,
    pub battery_timestamp: Option<i64>,
    pub voltagea: Option<f64>,
    pub voltageb: Option<f64>,
    pub temperature: Option<f64>,
    pub resistance: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RawDeviceStatus {
    device: Option<String>,
    created_at: Option<String>,
    openaps: Option<serde_json::Value>,
    #[serde(rename = "loop")]
    loop_status: Option<serde_json::Value>,
    pump: Option<PumpDevice>,
    uploader: Option<UploaderBattery>,
    xdripjs: Option<XDripJs>,
}

/// A status report from one uploading device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawDeviceStatus")]
pub struct DeviceStatus {
    /// Device name, e.g. `"openaps://hostname"`.
    pub device: String,
    pub created_at: DateTime<Utc>,
    pub openaps: Option<serde_json::Value>,
    pub loop_status: Option<serde_json::Value>,
    pub pump: Option<PumpDevice>,
    pub uploader: Option<UploaderBattery>,
    pub xdripjs: Option<XDripJs>,
}

impl TryFrom<RawDeviceStatus> for DeviceStatus {
    type Error = ProfileError;

    fn try_from(raw: RawDeviceStatus) -> Result<Self> {
        let missing = |field| ProfileError::MissingField {
            record: "device status",
            field,
        };

        Ok(Self {
            device: raw.device.ok_or(missing("device"))?,
            created_at: parse_timestamp(
                &raw.created_at.ok_or(missing("created_at"))?,
                "created_at",
            )?,
            openaps: raw.openaps,
            loop_status: raw.loop_status,
            pump: raw.pump,
            uploader: raw.uploader,
            xdripjs: raw.xdripjs,
        })
    }
}

/// Newest status per device, keyed by device name.
pub fn latest_device_status(statuses: Vec<DeviceStatus>) -> HashMap<String, DeviceStatus> {
    let mut latest: HashMap<String, DeviceStatus> = HashMap::new();
    for status in statuses {
        match latest.get(&status.device) {
            Some(current) if current.created_at >= status.created_at => {}
            _ => {
                latest.insert(status.device.clone(), status);
            }
        }
    }
    latest
}

// ==================== Server Status ====================

/// Server status, default settings and capabilities.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerStatus {
    pub status: String,
    pub version: String,
    pub name: String,
    #[serde(rename = "apiEnabled")]
    pub api_enabled: bool,
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}
