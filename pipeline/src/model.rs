use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const SENSOR_SCALE: u32 = 2;
pub const FUEL_FLOW_SCALE: u32 = 4;

/// Engine reading as returned by the upstream source, before it is stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReading {
    /// °C
    pub temperature: f64,
    pub rpm: f64,
    /// psia
    pub pressure: f64,
    /// kg/s
    pub fuel_flow: f64,
}

impl SourceReading {
    /// Attaches the arrival time. This is the only way to obtain a [`Reading`].
    pub fn stamp(self, at: DateTime<Utc>) -> Reading {
        Reading {
            temperature: self.temperature,
            rpm: self.rpm,
            pressure: self.pressure,
            fuel_flow: self.fuel_flow,
            timestamp: at,
        }
    }
}

/// A stamped engine reading. This is also the element format of the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub temperature: f64,
    pub rpm: f64,
    pub pressure: f64,
    pub fuel_flow: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Rounds every field to the column scale of the permanent store.
    pub fn to_store_precision(&self) -> Reading {
        Reading {
            temperature: round_to_scale(self.temperature, SENSOR_SCALE),
            rpm: round_to_scale(self.rpm, SENSOR_SCALE),
            pressure: round_to_scale(self.pressure, SENSOR_SCALE),
            fuel_flow: round_to_scale(self.fuel_flow, FUEL_FLOW_SCALE),
            timestamp: self.timestamp,
        }
    }
}

/// The decimal written by the shortest representation of `value`, rounded
/// half away from zero to `scale` places. `None` for non-finite values and
/// values outside the decimal range.
///
/// Rounding the decimal text rather than the binary value keeps `1.005` at
/// `1.01`, which is what NUMERIC stores for the same JSON input.
pub fn to_decimal(value: f64, scale: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    let exact = Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))?;
    Some(exact.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero))
}

/// [`to_decimal`] back as `f64`; values with no decimal form are returned as is.
pub fn round_to_scale(value: f64, scale: u32) -> f64 {
    to_decimal(value, scale)
        .and_then(|d| d.to_string().parse().ok())
        .unwrap_or(value)
}

/// Published once per successful poll.
#[derive(Debug, Clone)]
pub struct IngestionEvent {
    pub reading: Reading,
    pub received_at: DateTime<Utc>,
}

impl IngestionEvent {
    pub fn new(reading: Reading) -> Self {
        Self {
            reading,
            received_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for IngestionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IngestionEvent{{timestamp={}, temperature={}, rpm={}, receivedAt={}}}",
            self.reading.timestamp, self.reading.temperature, self.reading.rpm, self.received_at
        )
    }
}

/// Row of the permanent store.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub id: i64,
    pub temperature: f64,
    pub rpm: f64,
    pub pressure: f64,
    pub fuel_flow: f64,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub data: Vec<PersistedRecord>,
    /// Records on this page
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
}
