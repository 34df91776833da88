use crate::errors::{Error, Result};
use crate::model::{to_decimal, SourceReading, FUEL_FLOW_SCALE, SENSOR_SCALE};
use rust_decimal::Decimal;

// NUMERIC(10,2) holds |v| < 10^8, NUMERIC(10,4) holds |v| < 10^6
const SENSOR_DIGITS: u32 = 8;
const FUEL_FLOW_DIGITS: u32 = 6;

const TEMP_MIN: f64 = -273.15;

/// Validates an upstream reading before it enters the pipeline
pub fn validate(reading: &SourceReading) -> Result<()> {
    check_field("temperature", reading.temperature, SENSOR_SCALE, SENSOR_DIGITS)?;
    check_field("rpm", reading.rpm, SENSOR_SCALE, SENSOR_DIGITS)?;
    check_field("pressure", reading.pressure, SENSOR_SCALE, SENSOR_DIGITS)?;
    check_field("fuelFlow", reading.fuel_flow, FUEL_FLOW_SCALE, FUEL_FLOW_DIGITS)?;

    if reading.temperature < TEMP_MIN {
        return Err(Error::Validation(format!(
            "Temperature {} below absolute zero",
            reading.temperature
        )));
    }

    for (name, value) in [
        ("rpm", reading.rpm),
        ("pressure", reading.pressure),
        ("fuelFlow", reading.fuel_flow),
    ] {
        if value < 0.0 {
            return Err(Error::Validation(format!("{} {} is negative", name, value)));
        }
    }

    Ok(())
}

/// Checks the value as it will be stored, after rounding to `scale`.
fn check_field(name: &str, value: f64, scale: u32, integer_digits: u32) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::Validation(format!("{} is not a finite number", name)));
    }
    let limit = Decimal::from(10u64.pow(integer_digits));
    match to_decimal(value, scale) {
        Some(stored) if stored.abs() < limit => Ok(()),
        _ => Err(Error::Validation(format!(
            "{} {} exceeds column precision (|v| < {} after rounding)",
            name, value, limit
        ))),
    }
}
