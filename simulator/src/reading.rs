use rand::Rng;
use serde::{Deserialize, Serialize};

/// Engine reading served to the pipeline. The pipeline stamps its own arrival
/// time, so there is no timestamp here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineReading {
    pub temperature: f64,
    pub rpm: f64,
    pub pressure: f64,
    pub fuel_flow: f64,
}

/// Draws one reading, with a share of outliers controlled by `outlier_rate`.
pub fn generate(rng: &mut impl Rng, outlier_rate: f64) -> EngineReading {
    let temperature = if rng.gen_bool(outlier_rate) {
        rng.gen_range(700.0..1100.0) // overheating
    } else {
        rng.gen_range(520.0..680.0) // Normal range
    };

    let rpm = if rng.gen_bool(outlier_rate) {
        rng.gen_range(0.0..2000.0) // spool-down
    } else {
        rng.gen_range(8800.0..9400.0) // Normal range
    };

    let pressure = rng.gen_range(38.0..55.0);

    let fuel_flow = if rng.gen_bool(outlier_rate) {
        rng.gen_range(0.9..1.6) // surge
    } else {
        rng.gen_range(0.35..0.55) // Normal range
    };

    EngineReading {
        temperature: round(temperature, 2),
        rpm: round(rpm, 2),
        pressure: round(pressure, 2),
        fuel_flow: round(fuel_flow, 4),
    }
}

fn round(value: f64, scale: i32) -> f64 {
    let factor = 10f64.powi(scale);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_normal_readings_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let r = generate(&mut rng, 0.0);
            assert!((520.0..=680.0).contains(&r.temperature));
            assert!((8800.0..=9400.0).contains(&r.rpm));
            assert!((0.35..=0.55).contains(&r.fuel_flow));
        }
    }

    #[test]
    fn test_wire_format_has_no_timestamp() {
        let mut rng = StdRng::seed_from_u64(1);
        let json = serde_json::to_value(generate(&mut rng, 0.05)).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("fuelFlow"));
        assert!(!obj.contains_key("timestamp"));
        assert_eq!(obj.len(), 4);
    }
}
