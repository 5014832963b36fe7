//! Unit conversions used by dive data parsers

/// Zero degrees Celsius in Kelvin
pub const ZERO_CELSIUS: f64 = 273.15;

/// Standard atmospheric pressure in Pascal
pub const ATMOSPHERE_PA: f64 = 101_325.0;

/// Hydrostatic pressure of one meter of sea water in Pascal
pub const SEA_WATER_PA_PER_M: f64 = 1025.0 * 9.80665;

/// Convert Celsius to Kelvin
pub fn c2k(celsius: f64) -> f64 {
    celsius + ZERO_CELSIUS
}

/// Convert Kelvin to Celsius
pub fn k2c(kelvin: f64) -> f64 {
    kelvin - ZERO_CELSIUS
}

/// Convert absolute pressure in millibar to sea water depth in meters
pub fn mbar_to_depth(mbar: f64) -> f64 {
    (mbar * 100.0 - ATMOSPHERE_PA) / SEA_WATER_PA_PER_M
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature() {
        assert!((c2k(10.0) - 283.15).abs() < 1e-9);
        assert!((k2c(c2k(-2.5)) + 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_pressure_to_depth() {
        assert!(mbar_to_depth(1013.25).abs() < 1e-9);
        // 2 bar absolute is slightly less than 10 m of sea water
        let d = mbar_to_depth(2013.25);
        assert!((d - 9.9487).abs() < 1e-3);
    }
}
