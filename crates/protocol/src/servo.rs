use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maps normalized pen heights to servo PWM values.
///
/// The servo horn lifts the pen through a pivoting linkage, so equal steps
/// in PWM don't give equal steps in height. With a horn that swings through
/// `travel_deg` degrees between `s_down` and `s_up`, height is proportional
/// to the sine of the horn angle, and we invert that:
///
/// ```text
/// g = asin(pos * sin(θ)) / θ
/// s = round(s_down + g * (s_up - s_down))
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoCalibration {
    /// PWM value with the pen fully down.
    pub s_down: u32,
    /// PWM value with the pen fully up.
    pub s_up: u32,
    /// How far the horn swings between the two, in degrees.
    #[serde(rename = "servo_travel_deg")]
    pub travel_deg: f64,
}

impl Default for ServoCalibration {
    fn default() -> Self {
        Self {
            s_down: 90,
            s_up: 40,
            travel_deg: 80.0,
        }
    }
}

impl ServoCalibration {
    pub fn validate(&self) -> Result<()> {
        // Beyond 90 degrees the sine stops increasing and the map folds back.
        if !(self.travel_deg > 0.0 && self.travel_deg <= 90.0) {
            return Err(Error::Configuration(format!(
                "servo travel must be in (0, 90] degrees, got {}",
                self.travel_deg
            )));
        }
        Ok(())
    }

    /// The PWM value for a pen height. Heights are clamped to `[0, 1]`.
    pub fn map(&self, pos: f64) -> u32 {
        let pos = pos.clamp(0.0, 1.0);
        let theta = self.travel_deg.to_radians();
        let g = ((pos * theta.sin()).asin() / theta).clamp(0.0, 1.0);
        let s_down = self.s_down as f64;
        let s_up = self.s_up as f64;
        (s_down + g * (s_up - s_down)).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn endpoints() {
        let cal = ServoCalibration::default();
        assert_eq!(cal.map(0.0), 90);
        assert_eq!(cal.map(1.0), 40);
        assert_eq!(cal.map(-3.0), 90);
        assert_eq!(cal.map(7.0), 40);
    }

    #[test]
    fn not_linear() {
        let cal = ServoCalibration {
            s_down: 0,
            s_up: 1000,
            travel_deg: 80.0,
        };
        // asin(0.5 * sin(80°)) / 80° ≈ 0.3687
        assert_eq!(cal.map(0.5), 369);
    }

    #[test]
    fn validation() {
        assert!(ServoCalibration::default().validate().is_ok());
        let mut cal = ServoCalibration::default();
        cal.travel_deg = 120.0;
        assert!(matches!(cal.validate(), Err(Error::Configuration(_))));
        cal.travel_deg = 0.0;
        assert!(cal.validate().is_err());
    }

    proptest! {
        #[test]
        fn monotonic(a in 0.0..=1.0f64, b in 0.0..=1.0f64, down in 0u32..1000, up in 0u32..1000, travel in 1.0..=90.0f64) {
            let cal = ServoCalibration { s_down: down, s_up: up, travel_deg: travel };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let (s_lo, s_hi) = (cal.map(lo) as i64, cal.map(hi) as i64);
            if up >= down {
                prop_assert!(s_lo <= s_hi);
            } else {
                prop_assert!(s_lo >= s_hi);
            }
            prop_assert_eq!(cal.map(0.0), down);
            prop_assert_eq!(cal.map(1.0), up);
        }
    }
}
