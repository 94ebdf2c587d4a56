use std::time::Duration;

use penplot_geom::{Box2D, Point};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, ServoCalibration};

/// Connection settings, bed geometry, feeds and servo calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub port: String,
    pub baud_rate: u32,
    /// How long to wait for an `ok`, in seconds.
    pub read_timeout_s: f64,
    /// How long to let the controller boot after opening the port, in seconds.
    pub wake_delay_s: f64,

    /// Bed width, in millimeters.
    pub x_max: f64,
    /// Bed height, in millimeters.
    pub y_max: f64,

    /// Feed for pen-up moves, in mm/min.
    pub feed_travel: u32,
    /// Feed for drawing moves, in mm/min. Strokes with their own feed
    /// overwrite this.
    pub feed_draw: u32,

    #[serde(flatten)]
    pub servo: ServoCalibration,

    /// Clamp every absolute move to the bed.
    pub clip_to_bed: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfigBuilder::default().config
    }
}

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout_s.max(0.0))
    }

    pub fn wake_delay(&self) -> Duration {
        Duration::from_secs_f64(self.wake_delay_s.max(0.0))
    }

    pub fn bed(&self) -> Box2D {
        Box2D::new(Point::origin(), Point::new(self.x_max, self.y_max))
    }

    pub fn center(&self) -> Point {
        self.bed().center()
    }

    /// Clamps `p` to the bed, if clipping is enabled.
    pub fn clip(&self, p: Point) -> Point {
        if self.clip_to_bed {
            p.clamp(Point::origin(), Point::new(self.x_max, self.y_max))
        } else {
            p
        }
    }

    pub fn set_bed(&mut self, x_max: f64, y_max: f64) {
        self.x_max = x_max;
        self.y_max = y_max;
    }

    pub fn validate(&self) -> Result<()> {
        self.servo.validate()?;
        let finite_nonneg = |x: f64| x.is_finite() && x >= 0.0;
        if !(finite_nonneg(self.x_max) && finite_nonneg(self.y_max)) {
            return Err(Error::Configuration(format!(
                "bad bed size {} x {}",
                self.x_max, self.y_max
            )));
        }
        if self.feed_travel == 0 || self.feed_draw == 0 {
            return Err(Error::Configuration("feeds must be positive".to_owned()));
        }
        if !(finite_nonneg(self.read_timeout_s) && finite_nonneg(self.wake_delay_s)) {
            return Err(Error::Configuration(
                "timeouts must be non-negative".to_owned(),
            ));
        }
        Ok(())
    }
}

pub struct DeviceConfigBuilder {
    config: DeviceConfig,
}

impl Default for DeviceConfigBuilder {
    fn default() -> Self {
        Self {
            config: DeviceConfig {
                port: "/dev/tty.usbserial-A50285BI".to_owned(),
                baud_rate: 115200,
                read_timeout_s: 1.0,
                wake_delay_s: 2.0,
                x_max: 300.0,
                y_max: 245.0,
                feed_travel: 3000,
                feed_draw: 3000,
                servo: ServoCalibration::default(),
                clip_to_bed: true,
            },
        }
    }
}

impl DeviceConfigBuilder {
    pub fn build(&self) -> Result<DeviceConfig> {
        self.config.validate()?;
        Ok(self.config.clone())
    }

    pub fn with_port(&mut self, port: impl Into<String>) -> &mut Self {
        self.config.port = port.into();
        self
    }

    pub fn with_baud_rate(&mut self, baud_rate: u32) -> &mut Self {
        self.config.baud_rate = baud_rate;
        self
    }

    pub fn with_read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.read_timeout_s = timeout.as_secs_f64();
        self
    }

    pub fn with_wake_delay(&mut self, delay: Duration) -> &mut Self {
        self.config.wake_delay_s = delay.as_secs_f64();
        self
    }

    pub fn with_bed(&mut self, x_max: f64, y_max: f64) -> &mut Self {
        self.config.set_bed(x_max, y_max);
        self
    }

    pub fn with_feeds(&mut self, travel: u32, draw: u32) -> &mut Self {
        self.config.feed_travel = travel;
        self.config.feed_draw = draw;
        self
    }

    pub fn with_servo(&mut self, servo: ServoCalibration) -> &mut Self {
        self.config.servo = servo;
        self
    }

    pub fn with_clip_to_bed(&mut self, clip: bool) -> &mut Self {
        self.config.clip_to_bed = clip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.read_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.bed().max, Point::new(300.0, 245.0));
        assert_eq!(cfg.servo.s_down, 90);
        assert_eq!(cfg.servo.s_up, 40);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builder() {
        let cfg = DeviceConfigBuilder::default()
            .with_port("/dev/ttyUSB0")
            .with_bed(100.0, 50.0)
            .with_feeds(4000, 1500)
            .with_wake_delay(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(cfg.port, "/dev/ttyUSB0");
        assert_eq!(cfg.center(), Point::new(50.0, 25.0));
        assert_eq!(cfg.feed_draw, 1500);

        assert!(DeviceConfigBuilder::default()
            .with_feeds(0, 1000)
            .build()
            .is_err());
    }

    #[test]
    fn clipping() {
        let mut cfg = DeviceConfig::default();
        assert_eq!(cfg.clip(Point::new(-5.0, 400.0)), Point::new(0.0, 245.0));
        cfg.clip_to_bed = false;
        assert_eq!(cfg.clip(Point::new(-5.0, 400.0)), Point::new(-5.0, 400.0));
    }

    #[test]
    fn from_json() {
        let cfg: DeviceConfig =
            serde_json::from_str(r#"{"port": "COM3", "s_down": 100, "servo_travel_deg": 60.0}"#)
                .unwrap();
        assert_eq!(cfg.port, "COM3");
        assert_eq!(cfg.servo.s_down, 100);
        assert_eq!(cfg.servo.s_up, 40);
        assert_eq!(cfg.servo.travel_deg, 60.0);
        assert_eq!(cfg.x_max, 300.0);
    }
}
