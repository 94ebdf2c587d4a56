//! Talking to a GRBL pen plotter.
//!
//! The plotter is a two-axis GRBL machine with a hobby servo holding the
//! pen. Motion is plain G-code (`G0`/`G1` in absolute millimeters), and the
//! pen is driven with the spindle PWM command (`M3 S..`).
//!
//! Pen heights are normalized: 0 is fully down and 1 is fully up. The
//! [`ServoCalibration`] turns a normalized height into a PWM value, and a
//! [`CompensationSurface`] describes how the "touching the paper" height
//! varies over a tilted bed.
//!
//! Anything that can act like a plotter implements [`Device`]. The real thing
//! is a [`GrblSession`] wrapped around a byte [`Transport`].

mod compensation;
mod config;
mod device;
mod error;
mod gcode;
mod grbl;
mod servo;
mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use compensation::{apply_offset, CompensationSurface};
pub use config::{DeviceConfig, DeviceConfigBuilder};
pub use device::{Device, PenRamp, DEFAULT_IDLE_POLL, DEFAULT_IDLE_TIMEOUT};
pub use error::{Error, Result};
pub use gcode::{Command, Realtime};
pub use grbl::{GrblSession, RealtimeLink, RealtimeSender, Transport};
pub use servo::ServoCalibration;
pub use status::Status;
