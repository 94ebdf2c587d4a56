use std::fmt;

/// The G-code subset we send, one line per command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// `G90`
    Absolute,
    /// `G91`
    Relative,
    /// `G21`
    Millimeters,
    /// `G0`, a rapid (pen-up) move.
    Rapid { x: f64, y: f64, feed: u32 },
    /// `G1`, a drawing move.
    Linear { x: f64, y: f64, feed: u32 },
    /// `M3 S..`, which is wired to the pen servo.
    Servo(u32),
    /// `G92 X0 Y0 Z0`
    SetOrigin,
    /// `$10=..`, which chooses the position fields in status reports.
    StatusMask(u8),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Absolute => f.write_str("G90"),
            Command::Relative => f.write_str("G91"),
            Command::Millimeters => f.write_str("G21"),
            Command::Rapid { x, y, feed } => write!(f, "G0 X{x:.3} Y{y:.3} F{feed}"),
            Command::Linear { x, y, feed } => write!(f, "G1 X{x:.3} Y{y:.3} F{feed}"),
            Command::Servo(s) => write!(f, "M3 S{s}"),
            Command::SetOrigin => f.write_str("G92 X0 Y0 Z0"),
            Command::StatusMask(m) => write!(f, "$10={m}"),
        }
    }
}

/// Single-byte commands that GRBL acts on immediately, without queueing them
/// behind motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Realtime {
    StatusQuery,
    FeedHold,
    CycleResume,
    SoftReset,
}

impl Realtime {
    pub fn byte(self) -> u8 {
        match self {
            Realtime::StatusQuery => b'?',
            Realtime::FeedHold => b'!',
            Realtime::CycleResume => b'~',
            Realtime::SoftReset => 0x18,
        }
    }
}
