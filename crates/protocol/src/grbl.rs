use std::io::{self, BufRead as _, BufReader, Read, Write};
use std::time::Instant;

use crate::{
    Command, CompensationSurface, Device, DeviceConfig, Error, Realtime, Result, Status,
};

/// Sends realtime bytes, possibly from a different thread than the one
/// driving the device.
pub trait RealtimeSender: Send {
    fn send(&mut self, cmd: Realtime) -> Result<()>;
}

impl<W: Write + Send> RealtimeSender for W {
    fn send(&mut self, cmd: Realtime) -> Result<()> {
        self.write_all(&[cmd.byte()])?;
        self.flush()?;
        Ok(())
    }
}

pub type RealtimeLink = Box<dyn RealtimeSender>;

/// A byte link to a GRBL controller, usually a serial port.
///
/// Reads are expected to time out (with [`io::ErrorKind::TimedOut`] or
/// [`io::ErrorKind::WouldBlock`]) when there's nothing to read.
pub trait Transport: Read + Write + Send {
    /// Throws away anything received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// An independent handle for writing realtime bytes.
    fn realtime_link(&self) -> io::Result<RealtimeLink>;
}

/// A connection to a GRBL controller.
pub struct GrblSession<T> {
    port: BufReader<T>,
    // The part of a line that was received before a read timed out.
    pending: Vec<u8>,
    config: DeviceConfig,
    pen: f64,
    compensation: Option<CompensationSurface>,
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

impl<T: Transport> GrblSession<T> {
    /// Wraps a transport without talking to it.
    pub fn new(transport: T, config: DeviceConfig) -> Self {
        GrblSession {
            port: BufReader::new(transport),
            pending: Vec::new(),
            config,
            // We don't know where the pen is, but up is the safe assumption.
            pen: 1.0,
            compensation: None,
        }
    }

    /// Wraps a transport and runs the startup handshake: give the controller
    /// time to boot, wake it up, discard its banner, and select absolute
    /// millimeter coordinates.
    pub fn connect(transport: T, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let mut session = Self::new(transport, config);
        std::thread::sleep(session.config.wake_delay());
        session.write_line("\r")?;
        session.clear_input()?;
        session.command(Command::Absolute)?;
        session.command(Command::Millimeters)?;
        log::info!("connected to GRBL on {}", session.config.port);
        Ok(session)
    }

    pub fn transport(&self) -> &T {
        self.port.get_ref()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.port.get_mut()
    }

    pub fn into_transport(self) -> T {
        self.port.into_inner()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let port = self.port.get_mut();
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        let buffered = self.port.buffer().len();
        self.port.consume(buffered);
        self.pending.clear();
        self.port.get_mut().clear_input()?;
        Ok(())
    }

    // Reads a line, or returns `None` if the read timed out first.
    fn read_line(&mut self) -> Result<Option<String>> {
        match self.port.read_until(b'\n', &mut self.pending) {
            Ok(0) if self.pending.is_empty() => Ok(None),
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.pending).trim().to_owned();
                self.pending.clear();
                Ok(Some(line))
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // Collects lines until one starts with "ok", or until nothing has
    // arrived for a whole read timeout.
    fn read_response(&mut self) -> Result<Vec<String>> {
        let timeout = self.config.read_timeout();
        let start = Instant::now();
        let mut lines = Vec::new();
        loop {
            match self.read_line()? {
                Some(line) if !line.is_empty() => {
                    log::trace!("< {line}");
                    let lower = line.to_ascii_lowercase();
                    if lower.starts_with("error") || lower.starts_with("alarm") {
                        log::warn!("GRBL replied {line:?}");
                    }
                    let done = lower.starts_with("ok");
                    lines.push(line);
                    if done {
                        break;
                    }
                }
                _ => {
                    if start.elapsed() > timeout {
                        log::debug!("no ok within {timeout:?}");
                        break;
                    }
                }
            }
        }
        Ok(lines)
    }
}

impl<T: Transport> Device for GrblSession<T> {
    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn config_mut(&mut self) -> &mut DeviceConfig {
        &mut self.config
    }

    fn compensation(&self) -> Option<&CompensationSurface> {
        self.compensation.as_ref()
    }

    fn set_compensation(&mut self, surface: Option<CompensationSurface>) {
        self.compensation = surface;
    }

    fn pen_position(&self) -> f64 {
        self.pen
    }

    fn set_pen_height(&mut self, pos: f64) -> Result<()> {
        let pos = pos.clamp(0.0, 1.0);
        self.command(Command::Servo(self.config.servo.map(pos)))?;
        self.pen = pos;
        Ok(())
    }

    fn command(&mut self, cmd: Command) -> Result<Vec<String>> {
        log::trace!("> {cmd}");
        self.write_line(&cmd.to_string())?;
        self.read_response()
    }

    fn query_status(&mut self) -> Result<Status> {
        let port = self.port.get_mut();
        port.write_all(&[Realtime::StatusQuery.byte()])?;
        port.flush()?;
        let line = self.read_line()?.unwrap_or_default();
        Ok(Status::parse(&line))
    }

    fn realtime(&mut self, cmd: Realtime) -> Result<()> {
        log::debug!("realtime {cmd:?}");
        self.port.get_mut().send(cmd)
    }

    fn realtime_link(&mut self) -> Result<crate::RealtimeLink> {
        self.port.get_ref().realtime_link().map_err(Error::from)
    }
}
