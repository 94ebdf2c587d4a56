use std::io::{self, Read, Write};
use std::time::Duration;

use penplot_protocol::{Device as _, DeviceConfig, Error, GrblSession, RealtimeLink, Transport};
use serialport::{ClearBuffer, SerialPort};

// Reads give up after this long, so that response timeouts are checked
// regularly.
const READ_POLL: Duration = Duration::from_millis(20);

/// A serial port, as a [`Transport`].
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(config: &DeviceConfig) -> Result<Self, Error> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(READ_POLL.min(config.read_timeout()))
            .open()
            .map_err(|e| {
                log::warn!("failed to open serial port {}: {e}", config.port);
                Error::Connection(e.into())
            })?;
        Ok(SerialTransport { port })
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }

    fn realtime_link(&self) -> io::Result<RealtimeLink> {
        Ok(Box::new(self.port.try_clone()?))
    }
}

/// Opens the configured port, runs the GRBL handshake, and asks for work
/// positions in status reports.
pub fn connect(config: DeviceConfig) -> Result<GrblSession<SerialTransport>, Error> {
    let transport = SerialTransport::open(&config)?;
    let mut session = GrblSession::connect(transport, config)?;
    session.ensure_wpos()?;
    Ok(session)
}

/// The names of the serial ports on this system.
pub fn list_ports() -> Result<Vec<String>, Error> {
    let ports = serialport::available_ports().map_err(|e| Error::Connection(e.into()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
