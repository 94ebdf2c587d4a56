use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening, reading from, or writing to the device failed.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The device didn't report idle in time.
    #[error("device did not become idle within {0:?}")]
    ProtocolTimeout(Duration),

    /// An idle wait was abandoned because someone asked us to stop waiting.
    #[error("interrupted while waiting for the device")]
    Interrupted,

    /// Bad calibration, compensation surface, or device settings.
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
