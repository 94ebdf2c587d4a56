//! An in-memory stand-in for a GRBL controller.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{DeviceConfigBuilder, GrblSession, RealtimeLink, Transport};

/// Acknowledges every line, answers `?` with a fixed status report, and
/// records everything it was sent.
pub struct FakeGrbl {
    status: String,
    reply: String,
    input: VecDeque<u8>,
    partial: Vec<u8>,
    sent: Vec<String>,
    linked: Arc<Mutex<Vec<u8>>>,
}

impl FakeGrbl {
    pub fn with_status(status: &str) -> Self {
        FakeGrbl {
            status: status.to_owned(),
            reply: "ok".to_owned(),
            input: VecDeque::new(),
            partial: Vec::new(),
            sent: Vec::new(),
            linked: Arc::default(),
        }
    }

    pub fn idle() -> Self {
        Self::with_status("<Idle|WPos:0.000,0.000,0.000|FS:0,0>")
    }

    /// Changes the reply to each line. An empty reply means no reply at all.
    pub fn reply_with(&mut self, reply: &str) {
        self.reply = reply.to_owned();
    }

    pub fn push_input(&mut self, s: &str) {
        self.input.extend(s.bytes());
    }

    /// Everything sent so far: one entry per line or realtime byte.
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    pub fn linked_bytes(&self) -> Vec<u8> {
        self.linked.lock().unwrap().clone()
    }

    fn respond(&mut self, s: &str) {
        if !s.is_empty() {
            self.push_input(s);
            self.push_input("\r\n");
        }
    }
}

impl Read for FakeGrbl {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        let n = buf.len().min(self.input.len());
        for (dst, src) in buf.iter_mut().zip(self.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for FakeGrbl {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            match b {
                b'?' => {
                    self.sent.push("?".to_owned());
                    let status = self.status.clone();
                    self.respond(&status);
                }
                b'!' | b'~' | 0x18 => self.sent.push((b as char).to_string()),
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.partial).trim().to_owned();
                    self.partial.clear();
                    if !line.is_empty() {
                        self.sent.push(line);
                        let reply = self.reply.clone();
                        self.respond(&reply);
                    }
                }
                b => self.partial.push(b),
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Linked(Arc<Mutex<Vec<u8>>>);

impl Write for Linked {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for FakeGrbl {
    fn clear_input(&mut self) -> io::Result<()> {
        self.input.clear();
        Ok(())
    }

    fn realtime_link(&self) -> io::Result<RealtimeLink> {
        Ok(Box::new(Linked(self.linked.clone())))
    }
}

/// A connected session on top of `fake`, with the handshake already
/// forgotten.
pub fn fake_session(fake: FakeGrbl) -> GrblSession<FakeGrbl> {
    let cfg = DeviceConfigBuilder::default()
        .with_wake_delay(Duration::ZERO)
        .build()
        .unwrap();
    let mut s = GrblSession::connect(fake, cfg).unwrap();
    s.transport_mut().take_sent();
    s
}
