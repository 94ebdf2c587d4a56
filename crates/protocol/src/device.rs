use std::time::{Duration, Instant};

use penplot_geom::{Point, Vector};

use crate::{
    apply_offset, Command, CompensationSurface, DeviceConfig, Error, Realtime, RealtimeLink,
    Result, Status,
};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(50);

/// How to move the pen when it has far to go.
///
/// Slamming the servo from fully up to fully down makes the pen bounce, so
/// big moves can be broken into steps of at most `step`, with a pause of
/// `delay` after each one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PenRamp {
    pub step: Option<f64>,
    pub delay: Duration,
}

impl Default for PenRamp {
    fn default() -> Self {
        Self {
            step: None,
            delay: Duration::from_millis(30),
        }
    }
}

impl PenRamp {
    pub fn stepped(step: f64, delay: Duration) -> Self {
        Self {
            step: Some(step),
            delay,
        }
    }
}

/// Something that behaves like a pen plotter.
///
/// Implementors provide the primitive operations (sending a command, reading
/// status, moving the servo); everything else is built on top of those.
pub trait Device: Send {
    fn config(&self) -> &DeviceConfig;

    fn config_mut(&mut self) -> &mut DeviceConfig;

    fn compensation(&self) -> Option<&CompensationSurface>;

    fn set_compensation(&mut self, surface: Option<CompensationSurface>);

    /// The last commanded pen height.
    fn pen_position(&self) -> f64;

    /// Moves the pen to `pos` (clamped to `[0, 1]`) with a single servo
    /// command.
    fn set_pen_height(&mut self, pos: f64) -> Result<()>;

    /// Sends a command and waits for it to be acknowledged, returning every
    /// line received in the meantime.
    fn command(&mut self, cmd: Command) -> Result<Vec<String>>;

    fn query_status(&mut self) -> Result<Status>;

    /// Sends a realtime byte.
    fn realtime(&mut self, cmd: Realtime) -> Result<()>;

    /// A handle for sending realtime bytes from another thread, even while
    /// this device is busy.
    fn realtime_link(&mut self) -> Result<RealtimeLink>;

    /// Blocks for `d`. Every pause the device layer takes goes through here.
    fn delay(&mut self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }

    fn is_idle(&mut self) -> Result<bool> {
        Ok(self.query_status()?.is_idle())
    }

    fn wait_idle(&mut self, timeout: Duration, poll: Duration) -> Result<()> {
        self.wait_idle_unless(timeout, poll, &|| false)
    }

    /// Polls until the device is idle, failing with [`Error::ProtocolTimeout`]
    /// after `timeout`, or with [`Error::Interrupted`] as soon as
    /// `interrupted` returns true.
    fn wait_idle_unless(
        &mut self,
        timeout: Duration,
        poll: Duration,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            if interrupted() {
                return Err(Error::Interrupted);
            }
            if self.is_idle()? {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(Error::ProtocolTimeout(timeout));
            }
            self.delay(poll);
        }
    }

    /// Asks for work positions in status reports.
    fn ensure_wpos(&mut self) -> Result<()> {
        self.command(Command::StatusMask(3))?;
        for _ in 0..3 {
            self.query_status()?;
            self.delay(Duration::from_millis(50));
        }
        Ok(())
    }

    /// Starts a rapid move. Doesn't wait for it to finish.
    fn rapid_to(&mut self, p: Point, feed: Option<u32>) -> Result<()> {
        let p = self.config().clip(p);
        let feed = feed.unwrap_or(self.config().feed_travel);
        self.command(Command::Rapid { x: p.x, y: p.y, feed })?;
        Ok(())
    }

    /// Starts a drawing move at the current draw feed. Doesn't wait for it to
    /// finish.
    fn draw_to(&mut self, p: Point) -> Result<()> {
        let p = self.config().clip(p);
        let feed = self.config().feed_draw;
        self.command(Command::Linear { x: p.x, y: p.y, feed })?;
        Ok(())
    }

    /// Changes the draw feed for this and all later drawing moves.
    fn set_draw_feed(&mut self, feed: u32) {
        self.config_mut().feed_draw = feed;
    }

    /// A relative rapid move. Relative moves aren't clipped to the bed.
    fn jog_by(&mut self, by: Vector, feed: Option<u32>) -> Result<()> {
        let feed = feed.unwrap_or(self.config().feed_travel);
        self.command(Command::Relative)?;
        self.command(Command::Rapid {
            x: by.x,
            y: by.y,
            feed,
        })?;
        self.command(Command::Absolute)?;
        Ok(())
    }

    /// Declares the current position to be the origin.
    fn set_origin_here(&mut self) -> Result<()> {
        self.command(Command::SetOrigin)?;
        Ok(())
    }

    /// The pen height that draws at `p` with the given pressure offset.
    ///
    /// Without a compensation surface, the base height is 1.
    fn compensated_pos(&self, p: Point, offset: f64) -> f64 {
        let base = self.compensation().map_or(1.0, |c| c.height_at(p));
        apply_offset(base, offset)
    }

    /// Moves the pen to `target`, ramping if the ramp asks for it.
    ///
    /// When ramping, intermediate commands are issued at whole multiples of
    /// the step away from the starting height, and the last command is
    /// always exactly `target`.
    fn pen_set(&mut self, target: f64, ramp: PenRamp) -> Result<()> {
        const EPS: f64 = 1e-9;

        let target = target.clamp(0.0, 1.0);
        let current = self.pen_position().clamp(0.0, 1.0);
        let step = match ramp.step {
            Some(step) if step > 0.0 && (target - current).abs() > step => step,
            _ => return self.set_pen_height(target),
        };

        let dir = if target > current { 1.0 } else { -1.0 };
        for k in 1.. {
            let p = current + dir * step * k as f64;
            if (dir > 0.0 && p >= target - EPS) || (dir < 0.0 && p <= target + EPS) {
                break;
            }
            self.set_pen_height(p)?;
            self.delay(ramp.delay);
        }
        self.set_pen_height(target)
    }

    fn pen_up(&mut self, ramp: PenRamp) -> Result<()> {
        self.pen_set(1.0, ramp)
    }

    fn pen_down(&mut self, ramp: PenRamp) -> Result<()> {
        self.pen_set(0.0, ramp)
    }

    /// Raises (or lowers, for negative `delta`) the pen relative to where it
    /// is now.
    fn pen_lift(&mut self, delta: f64, ramp: PenRamp) -> Result<()> {
        let target = (self.pen_position() + delta).clamp(0.0, 1.0);
        self.pen_set(target, ramp)
    }

    /// Lifts the pen and moves to `p`, waiting until the move is done.
    fn travel_to(&mut self, p: Point) -> Result<()> {
        self.pen_up(PenRamp::default())?;
        self.rapid_to(p, None)?;
        self.wait_idle(DEFAULT_IDLE_TIMEOUT, DEFAULT_IDLE_POLL)
    }

    fn goto_center(&mut self) -> Result<()> {
        let c = self.config().center();
        log::info!("going to the center of the bed ({:.3}, {:.3})", c.x, c.y);
        self.travel_to(c)
    }

    /// Traces the outline of a rectangle with the pen up, to check that a
    /// drawing will fit on the paper.
    fn sweep_rect(&mut self, corner: Point, width: f64, height: f64, close: bool) -> Result<()> {
        self.pen_up(PenRamp::default())?;
        let mut corners = vec![
            corner,
            corner + Vector::new(width, 0.0),
            corner + Vector::new(width, height),
            corner + Vector::new(0.0, height),
        ];
        if close {
            corners.push(corner);
        }
        for c in corners {
            self.rapid_to(c, None)?;
        }
        self.wait_idle(DEFAULT_IDLE_TIMEOUT, DEFAULT_IDLE_POLL)
    }
}
