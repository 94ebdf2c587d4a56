use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use penplot_geom::{Point, Vector};
use penplot_protocol::{
    Command, CompensationSurface, Device, DeviceConfig, Error, Realtime, RealtimeLink,
    RealtimeSender, Result, Status,
};
use svg::{
    node::element::{path::Data, Circle, Path, Rectangle},
    Document,
};

/// Something a [`MockPlotter`] was asked to do.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Rapid { to: Point, feed: u32 },
    Draw { to: Point, feed: u32 },
    Pen(f64),
    Feed(u32),
    Origin,
    WaitIdle,
    Delay(Duration),
    Realtime(Realtime),
}

/// The events recorded by a [`MockPlotter`], shared with whoever wants to
/// look at them.
#[derive(Clone, Debug, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn push(&self, ev: Event) {
        self.0.lock().push(ev);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.lock())
    }
}

struct MockLink(EventLog);

impl RealtimeSender for MockLink {
    fn send(&mut self, cmd: Realtime) -> Result<()> {
        self.0.push(Event::Realtime(cmd));
        Ok(())
    }
}

/// An in-memory plotter. It's always idle, it never sleeps, and it
/// remembers everything it was told.
pub struct MockPlotter {
    config: DeviceConfig,
    compensation: Option<CompensationSurface>,
    position: Point,
    pen: f64,
    relative: bool,
    log: EventLog,
}

impl MockPlotter {
    pub fn new(config: DeviceConfig) -> Self {
        MockPlotter {
            config,
            compensation: None,
            position: Point::origin(),
            pen: 1.0,
            relative: false,
            log: EventLog::default(),
        }
    }

    pub fn event_log(&self) -> EventLog {
        self.log.clone()
    }

    pub fn position(&self) -> Point {
        self.position
    }

    fn move_to(&mut self, x: f64, y: f64) -> Point {
        self.position = if self.relative {
            self.position + Vector::new(x, y)
        } else {
            Point::new(x, y)
        };
        self.position
    }

    /// Draws the recorded motion: drawing moves in black, pen-up moves as
    /// thin dashed lines, and the bed as a grey outline.
    ///
    /// The document is flipped vertically, so that it looks like the paper
    /// does from above the bed.
    pub fn illustrate(&self) -> Document {
        let (w, h) = (self.config.x_max, self.config.y_max);
        let mut document = Document::new()
            .set("viewBox", (-5.0, -5.0, w + 10.0, h + 10.0))
            .add(
                Rectangle::new()
                    .set("width", w)
                    .set("height", h)
                    .set("fill", "none")
                    .set("stroke", "#cccccc")
                    .set("stroke-width", 0.5),
            );

        let flip = |p: Point| (p.x as f32, (h - p.y) as f32);
        let mut pos = Point::origin();
        for ev in self.log.snapshot() {
            let (to, drawing) = match ev {
                Event::Rapid { to, .. } => (to, false),
                Event::Draw { to, .. } => (to, true),
                Event::Origin => {
                    pos = Point::origin();
                    continue;
                }
                _ => continue,
            };
            let data = Data::new().move_to(flip(pos)).line_to(flip(to));
            let mut line = Path::new().set("fill", "none").set("d", data);
            line = if drawing {
                line.set("stroke", "black").set("stroke-width", 0.4)
            } else {
                line.set("stroke", "#7fa7d9")
                    .set("stroke-width", 0.2)
                    .set("stroke-dasharray", "1,1")
            };
            document = document.add(line);
            pos = to;
        }

        let (cx, cy) = flip(self.position);
        document.add(
            Circle::new()
                .set("cx", cx)
                .set("cy", cy)
                .set("r", 1.0)
                .set("fill", "blue"),
        )
    }

    pub fn write_svg(&self, path: &std::path::Path) -> std::io::Result<()> {
        svg::save(path, &self.illustrate())
    }
}

impl Device for MockPlotter {
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
        self.pen = pos.clamp(0.0, 1.0);
        self.log.push(Event::Pen(self.pen));
        Ok(())
    }

    fn command(&mut self, cmd: Command) -> Result<Vec<String>> {
        match cmd {
            Command::Absolute => self.relative = false,
            Command::Relative => self.relative = true,
            Command::Rapid { x, y, feed } => {
                let to = self.move_to(x, y);
                self.log.push(Event::Rapid { to, feed });
            }
            Command::Linear { x, y, feed } => {
                let to = self.move_to(x, y);
                self.log.push(Event::Draw { to, feed });
            }
            Command::SetOrigin => {
                self.position = Point::origin();
                self.log.push(Event::Origin);
            }
            Command::Millimeters | Command::Servo(_) | Command::StatusMask(_) => {}
        }
        Ok(vec!["ok".to_owned()])
    }

    fn query_status(&mut self) -> Result<Status> {
        Ok(Status::parse(&format!(
            "<Idle|WPos:{:.3},{:.3},0.000>",
            self.position.x, self.position.y
        )))
    }

    fn realtime(&mut self, cmd: Realtime) -> Result<()> {
        self.log.push(Event::Realtime(cmd));
        Ok(())
    }

    fn realtime_link(&mut self) -> Result<RealtimeLink> {
        Ok(Box::new(MockLink(self.log.clone())))
    }

    fn delay(&mut self, d: Duration) {
        if !d.is_zero() {
            self.log.push(Event::Delay(d));
        }
    }

    fn wait_idle_unless(
        &mut self,
        _timeout: Duration,
        _poll: Duration,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<()> {
        if interrupted() {
            return Err(Error::Interrupted);
        }
        self.log.push(Event::WaitIdle);
        Ok(())
    }

    fn set_draw_feed(&mut self, feed: u32) {
        self.config.feed_draw = feed;
        self.log.push(Event::Feed(feed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use penplot_protocol::PenRamp;

    fn mock() -> MockPlotter {
        MockPlotter::new(DeviceConfig::default())
    }

    #[test]
    fn records_motion() {
        let mut m = mock();
        let log = m.event_log();
        m.rapid_to(Point::new(10.0, 10.0), Some(500)).unwrap();
        m.draw_to(Point::new(20.0, 10.0)).unwrap();
        m.jog_by(Vector::new(1.0, -1.0), None).unwrap();
        assert_eq!(
            log.take(),
            vec![
                Event::Rapid {
                    to: Point::new(10.0, 10.0),
                    feed: 500
                },
                Event::Draw {
                    to: Point::new(20.0, 10.0),
                    feed: 3000
                },
                Event::Rapid {
                    to: Point::new(21.0, 9.0),
                    feed: 3000
                },
            ]
        );
        assert_eq!(m.position(), Point::new(21.0, 9.0));

        m.set_origin_here().unwrap();
        assert_eq!(m.position(), Point::origin());
        let status = m.query_status().unwrap();
        assert!(status.is_idle());
        assert_eq!(status.position, Some([0.0, 0.0, 0.0]));
    }

    #[test]
    fn ramps_are_recorded_without_sleeping() {
        let mut m = mock();
        let log = m.event_log();
        m.set_pen_height(0.0).unwrap();
        log.take();
        m.pen_set(0.5, PenRamp::stepped(0.2, Duration::from_secs(5)))
            .unwrap();
        let events = log.take();
        assert_eq!(events.len(), 5);
        assert_eq!(events[1], Event::Delay(Duration::from_secs(5)));
        assert_eq!(events[4], Event::Pen(0.5));
    }

    #[test]
    fn realtime_links_share_the_log() {
        let mut m = mock();
        let mut link = m.realtime_link().unwrap();
        link.send(Realtime::FeedHold).unwrap();
        m.realtime(Realtime::CycleResume).unwrap();
        assert_eq!(
            m.event_log().snapshot(),
            vec![
                Event::Realtime(Realtime::FeedHold),
                Event::Realtime(Realtime::CycleResume)
            ]
        );
    }

    #[test]
    fn interrupted_waits() {
        let mut m = mock();
        assert!(matches!(
            m.wait_idle_unless(Duration::ZERO, Duration::ZERO, &|| true),
            Err(Error::Interrupted)
        ));
        m.wait_idle(Duration::ZERO, Duration::ZERO).unwrap();
        assert_eq!(m.event_log().take(), vec![Event::WaitIdle]);
    }

    #[test]
    fn illustration() {
        let mut m = mock();
        m.rapid_to(Point::new(10.0, 10.0), None).unwrap();
        m.draw_to(Point::new(20.0, 10.0)).unwrap();
        let doc = m.illustrate().to_string();
        assert!(doc.contains("stroke-dasharray"));
        assert!(doc.contains("stroke=\"black\""));
        assert_eq!(doc.matches("<path").count(), 2);
    }
}
