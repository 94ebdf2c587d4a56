//! Streaming a pattern to a device.
//!
//! A run has two phases. [`prepare`] filters and optimizes a copy of the
//! pattern, and counts the segments to draw. A [`Renderer`] then executes the
//! prepared pattern stroke by stroke:
//!
//! 1. lift to a travel height above the current position and rapid to the
//!    stroke's first point;
//! 2. apply the stroke's feed, if it has one (the feed stays in effect for
//!    later strokes);
//! 3. lower the pen according to the [`HeightPolicy`] and draw the segments,
//!    waiting for the device to catch up every `flush_every` segments;
//! 4. wait for the stroke to finish and lift partway.
//!
//! Pause and cancel requests are observed at checkpoints: before every travel
//! move, before every pen command, and before every segment.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use penplot_geom::{GeomError, Pattern, Point, Stroke, StrokeRecord};
use penplot_planner::{plan, PlanOptions, PlanReport};
use penplot_protocol::{Device, PenRamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Device(#[from] penplot_protocol::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Validation(#[from] GeomError),

    /// The run was cancelled. This isn't really a failure, but it unwinds the
    /// run like one.
    #[error("run cancelled")]
    Cancelled,
}

/// How the pen height follows the compensation surface while drawing a
/// stroke.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HeightPolicy {
    /// One height for the whole stroke, measured at its first point.
    Start,
    /// One height for the whole stroke, measured at the mean of its points.
    Centroid,
    /// A new height before every segment, measured at its midpoint.
    #[default]
    PerSegment,
    /// Like `PerSegment`, but the pen only moves when the height changes by
    /// more than the threshold.
    Threshold,
}

impl HeightPolicy {
    pub fn name(self) -> &'static str {
        match self {
            HeightPolicy::Start => "start",
            HeightPolicy::Centroid => "centroid",
            HeightPolicy::PerSegment => "per_segment",
            HeightPolicy::Threshold => "threshold",
        }
    }
}

impl fmt::Display for HeightPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HeightPolicy {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(HeightPolicy::Start),
            "centroid" => Ok(HeightPolicy::Centroid),
            "per_segment" => Ok(HeightPolicy::PerSegment),
            "threshold" => Ok(HeightPolicy::Threshold),
            _ => Err(RunError::Configuration(format!(
                "unknown height policy {s:?}"
            ))),
        }
    }
}

impl TryFrom<String> for HeightPolicy {
    type Error = RunError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HeightPolicy> for String {
    fn from(p: HeightPolicy) -> String {
        p.name().to_owned()
    }
}

/// How to drive the pen during a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub z_mode: HeightPolicy,
    /// For [`HeightPolicy::Threshold`]: the smallest height change worth a
    /// pen command.
    pub z_threshold: f64,
    /// Pause after the first pen-down of a stroke, in seconds.
    pub settle_down_s: f64,
    /// Pause after lifting for a travel move, in seconds.
    pub settle_up_s: f64,
    /// Ramp big pen moves in steps of this size.
    pub z_step: Option<f64>,
    pub z_step_delay_s: f64,
    /// Wait for the device to go idle after this many segments.
    pub flush_every: usize,
    /// Feed for travel moves. Defaults to the device's travel feed.
    pub feed_travel: Option<u32>,
    /// How far above the compensated surface to lift between strokes.
    pub lift_delta: f64,
    pub idle_timeout_s: f64,
    pub idle_poll_s: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            z_mode: HeightPolicy::default(),
            z_threshold: 0.02,
            settle_down_s: 0.05,
            settle_up_s: 0.03,
            z_step: None,
            z_step_delay_s: 0.03,
            flush_every: 200,
            feed_travel: None,
            lift_delta: 0.2,
            idle_timeout_s: 30.0,
            idle_poll_s: 0.05,
        }
    }
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s.max(0.0))
}

impl RenderOptions {
    pub fn settle_down(&self) -> Duration {
        secs(self.settle_down_s)
    }

    pub fn settle_up(&self) -> Duration {
        secs(self.settle_up_s)
    }

    pub fn idle_timeout(&self) -> Duration {
        secs(self.idle_timeout_s)
    }

    pub fn idle_poll(&self) -> Duration {
        secs(self.idle_poll_s)
    }

    pub fn ramp(&self) -> PenRamp {
        PenRamp {
            step: self.z_step,
            delay: secs(self.z_step_delay_s),
        }
    }

    pub fn validate(&self) -> Result<(), RunError> {
        let bad = |what: String| Err(RunError::Configuration(what));
        if self.flush_every == 0 {
            return bad("flush_every must be at least 1".to_owned());
        }
        if !(self.z_threshold.is_finite() && self.z_threshold >= 0.0) {
            return bad(format!("bad z_threshold {}", self.z_threshold));
        }
        if !(0.0..=1.0).contains(&self.lift_delta) {
            return bad(format!("lift_delta {} is outside [0, 1]", self.lift_delta));
        }
        if let Some(step) = self.z_step {
            if !(step.is_finite() && step >= 0.0) {
                return bad(format!("bad z_step {step}"));
            }
        }
        let times = [
            ("settle_down_s", self.settle_down_s),
            ("settle_up_s", self.settle_up_s),
            ("z_step_delay_s", self.z_step_delay_s),
            ("idle_timeout_s", self.idle_timeout_s),
            ("idle_poll_s", self.idle_poll_s),
        ];
        for (name, t) in times {
            if !(t.is_finite() && t >= 0.0) {
                return bad(format!("{name} must be a non-negative number of seconds"));
            }
        }
        Ok(())
    }
}

/// What to run, as opposed to how to drive the pen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    #[serde(flatten)]
    pub plan: PlanOptions,
    /// Lift the pen and go back to the origin after the last stroke.
    pub return_home: bool,
    /// Only draw strokes with these pens.
    pub pens: Option<BTreeSet<u32>>,
    /// Hand the optimized strokes to [`RunListener::preview`] before drawing.
    pub preview: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            plan: PlanOptions::default(),
            return_home: true,
            pens: None,
            preview: false,
        }
    }
}

/// Receives updates from a run, on the thread doing the run.
pub trait RunListener {
    fn status(&mut self, _message: &str) {}

    fn progress(&mut self, _completed: usize, _total: usize) {}

    fn preview(&mut self, _strokes: &[StrokeRecord]) {}
}

impl RunListener for () {}

/// Where a run asks whether it should keep going.
pub trait Checkpoint {
    /// Blocks while the run is paused, and fails with
    /// [`RunError::Cancelled`] if it was cancelled.
    fn check(&self) -> Result<(), RunError>;

    /// Whether the run is paused or cancelled. Waits for the device are
    /// abandoned when this becomes true.
    fn halted(&self) -> bool;
}

/// A run that nobody can pause or cancel.
pub struct Unsupervised;

impl Checkpoint for Unsupervised {
    fn check(&self) -> Result<(), RunError> {
        Ok(())
    }

    fn halted(&self) -> bool {
        false
    }
}

/// A pattern that has been filtered and optimized, ready to draw.
#[derive(Clone, Debug)]
pub struct Prepared {
    pub pattern: Pattern,
    pub report: PlanReport,
    /// The number of segments that will be drawn.
    pub total: usize,
}

/// Filters and optimizes a copy of `pattern`.
pub fn prepare(pattern: &Pattern, options: &RunOptions) -> Result<Prepared, RunError> {
    let mut pattern: Pattern = match &options.pens {
        Some(pens) => pattern
            .iter()
            .filter(|s| pens.contains(&s.pen()))
            .cloned()
            .collect(),
        None => pattern.clone(),
    };
    let report = plan(&mut pattern, &options.plan)?;
    let total = pattern
        .iter()
        .filter(|s| s.is_drawable())
        .map(Stroke::segment_count)
        .sum();
    Ok(Prepared {
        pattern,
        report,
        total,
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub strokes: usize,
    pub segments: usize,
}

pub struct Renderer<'a, D: ?Sized> {
    device: &'a mut D,
    options: &'a RenderOptions,
    control: &'a dyn Checkpoint,
    listener: &'a mut dyn RunListener,
    // Where the pen is, if we know.
    cur: Option<Point>,
    completed: usize,
    total: usize,
}

impl<'a, D: Device + ?Sized> Renderer<'a, D> {
    pub fn new(
        device: &'a mut D,
        options: &'a RenderOptions,
        control: &'a dyn Checkpoint,
        listener: &'a mut dyn RunListener,
    ) -> Self {
        Renderer {
            device,
            options,
            control,
            listener,
            cur: None,
            completed: 0,
            total: 0,
        }
    }

    /// Draws a prepared pattern, and reports how it went as the final status
    /// message.
    pub fn execute(mut self, job: &Prepared, run: &RunOptions) -> Result<RunSummary, RunError> {
        let result = self.execute_inner(job, run);
        let message = match &result {
            Ok(_) => "Run finished.".to_owned(),
            Err(RunError::Cancelled) => "Run stopped.".to_owned(),
            Err(e) => format!("Run error: {e}"),
        };
        if result.is_ok() || matches!(result, Err(RunError::Cancelled)) {
            log::info!("{message}");
        } else {
            log::error!("{message}");
        }
        self.listener.status(&message);
        result
    }

    fn execute_inner(&mut self, job: &Prepared, run: &RunOptions) -> Result<RunSummary, RunError> {
        self.options.validate()?;
        for msg in job.report.messages() {
            self.listener.status(&msg);
        }
        if run.preview {
            let strokes: Vec<_> = job.pattern.strokes().collect();
            self.listener.preview(&strokes);
        }

        self.total = job.total;
        self.completed = 0;
        self.cur = Some(run.plan.start);
        self.listener.progress(0, self.total);

        let mut strokes = 0;
        for stroke in &job.pattern {
            if !stroke.is_drawable() {
                log::debug!("skipping a stroke with {} point(s)", stroke.len());
                continue;
            }
            self.draw_stroke(stroke)?;
            strokes += 1;
        }

        if run.return_home {
            self.return_home()?;
        }
        Ok(RunSummary {
            strokes,
            segments: self.completed,
        })
    }

    fn wait_idle(&mut self) -> Result<(), RunError> {
        let (timeout, poll) = (self.options.idle_timeout(), self.options.idle_poll());
        let control = self.control;
        loop {
            match self
                .device
                .wait_idle_unless(timeout, poll, &|| control.halted())
            {
                // We were paused or cancelled while the device was busy (and
                // it has probably been told to hold). Wait out the pause and
                // start waiting again.
                Err(penplot_protocol::Error::Interrupted) => control.check()?,
                res => return Ok(res?),
            }
        }
    }

    fn pen_to(&mut self, z: f64, settle: Duration) -> Result<(), RunError> {
        self.control.check()?;
        self.device.pen_set(z, self.options.ramp())?;
        self.device.delay(settle);
        Ok(())
    }

    // The travel height above `at`, or fully up if we don't know where we
    // are.
    fn lift_height(&self, at: Option<Point>) -> f64 {
        match at {
            Some(p) => (self.device.compensated_pos(p, 0.0) + self.options.lift_delta).min(1.0),
            None => 1.0,
        }
    }

    fn travel(&mut self, to: Point) -> Result<(), RunError> {
        let z = self.lift_height(self.cur);
        self.pen_to(z, self.options.settle_up())?;
        self.control.check()?;
        self.device.rapid_to(to, self.options.feed_travel)?;
        self.wait_idle()?;
        self.cur = Some(to);
        Ok(())
    }

    fn segment(&mut self, to: Point) -> Result<(), RunError> {
        self.control.check()?;
        self.device.draw_to(to)?;
        self.completed += 1;
        self.listener.progress(self.completed, self.total);
        if self.completed % self.options.flush_every == 0 {
            self.wait_idle()?;
        }
        Ok(())
    }

    fn draw_stroke(&mut self, stroke: &Stroke) -> Result<(), RunError> {
        let pts: Vec<Point> = stroke.oriented().collect();
        let offset = stroke.pressure();
        let mid = |i: usize| pts[i].lerp(pts[i + 1], 0.5);

        self.travel(pts[0])?;
        if let Some(feed) = stroke.feed() {
            self.device.set_draw_feed(feed);
        }

        let settle = self.options.settle_down();
        match self.options.z_mode {
            HeightPolicy::Start | HeightPolicy::Centroid => {
                let at = if self.options.z_mode == HeightPolicy::Start {
                    pts[0]
                } else {
                    stroke.centroid()
                };
                let z = self.device.compensated_pos(at, offset);
                self.pen_to(z, settle)?;
                for &p in &pts[1..] {
                    self.segment(p)?;
                }
            }
            HeightPolicy::PerSegment => {
                for i in 1..pts.len() {
                    let z = self.device.compensated_pos(mid(i - 1), offset);
                    let settle = if i == 1 { settle } else { Duration::ZERO };
                    self.pen_to(z, settle)?;
                    self.segment(pts[i])?;
                }
            }
            HeightPolicy::Threshold => {
                let mut held = self.device.compensated_pos(mid(0), offset);
                self.pen_to(held, settle)?;
                self.segment(pts[1])?;
                for i in 2..pts.len() {
                    let z = self.device.compensated_pos(mid(i - 1), offset);
                    if (z - held).abs() > self.options.z_threshold {
                        self.pen_to(z, Duration::ZERO)?;
                        held = z;
                    }
                    self.segment(pts[i])?;
                }
            }
        }

        self.wait_idle()?;
        let last = pts[pts.len() - 1];
        let z = self.lift_height(Some(last));
        self.pen_to(z, self.options.settle_up())?;
        self.cur = Some(last);
        Ok(())
    }

    fn return_home(&mut self) -> Result<(), RunError> {
        self.pen_to(1.0, self.options.settle_up())?;
        self.control.check()?;
        self.device
            .rapid_to(Point::origin(), self.options.feed_travel)?;
        self.wait_idle()?;
        self.cur = Some(Point::origin());
        Ok(())
    }
}

/// Prepares and draws `pattern` in one go, on this thread.
pub fn run<D: Device + ?Sized>(
    device: &mut D,
    pattern: &Pattern,
    run: &RunOptions,
    render: &RenderOptions,
    listener: &mut dyn RunListener,
) -> Result<RunSummary, RunError> {
    render.validate()?;
    let job = prepare(pattern, run)?;
    Renderer::new(device, render, &Unsupervised, listener).execute(&job, run)
}
