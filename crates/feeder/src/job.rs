//! Running one job at a time in the background.
//!
//! A [`Plotter`] owns a device. Starting a job prepares the pattern on the
//! calling thread and then hands the device to a worker thread until the run
//! is over. Pause, resume and cancel are flags that the worker looks at in
//! its checkpoints; they also send the matching realtime byte, so the
//! machine stops moving right away instead of at the next checkpoint.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use penplot_geom::{Pattern, Point, StrokeRecord, Vector};
use penplot_protocol::{Device, PenRamp, Realtime, RealtimeLink, Status};

use crate::renderer::{
    prepare, Checkpoint, Prepared, RenderOptions, Renderer, RunError, RunListener, RunOptions,
    RunSummary,
};

// Live positioning moves at most 40 times a second.
const LIVE_PERIOD: Duration = Duration::from_millis(25);

// How often a manual operation that is waiting for the device checks
// whether a job has started.
const DEVICE_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Paused,
    /// Cancel was requested, but the worker hasn't noticed yet.
    Cancelling,
    Completed,
    Cancelled,
    Error,
}

impl JobState {
    /// Whether a job owns the device.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Running | JobState::Paused | JobState::Cancelling
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    /// Segments drawn so far.
    pub completed: usize,
    /// Segments in the whole job.
    pub total: usize,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
}

impl JobStatus {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("a job is already running")]
    AlreadyRunning,

    #[error("no job is running")]
    NotRunning,

    #[error("couldn't start the worker thread")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Device(#[from] penplot_protocol::Error),
}

#[derive(Default)]
struct Flags {
    paused: bool,
    cancelled: bool,
}

#[derive(Default)]
struct JobControl {
    flags: Mutex<Flags>,
    wake: Condvar,
}

impl JobControl {
    fn reset(&self) {
        *self.flags.lock() = Flags::default();
    }

    fn set_paused(&self, paused: bool) {
        self.flags.lock().paused = paused;
        self.wake.notify_all();
    }

    fn cancel(&self) {
        self.flags.lock().cancelled = true;
        self.wake.notify_all();
    }
}

impl Checkpoint for JobControl {
    fn check(&self) -> Result<(), RunError> {
        let mut flags = self.flags.lock();
        while flags.paused && !flags.cancelled {
            self.wake.wait(&mut flags);
        }
        if flags.cancelled {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn halted(&self) -> bool {
        let flags = self.flags.lock();
        flags.paused || flags.cancelled
    }
}

#[derive(Default)]
struct LiveState {
    target: Option<Point>,
    worker: bool,
}

struct Shared<D> {
    device: Mutex<D>,
    status: Mutex<JobStatus>,
    control: JobControl,
    // The running job's out-of-band channel to the device.
    link: Mutex<Option<RealtimeLink>>,
    live: Mutex<LiveState>,
    preview: Mutex<Option<Vec<StrokeRecord>>>,
}

struct JobListener<'a, D> {
    shared: &'a Shared<D>,
}

impl<D> RunListener for JobListener<'_, D> {
    fn status(&mut self, message: &str) {
        self.shared.status.lock().last_status = Some(message.to_owned());
    }

    fn progress(&mut self, completed: usize, total: usize) {
        let mut status = self.shared.status.lock();
        status.completed = completed;
        status.total = total;
    }

    fn preview(&mut self, strokes: &[StrokeRecord]) {
        *self.shared.preview.lock() = Some(strokes.to_vec());
    }
}

impl<D: Device + 'static> Shared<D> {
    fn is_running(&self) -> bool {
        self.status.lock().state.is_active()
    }

    /// Locks the device for something other than a job.
    ///
    /// Fails as soon as a job is active, even if the job started while we
    /// were waiting for the lock.
    fn lock_idle_device(&self) -> Result<MutexGuard<'_, D>, JobError> {
        loop {
            if self.is_running() {
                return Err(JobError::AlreadyRunning);
            }
            if let Some(device) = self.device.try_lock_for(DEVICE_POLL) {
                // A job may have been marked active after we last looked,
                // with its worker still waiting for this lock.
                if self.is_running() {
                    return Err(JobError::AlreadyRunning);
                }
                return Ok(device);
            }
        }
    }

    fn send_realtime(&self, cmd: Realtime) {
        if let Some(link) = self.link.lock().as_mut() {
            if let Err(e) = link.send(cmd) {
                log::warn!("failed to send {cmd:?}: {e}");
            }
        }
    }

    fn run_job(
        &self,
        job: Prepared,
        run: RunOptions,
        render: RenderOptions,
    ) -> Result<RunSummary, RunError> {
        let result = {
            let mut device = self.device.lock();
            let mut listener = JobListener { shared: self };
            Renderer::new(&mut *device, &render, &self.control, &mut listener).execute(&job, &run)
        };
        *self.link.lock() = None;

        let mut status = self.status.lock();
        match &result {
            Ok(_) => status.state = JobState::Completed,
            Err(RunError::Cancelled) => status.state = JobState::Cancelled,
            Err(e) => {
                status.state = JobState::Error;
                status.last_error = Some(e.to_string());
            }
        }
        result
    }

    fn live_loop(&self) {
        let mut last: Option<Instant> = None;
        loop {
            if let Some(last) = last {
                std::thread::sleep(LIVE_PERIOD.saturating_sub(last.elapsed()));
            }
            let target = {
                let mut live = self.live.lock();
                match live.target.take() {
                    Some(t) => t,
                    None => {
                        live.worker = false;
                        return;
                    }
                }
            };
            last = Some(Instant::now());

            let Ok(mut device) = self.lock_idle_device() else {
                log::debug!("dropping a live move, a job is running");
                continue;
            };
            if let Err(e) = device.travel_to(target) {
                log::warn!(
                    "live move to ({:.3}, {:.3}) failed: {e}",
                    target.x,
                    target.y
                );
            }
        }
    }
}

/// Waits for a job to finish.
pub struct JobHandle {
    thread: JoinHandle<Result<RunSummary, RunError>>,
}

impl JobHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<RunSummary, RunError> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A device, and the job (if any) that is running on it.
pub struct Plotter<D> {
    shared: Arc<Shared<D>>,
}

impl<D: Device + 'static> Plotter<D> {
    pub fn new(device: D) -> Self {
        Plotter {
            shared: Arc::new(Shared {
                device: Mutex::new(device),
                status: Mutex::new(JobStatus::default()),
                control: JobControl::default(),
                link: Mutex::new(None),
                live: Mutex::new(LiveState::default()),
                preview: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.shared.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// The strokes of the last job that asked for a preview.
    pub fn preview(&self) -> Option<Vec<StrokeRecord>> {
        self.shared.preview.lock().clone()
    }

    /// Prepares a copy of `pattern` and starts drawing it in the background.
    ///
    /// Bad options and bad patterns are reported here, before anything
    /// moves.
    pub fn start(
        &self,
        pattern: &Pattern,
        run: RunOptions,
        render: RenderOptions,
    ) -> Result<JobHandle, JobError> {
        if self.is_running() {
            return Err(JobError::AlreadyRunning);
        }
        render.validate()?;
        let job = prepare(pattern, &run)?;
        let link = self.shared.device.lock().realtime_link()?;

        {
            let mut status = self.shared.status.lock();
            if status.state.is_active() {
                return Err(JobError::AlreadyRunning);
            }
            self.shared.control.reset();
            *self.shared.link.lock() = Some(link);
            *status = JobStatus {
                state: JobState::Running,
                total: job.total,
                ..JobStatus::default()
            };
        }
        log::info!("starting a job with {} segments", job.total);

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("penplot-worker".to_owned())
            .spawn(move || shared.run_job(job, run, render));
        match spawned {
            Ok(thread) => Ok(JobHandle { thread }),
            Err(e) => {
                let mut status = self.shared.status.lock();
                status.state = JobState::Error;
                status.last_error = Some(e.to_string());
                *self.shared.link.lock() = None;
                Err(JobError::Spawn(e))
            }
        }
    }

    pub fn pause(&self) -> Result<(), JobError> {
        {
            let mut status = self.shared.status.lock();
            if status.state != JobState::Running {
                return Err(JobError::NotRunning);
            }
            status.state = JobState::Paused;
            self.shared.control.set_paused(true);
        }
        self.shared.send_realtime(Realtime::FeedHold);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), JobError> {
        {
            let mut status = self.shared.status.lock();
            if status.state != JobState::Paused {
                return Err(JobError::NotRunning);
            }
            status.state = JobState::Running;
            self.shared.control.set_paused(false);
        }
        self.shared.send_realtime(Realtime::CycleResume);
        Ok(())
    }

    pub fn cancel(&self) -> Result<(), JobError> {
        {
            let mut status = self.shared.status.lock();
            if !matches!(status.state, JobState::Running | JobState::Paused) {
                return Err(JobError::NotRunning);
            }
            status.state = JobState::Cancelling;
            self.shared.control.cancel();
        }
        self.shared.send_realtime(Realtime::FeedHold);
        Ok(())
    }

    /// Asks for the pen to be moved to `p` soon, with the pen up.
    ///
    /// Requests that come in faster than the plotter can follow replace
    /// each other, so only the newest one is guaranteed to be carried out.
    /// Returns false (and does nothing) while a job is running.
    pub fn queue_live_xy(&self, p: Point) -> bool {
        if self.is_running() {
            log::debug!("ignoring a live move, a job is running");
            return false;
        }
        let mut live = self.shared.live.lock();
        live.target = Some(p);
        if !live.worker {
            let shared = Arc::clone(&self.shared);
            let spawned = std::thread::Builder::new()
                .name("penplot-live".to_owned())
                .spawn(move || shared.live_loop());
            if let Err(e) = spawned {
                log::warn!("couldn't start live positioning: {e}");
                live.target = None;
                return false;
            }
            live.worker = true;
        }
        true
    }

    /// Runs `f` on the device, unless a job is using it.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> Result<R, JobError> {
        let mut device = self.shared.lock_idle_device()?;
        Ok(f(&mut device))
    }

    fn manual<R>(
        &self,
        f: impl FnOnce(&mut D) -> penplot_protocol::Result<R>,
    ) -> Result<R, JobError> {
        Ok(self.with_device(f)??)
    }

    pub fn goto(&self, p: Point) -> Result<(), JobError> {
        self.manual(|d| d.travel_to(p))
    }

    pub fn goto_center(&self) -> Result<(), JobError> {
        self.manual(|d| d.goto_center())
    }

    pub fn jog(&self, by: Vector) -> Result<(), JobError> {
        self.manual(|d| d.jog_by(by, None))
    }

    pub fn pen_height(&self, pos: f64) -> Result<(), JobError> {
        self.manual(|d| d.pen_set(pos, PenRamp::default()))
    }

    pub fn set_origin_here(&self) -> Result<(), JobError> {
        self.manual(|d| d.set_origin_here())
    }

    pub fn device_status(&self) -> Result<Status, JobError> {
        self.manual(|d| d.query_status())
    }

    pub fn soft_reset(&self) -> Result<(), JobError> {
        self.manual(|d| d.realtime(Realtime::SoftReset))
    }
}
