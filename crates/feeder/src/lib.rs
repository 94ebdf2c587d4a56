//! Running pen plots.
//!
//! A run takes a [`Pattern`](penplot_geom::Pattern), optimizes a copy of it,
//! and streams it to a [`Device`](penplot_protocol::Device), stroke by stroke.
//! The [`renderer`] does the streaming; a [`Plotter`] owns a device and runs
//! one job at a time on a background thread, with pause, resume and cancel.

pub mod connection;
pub mod job;
pub mod preview;
pub mod renderer;
pub mod simulator;

pub use job::{JobError, JobHandle, JobState, JobStatus, Plotter};
pub use renderer::{
    prepare, run, Checkpoint, HeightPolicy, Prepared, RenderOptions, Renderer, RunError,
    RunListener, RunOptions, RunSummary, Unsupervised,
};
pub use simulator::{Event, EventLog, MockPlotter};
