use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context as _};
use clap::{Parser, Subcommand};
use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use penplot_feeder::{
    connection::{self, SerialTransport},
    prepare, preview, HeightPolicy, MockPlotter, Plotter, RenderOptions, RunError,
    RunOptions, RunSummary,
};
use penplot_geom::{Pattern, Point, StrokeRecord, Vector};
use penplot_planner::{PlanOptions, ResampleParams};
use penplot_protocol::{CompensationSurface, Device, DeviceConfig, GrblSession};
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
use serde::Deserialize;

const TICK: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(version, about = "Draws patterns on a GRBL pen plotter")]
struct Args {
    /// A JSON file with "device", "render" and "compensation" sections.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Draw a pattern file.
    Run(RunArgs),
    /// List the serial ports.
    Ports,
    /// Move the plotter around by hand.
    Manual {
        /// Use a simulated plotter instead of the serial port.
        #[arg(long)]
        simulate: bool,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// A JSON list of strokes.
    pattern: PathBuf,

    /// Don't connect to the plotter; write an SVG of what it would have done.
    #[arg(long, value_name = "OUT.svg")]
    simulate: Option<PathBuf>,

    /// Write an SVG of the optimized strokes, colored by pen.
    #[arg(long, value_name = "OUT.svg")]
    preview: Option<PathBuf>,

    /// Join strokes whose ends are this close together (in mm).
    #[arg(long, value_name = "MM", num_args = 0..=1, default_missing_value = "0.05")]
    combine: Option<f64>,

    /// Simplify strokes, allowing this much deviation (in mm).
    #[arg(long, value_name = "MM")]
    max_deviation: Option<f64>,

    /// Split segments longer than this (in mm).
    #[arg(long, value_name = "MM")]
    max_segment: Option<f64>,

    /// Reorder strokes to cut down on pen-up travel.
    #[arg(long)]
    reorder: bool,

    /// Stay where the drawing ends instead of going back to the origin.
    #[arg(long)]
    no_home: bool,

    /// Only draw these pens.
    #[arg(long, value_delimiter = ',', value_name = "PEN,...")]
    pens: Option<Vec<u32>>,

    /// How pen heights follow the compensation surface: start, centroid,
    /// per_segment or threshold.
    #[arg(long)]
    z_mode: Option<HeightPolicy>,
}

impl RunArgs {
    fn run_options(&self) -> RunOptions {
        let mut plan = PlanOptions::default();
        if let Some(tol) = self.combine {
            plan = plan.with_combine(tol);
        }
        if self.max_deviation.is_some() || self.max_segment.is_some() {
            plan = plan.with_resample(ResampleParams {
                max_deviation: self.max_deviation,
                max_segment: self.max_segment,
            });
        }
        if self.reorder {
            plan = plan.with_reorder(Point::origin());
        }
        RunOptions {
            plan,
            return_home: !self.no_home,
            pens: self
                .pens
                .as_ref()
                .map(|p| p.iter().copied().collect::<BTreeSet<_>>()),
            preview: false,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    device: DeviceConfig,
    render: RenderOptions,
    compensation: Option<CompensationSurface>,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConfigFile> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("couldn't read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("bad configuration in {}", path.display()))?
        }
        None => ConfigFile::default(),
    };
    config.device.validate()?;
    config.render.validate()?;
    Ok(config)
}

fn load_pattern(path: &Path) -> anyhow::Result<Pattern> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("couldn't read {}", path.display()))?;
    let records: Vec<StrokeRecord> = serde_json::from_str(&text)
        .with_context(|| format!("{} isn't a list of strokes", path.display()))?;
    Ok(Pattern::from_records(records)?)
}

fn spinner(msg: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(msg);
    bar.enable_steady_tick(TICK);
    bar
}

fn connect(config: DeviceConfig) -> anyhow::Result<GrblSession<SerialTransport>> {
    let bar = spinner("Connecting...");
    let port = config.port.clone();
    let session =
        connection::connect(config).with_context(|| format!("couldn't connect to {port}"))?;
    bar.finish_with_message("connected!");
    Ok(session)
}

async fn watch_keys<D: Device + 'static>(
    plotter: &Plotter<D>,
    bar: &ProgressBar,
    is_finished: impl Fn() -> bool,
) -> anyhow::Result<()> {
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let status = plotter.status();
                bar.set_length(status.total as u64);
                bar.set_position(status.completed as u64);
                if let Some(msg) = status.last_status {
                    bar.set_message(msg);
                }
                if is_finished() {
                    return Ok(());
                }
            }
            ev = events.next() => {
                let Some(ev) = ev.transpose()? else {
                    return Err(anyhow!("event stream ended"));
                };
                let Event::Key(key) = ev else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let res = match key.code {
                    KeyCode::Char('p') => plotter.pause(),
                    KeyCode::Char('r') => plotter.resume(),
                    KeyCode::Char('q') => plotter.cancel(),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        plotter.cancel()
                    }
                    _ => continue,
                };
                if let Err(e) = res {
                    bar.println(format!("{e}"));
                }
            }
        }
    }
}

async fn drive<D: Device + 'static>(
    plotter: &Plotter<D>,
    pattern: &Pattern,
    run: RunOptions,
    render: RenderOptions,
) -> anyhow::Result<Option<RunSummary>> {
    let handle = plotter.start(pattern, run, render)?;
    let bar = ProgressBar::new(plotter.status().total as u64).with_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} segments {msg}")?,
    );
    eprintln!("Keys: p to pause, r to resume, q to cancel.");

    enable_raw_mode()?;
    let keys = watch_keys(plotter, &bar, || handle.is_finished()).await;
    disable_raw_mode()?;
    if let Err(e) = keys {
        // Don't leave the plotter running with nobody watching.
        if let Err(cancel) = plotter.cancel() {
            log::warn!("couldn't cancel the run: {cancel}");
        }
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(_)) | Ok(Err(RunError::Cancelled)) => {}
            Ok(Err(run)) => log::warn!("the run failed while stopping: {run}"),
            Err(join) => log::warn!("couldn't wait for the run to stop: {join}"),
        }
        return Err(e);
    }

    let result = tokio::task::spawn_blocking(move || handle.join()).await?;
    bar.finish_with_message(plotter.status().last_status.unwrap_or_default());
    match result {
        Ok(summary) => Ok(Some(summary)),
        Err(RunError::Cancelled) => {
            eprintln!("Cancelled; the plotter is left in feed hold. Reset it before the next run.");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_pattern(args: &RunArgs, config: ConfigFile) -> anyhow::Result<()> {
    let pattern = load_pattern(&args.pattern)?;
    let run = args.run_options();
    let mut render = config.render;
    if let Some(z_mode) = args.z_mode {
        render.z_mode = z_mode;
    }

    let device = config.device;
    if !pattern.fits_within(device.x_max, device.y_max) {
        log::warn!(
            "the pattern doesn't fit on the {}x{} mm bed (bounding box {:?})",
            device.x_max,
            device.y_max,
            pattern.bounding_box()
        );
    }
    if let Some(path) = &args.preview {
        let prepared = prepare(&pattern, &run)?;
        preview::save(path, &prepared.pattern.records(), device.bed())
            .with_context(|| format!("couldn't write {}", path.display()))?;
        eprintln!("Wrote a preview to {}", path.display());
    }

    let summary = match &args.simulate {
        Some(out) => {
            let mut mock = MockPlotter::new(device);
            mock.set_compensation(config.compensation);
            let plotter = Plotter::new(mock);
            let summary = drive(&plotter, &pattern, run, render).await?;
            plotter
                .with_device(|m| m.write_svg(out))?
                .with_context(|| format!("couldn't write {}", out.display()))?;
            eprintln!("Wrote the simulated run to {}", out.display());
            summary
        }
        None => {
            let mut session = connect(device)?;
            session.set_compensation(config.compensation);
            let plotter = Plotter::new(session);
            drive(&plotter, &pattern, run, render).await?
        }
    };
    if let Some(summary) = summary {
        eprintln!(
            "Drew {} strokes ({} segments).",
            summary.strokes, summary.segments
        );
    }
    Ok(())
}

fn number(s: &str) -> anyhow::Result<f64> {
    s.parse().map_err(|_| anyhow!("expected a number, got {s:?}"))
}

fn manual_cmd<D: Device + 'static>(plotter: &Plotter<D>, words: &[&str]) -> anyhow::Result<()> {
    match words {
        ["goto", x, y] => plotter.goto(Point::new(number(x)?, number(y)?))?,
        ["live", x, y] => {
            if !plotter.queue_live_xy(Point::new(number(x)?, number(y)?)) {
                return Err(anyhow!("busy"));
            }
        }
        ["jog", dx, dy] => plotter.jog(Vector::new(number(dx)?, number(dy)?))?,
        ["pen", h] => plotter.pen_height(number(h)?)?,
        ["center"] => plotter.goto_center()?,
        ["origin"] => plotter.set_origin_here()?,
        ["status"] => {
            let status = plotter.device_status()?;
            eprintln!("{}", status.raw);
        }
        ["reset"] => plotter.soft_reset()?,
        _ => {
            return Err(anyhow!(
                "commands: goto X Y, live X Y, jog DX DY, pen H, center, origin, status, reset, quit"
            ))
        }
    }
    Ok(())
}

fn command_mode<D: Device + 'static>(plotter: &Plotter<D>) -> anyhow::Result<()> {
    let mut reed = Reedline::create();
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("penplot".to_owned()),
        DefaultPromptSegment::Empty,
    );
    loop {
        let line = match reed.read_line(&prompt)? {
            Signal::Success(s) => s,
            Signal::CtrlC | Signal::CtrlD => break,
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => continue,
            ["quit"] => break,
            words => {
                if let Err(e) = manual_cmd(plotter, words) {
                    eprintln!("error: {e}");
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match &args.command {
        Cmd::Run(run) => run_pattern(run, config).await?,
        Cmd::Ports => {
            for port in connection::list_ports()? {
                println!("{port}");
            }
        }
        Cmd::Manual { simulate: true } => {
            let mut mock = MockPlotter::new(config.device);
            mock.set_compensation(config.compensation);
            command_mode(&Plotter::new(mock))?;
        }
        Cmd::Manual { simulate: false } => {
            let mut session = connect(config.device)?;
            session.set_compensation(config.compensation);
            command_mode(&Plotter::new(session))?;
        }
    }

    Ok(())
}
