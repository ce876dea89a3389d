//! replay - run a detection session over a recorded JSON-lines file
//!
//! Each line is one frame: a bare array of detections or an object with a
//! `detections` array. Alerts are written to stdout as JSON lines; the dedup
//! summary goes to stderr.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use classroom_sentinel::config::SentinelConfig;
use classroom_sentinel::{now_s, DetectionSession, JsonLinesSink, ScriptedSource};

#[derive(Parser, Debug)]
#[command(name = "replay", about = "Replay recorded detections through the alert pipeline")]
struct Args {
    /// JSON-lines detection file, one frame per line.
    input: PathBuf,
    /// Session id stamped on every alert.
    #[arg(long, default_value = "replay")]
    session: String,
    /// Frames per second of the recording.
    #[arg(long, default_value_t = 10.0)]
    fps: f64,
    /// Epoch seconds of the first frame (defaults to now).
    #[arg(long)]
    start: Option<f64>,
    /// Config file (JSON or TOML). Overrides SENTINEL_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print per-frame record decisions to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if !args.fps.is_finite() || args.fps <= 0.0 {
        return Err(anyhow!("fps must be > 0"));
    }

    let cfg = match args.config.as_deref() {
        Some(path) => SentinelConfig::from_path(path)?,
        None => SentinelConfig::load()?,
    };
    let aggregator = cfg.build_aggregator()?;
    log::info!(
        "rules from {} source, ttl {}s",
        aggregator.engine().source_name(),
        aggregator.engine().ttl_s()
    );

    let file = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let mut source = ScriptedSource::from_json_lines(BufReader::new(file))?;
    log::info!(
        "replaying {} frames from {}",
        source.remaining(),
        args.input.display()
    );

    let sink = JsonLinesSink::new(std::io::stdout());
    let mut session = DetectionSession::from_config(&args.session, &cfg, aggregator)
        .with_sink(Box::new(sink));

    let start = args.start.unwrap_or_else(now_s);
    let verbose = args.verbose;
    let frames = session.run_source(&mut source, start, 1.0 / args.fps, |report| {
        if !verbose {
            return;
        }
        for t in &report.tracked {
            eprintln!(
                "frame {:>5} track {:>4} {:<12} {}",
                report.frame_index, t.track_id, t.detection.class_name, t.reason
            );
        }
    })?;

    let stats = session.stats();
    eprintln!("frames:              {}", frames);
    eprintln!("alerts:              {}", session.alerts_emitted());
    eprintln!("detections:          {}", stats.total_detections);
    eprintln!("recorded:            {}", stats.recorded_count);
    eprintln!("skipped (same):      {}", stats.skipped_same_behavior);
    eprintln!("skipped (cooldown):  {}", stats.skipped_cooldown);
    eprintln!("dedup rate:          {:.1}%", stats.dedup_rate * 100.0);
    for (behavior, count) in session.active_behavior_counts() {
        eprintln!("active {:<12} {}", behavior, count);
    }
    Ok(())
}
