/// Run the recognition pipeline over a stream and print one JSON result per line
///
/// Sources:
/// - `synthetic` renders a moving box (no files needed)
/// - a directory of images, processed in file-name order
/// - a single image file
///
/// Controls (type the key, then Enter): p pause, m manual override,
/// e emergency stop, l toggle explanations, q quit
///
/// Usage:
///   cargo run --release --example run_stream -- [--config app.json] [--frames N] <source>
///
/// Examples:
///   RUST_LOG=debug cargo run --example run_stream -- synthetic
///   cargo run --release --example run_stream -- --config app.json test_data/signs/
use roadwatch::{
    AppConfig, CaptureBackend, ControlKey, ControlListener, ImageDirBackend, Session,
    SharedControl, SyntheticBackend,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut config_path: Option<String> = None;
    let mut max_frames: Option<u64> = None;
    let mut source: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config_path = Some(args[i + 1].clone());
                i += 1;
            }
            "--frames" if i + 1 < args.len() => {
                max_frames = Some(args[i + 1].parse()?);
                i += 1;
            }
            other => source = Some(other.to_string()),
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(source) = source {
        config.runtime.source = source;
    }
    if max_frames.is_some() {
        config.runtime.max_frames = max_frames;
    }

    let backend: Arc<dyn CaptureBackend> = if config.runtime.source == "synthetic" {
        Arc::new(SyntheticBackend::new(640, 480, 300))
    } else {
        Arc::new(ImageDirBackend)
    };

    let control = SharedControl::default();
    let mut listener = ControlListener::spawn(control.clone())?;

    // Stdin reader is left detached: a blocked read cannot be interrupted
    let keys = listener.sender();
    thread::spawn(move || {
        for line in io::stdin().lock().lines().map_while(Result::ok) {
            for key in line.chars().filter_map(ControlKey::from_char) {
                if keys.send(key).is_err() {
                    return;
                }
            }
        }
    });

    log::info!("roadwatch {} starting on '{}'", roadwatch::version(), config.runtime.source);
    let mut session = Session::open(&config, control, backend)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for result in session.results() {
        writeln!(out, "{}", result.to_json()?)?;
    }

    session.stop();
    listener.stop();

    let source_stats = session.source_stats();
    let pipeline_stats = session.pipeline_stats();
    log::info!(
        "Done: {} captured, {} dropped, {} processed, {} explanation calls",
        source_stats.frames_captured,
        source_stats.frames_evicted,
        pipeline_stats.frames_processed,
        pipeline_stats.explanation_calls
    );
    Ok(())
}
