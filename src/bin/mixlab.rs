// Plays the .wav files given on the command line through the default output
// device, all at once, and draws a coarse spectrum until every track has
// finished. With no arguments a pair of test tones is used instead.
//
//   RUST_LOG=debug mixlab drums.wav bass.wav

use std::cell::Cell;
use std::error::Error;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use mixlab::{ChangeCause, EngineConfig, MixEngine, TransportState, WaveformType, format_time};

const BANDS: usize = 32;
const SHADES: &[u8] = b" .:-=+*#%@";

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut engine = MixEngine::with_default_output(EngineConfig::default())?;
    let paths: Vec<String> = std::env::args().skip(1).collect();

    if paths.is_empty() {
        let rate = engine.config().sample_rate;
        let low = engine.load_track(WaveformType::Sine.tone(220.0, 0.4, 4.0, rate), "sine 220")?;
        let high = engine.load_track(WaveformType::Triangle.tone(330.0, 0.3, 3.0, rate), "triangle 330")?;
        engine.set_track_pan(low, -0.6);
        engine.set_track_pan(high, 0.6);
    }

    for path in &paths {
        if let Err(e) = engine.load_track_file(path) {
            log::error!("Skipping {}: {}", path, e);
        }
    }

    if engine.track_count() == 0 {
        return Err("nothing to play".into());
    }

    let finished = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&finished);
    engine.on_transport_change(move |change| {
        if change.cause == ChangeCause::EndOfBuffer {
            counter.set(counter.get() + 1);
        }
    });

    for (handle, e) in engine.play_all() {
        log::error!("Track {} did not start: {}", handle, e);
    }

    let started = std::time::Instant::now();
    while engine.tracks().any(|t| t.transport_state() == TransportState::Playing) {
        engine.process_events();

        let spectrum = engine.analyzer().sample_spectrum();
        let per_band = (spectrum.len() / BANDS).max(1);
        let bars: String = spectrum
            .chunks(per_band)
            .take(BANDS)
            .map(|band| {
                let peak = band.iter().copied().max().unwrap_or(0) as usize;
                SHADES[peak * (SHADES.len() - 1) / 255] as char
            })
            .collect();

        print!("\r{} [{}]", format_time(started.elapsed().as_secs_f64()), bars);
        std::io::stdout().flush()?;
        std::thread::sleep(Duration::from_millis(33));
    }

    println!();
    log::info!("{} of {} tracks ran to the end", finished.get(), engine.track_count());
    Ok(())
}
