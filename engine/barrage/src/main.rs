//! Headless script driver: compile a pattern script, run it for a fixed
//! number of frames, and print the phase outcomes.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use barrage::Engine;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: barrage <script> [frames]");
        return ExitCode::FAILURE;
    };
    let frames: u32 = args
        .next()
        .and_then(|f| f.parse().ok())
        .unwrap_or(3600);

    let src = match std::fs::read_to_string(&path) {
        Ok(src) => src,
        Err(e) => {
            eprintln!("error: could not read `{path}`: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (mut engine, completions) = Engine::headless();
    let handle = match engine.start_pattern(&src) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut ran = 0;
    while ran < frames && !handle.is_done() {
        engine.tick();
        ran += 1;
    }

    println!("ran {ran} frames");
    for pc in completions.borrow().iter() {
        println!(
            "phase {} ({:?}): {:?} with hits {}, meter {:+.1}, bombs {}",
            pc.index, pc.kind, pc.outcome, pc.hits_taken, pc.meter_gained, pc.bombs_used
        );
    }
    if !handle.is_done() {
        println!("pattern still running after {frames} frames");
    }
    engine.shutdown();
    ExitCode::SUCCESS
}
