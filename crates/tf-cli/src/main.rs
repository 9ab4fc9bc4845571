//! TempoForge command line front end
//!
//! Thin glue over the engine: parse tempo and subdivision, pick a click
//! backend and scheduling strategy, run for a while.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tf_audio::{NullSink, StreamingPcmSink, ThreadPriorityHint, ToneSink};
use tf_core::Subdivision;
use tf_engine::{EngineConfig, Metronome, SchedulerStrategy};

#[derive(Parser)]
#[command(name = "tempoforge", about = "Drift-free command line metronome")]
struct Cli {
    /// Tempo in beats per minute (clamped to 30..=300)
    #[arg(short, long, default_value_t = 120)]
    bpm: u32,

    /// Click steps per beat: 1, 2, 3 or 4
    #[arg(short, long, default_value_t = 1)]
    subdivision: u32,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Auto)]
    strategy: StrategyArg,

    /// Click backend
    #[arg(long, value_enum, default_value_t = BackendArg::Stream)]
    backend: BackendArg,

    /// How long to run, in seconds; 0 runs until the process is killed
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Keep the scheduler at normal thread priority
    #[arg(long)]
    no_realtime: bool,

    /// Print every tick
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    /// Stream-clocked when the stream backend is up, wall-clock otherwise
    Auto,
    Stream,
    Wall,
    Timer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// PCM clicks through the default output device
    Stream,
    /// Terminal bell
    Tone,
    /// No audio, tick events only
    Silent,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let subdivision = match Subdivision::from_steps(cli.subdivision) {
        Ok(sub) => sub,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    let priority = if cli.no_realtime {
        ThreadPriorityHint::Normal
    } else {
        ThreadPriorityHint::Realtime
    };

    // Audio init failure is not fatal: the engine still ticks silently.
    let (engine, strategy) = match cli.backend {
        BackendArg::Stream => match StreamingPcmSink::new() {
            Ok(sink) => {
                log::info!("streaming backend ready at {} Hz", sink.sample_rate());
                let strategy = resolve_strategy(cli.strategy, true);
                let config = EngineConfig { strategy, priority };
                (Metronome::with_streaming_sink(sink, config), strategy)
            }
            Err(e) => {
                log::error!("audio output unavailable ({}), continuing without clicks", e);
                let strategy = resolve_strategy(cli.strategy, false);
                let config = EngineConfig { strategy, priority };
                (Metronome::new(Arc::new(NullSink::new()), config), strategy)
            }
        },
        BackendArg::Tone => {
            let strategy = resolve_strategy(cli.strategy, false);
            let config = EngineConfig { strategy, priority };
            (Metronome::new(Arc::new(ToneSink::new()), config), strategy)
        }
        BackendArg::Silent => {
            let strategy = resolve_strategy(cli.strategy, false);
            let config = EngineConfig { strategy, priority };
            (Metronome::new(Arc::new(NullSink::new()), config), strategy)
        }
    };

    engine.set_subdivision(subdivision);

    if cli.verbose {
        let ticks = engine.subscribe();
        std::thread::spawn(move || {
            for event in ticks.iter() {
                if event.accent {
                    println!("TICK  [{}]", event.sub_index);
                } else {
                    println!(" tick [{}]", event.sub_index);
                }
            }
        });
    }

    engine.start(cli.bpm);
    println!(
        "{} bpm, {} subdivision, {:?} strategy",
        engine.bpm(),
        engine.subdivision(),
        strategy
    );

    if cli.seconds == 0 {
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }
    std::thread::sleep(Duration::from_secs(cli.seconds));
    engine.stop();
}

fn resolve_strategy(arg: StrategyArg, stream_available: bool) -> SchedulerStrategy {
    match arg {
        StrategyArg::Auto => {
            if stream_available {
                SchedulerStrategy::StreamClocked
            } else {
                SchedulerStrategy::WallClock
            }
        }
        StrategyArg::Stream => SchedulerStrategy::StreamClocked,
        StrategyArg::Wall => SchedulerStrategy::WallClock,
        StrategyArg::Timer => SchedulerStrategy::OsCallback,
    }
}
