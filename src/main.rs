use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use aisle_guide::camera::SyntheticCamera;
use aisle_guide::engine::{self, Backends, Engine, SELF_CHECK_FRAMES};
use aisle_guide::input;
use aisle_guide::perception::LabelSet;
use aisle_guide::speech::{self, Interrupt, PlaybackEnd, SpeechWorker};
use aisle_guide::{CommandId, Config};

/// Aisle Guide - spoken answers about what the camera sees
#[derive(Parser)]
#[command(name = "aisle", version, about)]
struct Cli {
    /// Config file (default: ~/.config/aisle-guide/config.toml)
    #[arg(short, long, env = "AISLE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assistant (default)
    Run,
    /// Drive the pipeline on synthetic frames without camera or audio
    SelfCheck {
        /// Frames allowed before the check fails
        #[arg(short, long, default_value_t = SELF_CHECK_FRAMES)]
        frames: u32,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Say a sentence through the configured speech backend
    Say {
        #[arg(default_value = "Aisle guide is ready.")]
        text: String,
    },
    /// Print the banknote label vocabulary
    Labels,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,aisle_guide=info",
        1 => "info,aisle_guide=debug",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_engine(&config).await.map(|()| ExitCode::SUCCESS),
        Command::SelfCheck { frames, json } => cmd_self_check(&config, frames, json),
        Command::Say { text } => cmd_say(&config, text).await.map(|()| ExitCode::SUCCESS),
        Command::Labels => {
            cmd_labels(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_engine(config: &Config) -> anyhow::Result<()> {
    let perception = engine::build_perception(config, Backends::default());

    let sink = speech::probe_sink(
        config.speech.backend,
        config.speech.binary.as_deref(),
        &config.speech.voice,
        config.speech.rate,
    );
    tracing::info!(backend = sink.name(), "speech sink selected");
    let worker = SpeechWorker::spawn(sink)?;

    let (tx, rx) = mpsc::unbounded_channel();
    // Detached: blocks on stdin until a line or EOF arrives
    let _keyboard = input::spawn_keyboard(tx)?;

    tracing::warn!("no camera integration configured, using synthetic frames");
    let frames = Box::new(SyntheticCamera::new(config.camera.width, config.camera.height));

    let keys: Vec<String> = CommandId::ALL
        .iter()
        .map(|c| format!("{}={c}", c.key()))
        .collect();
    tracing::info!(keys = %keys.join(" "), "aisle guide ready, press q to quit");

    Engine::new(config, frames, perception, worker, rx).run().await?;
    Ok(())
}

fn cmd_self_check(config: &Config, frames: u32, json: bool) -> anyhow::Result<ExitCode> {
    let report = engine::self_check(config, frames)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Self-check: {}", if report.passed { "PASSED" } else { "FAILED" });
        println!("  dummy mode:   {}", report.dummy_mode);
        println!("  frames used:  {}/{}", report.frames_used, report.frame_budget);
        if let Some(decision) = &report.decision {
            println!(
                "  decision:     {} ({}/{} votes)",
                decision.label, decision.support_count, decision.window_size
            );
        }
        for t in &report.transitions {
            println!("  {} -> {}", t.from, t.to);
        }
        println!("  final state:  {}", report.final_state);
    }

    Ok(if report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_say(config: &Config, text: String) -> anyhow::Result<()> {
    let mut sink = speech::probe_sink(
        config.speech.backend,
        config.speech.binary.as_deref(),
        &config.speech.voice,
        config.speech.rate,
    );
    println!("Speaking with {} backend...", sink.name());

    let end = tokio::task::spawn_blocking(move || {
        let end = sink.speak(&text, &Interrupt::default());
        sink.release();
        end
    })
    .await??;

    if end == PlaybackEnd::Interrupted {
        println!("Playback interrupted");
    }
    Ok(())
}

fn cmd_labels(config: &Config) {
    let labels = LabelSet::load_or_default(&config.banknote.labels);
    println!("Banknote labels ({}):", config.banknote.labels.display());
    for (index, label) in labels.iter().enumerate() {
        println!("  {index} {label}");
    }
}
