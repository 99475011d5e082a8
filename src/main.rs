use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use robovoice::config::{default_data_dir, stop_marker_in};
use robovoice::motion::{MotionMode, RobotActions, RosTopicActions, SimulatedActions};
use robovoice::voice::{
    AudioChannel, EspeakSpeech, IntentGate, OpenAiSpeech, SimulatedSpeech, SpeechSynthesizer,
    WhisperTranscriber,
};
use robovoice::{
    Config, ControllerOptions, ControllerParts, ConversationController, DeviceMode,
    DeviceRegistry, DeviceRole, LoadOptions, OpenAiChat, OpenAiVision, SessionState, StopSignal,
    SystemRunner, SystemScanner, VisionChannel,
};

/// Robovoice - talk to your robot, with or without its hardware
#[derive(Parser)]
#[command(name = "robovoice", version, about)]
struct Cli {
    /// Fail instead of simulating missing devices
    #[arg(long, conflicts_with = "simulate")]
    hardware_only: bool,

    /// Simulate every device
    #[arg(long)]
    simulate: bool,

    /// Seed for simulated devices
    #[arg(long)]
    seed: Option<u64>,

    /// Never move the robot body; action phrases go to the conversation
    #[arg(long)]
    no_motion: bool,

    /// Config file (default: ~/.config/robovoice/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ask a running session to stop, then exit
    #[arg(long)]
    stop: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve every device role and print the result
    Devices,
    /// Speak one line through the synthesis chain
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of my voice.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,robovoice=info",
        1 => "info,robovoice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.stop {
        return request_stop();
    }

    let options = LoadOptions {
        config_path: cli.config,
        hardware_only: cli.hardware_only,
        simulate: cli.simulate,
        seed: cli.seed,
        no_motion: cli.no_motion,
    };
    let config = Config::load(&options)?;
    tracing::debug!(?config, "loaded configuration");

    let parts = assemble(&config)?;

    match cli.command {
        Some(Command::Devices) => {
            list_devices(&parts.registry).await;
            Ok(())
        }
        Some(Command::Say { text }) => {
            parts.synthesizer.speak(&text, &parts.session).await?;
            Ok(())
        }
        None => converse(&config, parts).await,
    }
}

/// Write the stop marker a running session polls for
fn request_stop() -> anyhow::Result<()> {
    // No credential needed just to write a marker
    let data_dir =
        std::env::var("ROBOVOICE_DATA_DIR").map_or_else(|_| default_data_dir(), PathBuf::from);
    let marker = stop_marker_in(&data_dir);
    StopSignal::request_via_marker(&marker)?;
    println!("Stop requested ({})", marker.display());
    Ok(())
}

/// Wire every component from configuration
fn assemble(config: &Config) -> anyhow::Result<ControllerParts> {
    let client = reqwest::Client::new();
    let runner: Arc<SystemRunner> = Arc::new(SystemRunner);

    let scanner = Arc::new(SystemScanner::new(
        runner.clone(),
        config.devices.camera_paths.clone(),
    ));
    let registry = Arc::new(DeviceRegistry::new(config.registry_config(), scanner));

    let simulated = SimulatedSpeech::new(
        Some(config.devices.simulated_inbox.clone()),
        config.devices.simulated_utterances.clone(),
        config.devices.simulated_phrases.clone(),
    );
    let transcriber = Arc::new(WhisperTranscriber::new(
        client.clone(),
        config.api_key.clone(),
        config.voice.stt_model.clone(),
    ));
    let audio = Arc::new(AudioChannel::new(
        registry.clone(),
        runner.clone(),
        transcriber,
        simulated,
        config.retry.hardware.clone(),
        config.retry.network.clone(),
    ));

    let synthesizer = SpeechSynthesizer::new(audio.clone())
        .with_provider(
            Arc::new(OpenAiSpeech::new(
                client.clone(),
                config.api_key.clone(),
                config.voice.tts_model.clone(),
            )),
            config.retry.network.clone(),
        )
        .with_provider(
            Arc::new(EspeakSpeech::new(
                runner.clone(),
                config.voice.local_voice.clone(),
            )),
            config.retry.local.clone(),
        );

    let actions = robot_body(config, runner.clone());
    let vision = VisionChannel::new(registry.clone(), runner, config.retry.hardware.clone());
    let describer = Arc::new(OpenAiVision::new(
        client.clone(),
        config.api_key.clone(),
        config.assistant.vision_model.clone(),
        config.assistant.vision_prompt.clone(),
        config.assistant.max_tokens,
    ));
    let backend = Arc::new(OpenAiChat::new(
        client,
        config.api_key.clone(),
        &config.assistant,
    ));

    let gate = IntentGate::new(&config.voice.wake_phrase, &config.intents)?;
    let session = SessionState::new(
        config.voice.wake_word_enabled,
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    );

    Ok(ControllerParts {
        registry,
        audio,
        vision,
        synthesizer,
        backend,
        describer,
        gate,
        session,
        actions,
    })
}

/// Pick the body implementation for the configured motion mode
fn robot_body(config: &Config, runner: Arc<SystemRunner>) -> Option<Arc<dyn RobotActions>> {
    let ros = || -> Arc<dyn RobotActions> {
        Arc::new(RosTopicActions::new(
            runner.clone(),
            config.motion.topic_prefix.clone(),
            config.retry.hardware.clone(),
        ))
    };

    match config.motion.mode {
        MotionMode::Off => None,
        MotionMode::Ros => Some(ros()),
        MotionMode::Simulated => Some(Arc::new(SimulatedActions::new())),
        MotionMode::Auto if RosTopicActions::is_available(runner.as_ref()) => Some(ros()),
        // Hardware-only never simulates; actions report the missing body instead
        MotionMode::Auto if config.devices.mode == DeviceMode::Hardware => Some(ros()),
        MotionMode::Auto => {
            tracing::warn!("rostopic not found, simulating robot actions");
            Some(Arc::new(SimulatedActions::new()))
        }
    }
}

/// Resolve and print every role
async fn list_devices(registry: &DeviceRegistry) {
    println!("Device mode: {:?}\n", registry.mode());
    for role in DeviceRole::ALL {
        match registry.resolve(role).await {
            Ok(profile) => println!("  {profile}"),
            Err(e) => println!("  {role}: {e}"),
        }
    }
}

/// Run the conversation loop until stopped
async fn converse(config: &Config, parts: ControllerParts) -> anyhow::Result<()> {
    let stop = StopSignal::new().with_marker(config.stop_marker());

    let signal = stop.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, finishing current step");
        signal.request();
    });

    if config.voice.wake_word_enabled {
        tracing::info!("robovoice ready - say \"{}\"", config.voice.wake_phrase);
    } else {
        tracing::info!("robovoice ready (wake word disabled)");
    }

    let mut controller =
        ConversationController::new(parts, ControllerOptions::from_config(config), stop);
    controller.run().await?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
