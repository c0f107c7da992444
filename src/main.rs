use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use echo_bridge::app::{App, AppExit, InMemoryStore};
use echo_bridge::voice::{
    AudioClip, AudioPlayback, AudioSource, ListenOutcome, MicrophoneSource, PLAYBACK_SAMPLE_RATE,
    VoiceEngine, resample, speech_from_config, transcriber_from_config,
};
use echo_bridge::{Config, Interpreter, Lexicon};

/// Echo Bridge - hands-free voice control for messaging
#[derive(Parser)]
#[command(name = "echo-bridge", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the voice-driven chat app (default)
    Run,
    /// Listen once and print what was recognized
    Listen,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Transcribe a WAV file with the configured service
    Transcribe {
        /// Path to a WAV file
        file: PathBuf,
    },
    /// Score a spoken name against a list of names
    Match {
        /// What was said
        query: String,
        /// Candidate names
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,echo_bridge=info",
        1 => "info,echo_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
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
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_app().await,
        Command::Listen => listen_once().await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&text).await,
        Command::Transcribe { file } => transcribe(&file).await,
        Command::Match { query, names } => match_names(&query, names),
    }
}

/// Run the chat app until a screen ends it or Ctrl-C
async fn run_app() -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let engine = Arc::new(VoiceEngine::from_config(&config));
    let mut app = App::new(Arc::clone(&engine), Arc::new(InMemoryStore::demo()));

    tracing::info!("echo bridge ready - listening on the chats screen");

    let exit = tokio::select! {
        exit = app.run() => exit,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            engine.capture().stop_capture();
            return Ok(());
        }
    };

    match exit {
        AppExit::Finished(reason) => {
            tracing::info!(?reason, "app finished");
            Ok(())
        }
        AppExit::PermissionDenied => anyhow::bail!("microphone access denied"),
        AppExit::Halted => anyhow::bail!("microphone stopped working"),
    }
}

/// One listen cycle on a fresh mount
async fn listen_once() -> anyhow::Result<()> {
    let config = Config::load()?;
    let engine = VoiceEngine::from_config(&config);
    let mount = engine.mount();

    println!(
        "Listening for {:.1} seconds...",
        config.voice.capture_window.as_secs_f32()
    );

    let ticket = mount.session.start()?;
    match ticket.outcome().await {
        ListenOutcome::Recognized => {
            let text = mount.session.take_recognized_text().unwrap_or_default();
            println!("Recognized: \"{text}\"");
        }
        ListenOutcome::Failed(e) => println!("Nothing recognized: {e}"),
        ListenOutcome::Cancelled => println!("Cancelled"),
    }

    engine.unmount(&mount.session);
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut mic = MicrophoneSource::new(echo_bridge::voice::SAMPLE_RATE);
    mic.request_permission()?;
    mic.start()?;

    println!("Sample rate: {} Hz", mic.device_rate());
    println!("---");

    let mut seen = 0;
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = mic.peek_samples();
        let second = &samples[seen.min(samples.len())..];
        seen = samples.len();

        let energy = calculate_rms(second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    mic.stop()?;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!(
        "Playing {} samples at {} Hz...",
        samples.len(),
        PLAYBACK_SAMPLE_RATE
    );

    tokio::task::spawn_blocking(move || {
        let playback = AudioPlayback::new(Arc::new(AtomicBool::new(false)))?;
        playback.play_samples_blocking(samples)
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test the configured speech engine
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    println!("Provider: {:?}", config.voice.tts_provider);

    let speech = speech_from_config(&config);
    speech.speak(text).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Transcribe a WAV file
async fn transcribe(path: &Path) -> anyhow::Result<()> {
    let config = Config::load()?;

    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    let samples = resample(&mono, spec.sample_rate, config.voice.sample_rate)?;
    let clip = AudioClip::from_samples(&samples, config.voice.sample_rate)?;

    println!(
        "Transcribing {:.1}s with {}...",
        clip.duration().as_secs_f32(),
        config.voice.stt_provider
    );

    let transcriber = transcriber_from_config(&config);
    let text = transcriber.transcribe(clip).await?;
    println!("{text}");

    Ok(())
}

/// Print every name's similarity to the query
fn match_names(query: &str, names: Vec<String>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let interpreter = Interpreter::from_config(&config.matching);
    let lexicon: Lexicon<()> = names.into_iter().map(|n| (n, ())).collect();

    for (name, score) in interpreter.scores(query, &lexicon) {
        println!("{score:.3}  {name}");
    }

    match interpreter.best_match(query, &lexicon) {
        Some(best) => println!("\nBest match: {} ({:.3})", best.name, best.score),
        None => println!(
            "\nNo name reached the threshold of {:.2}",
            interpreter.threshold()
        ),
    }

    Ok(())
}
