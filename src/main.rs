use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use zoul_voice::completion::{CompletionDispatcher, OpenAiCompletion};
use zoul_voice::voice::{
    AudioBuffer, AudioCapture, AudioOutput, AudioPlaybackEngine, OpenAiSpeech, SpeechSynthesizer,
    SystemVoice, rms,
};
use zoul_voice::{Config, Daemon};

/// Zoul - hands-free voice assistant
#[derive(Parser)]
#[command(name = "zoul", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (text-only via the status API)
    #[arg(long, env = "ZOUL_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
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
    /// Ask a question and print the reply
    Ask {
        /// The question
        text: String,
    },
    /// List local system voices
    Voices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,zoul_voice=info",
        1 => "info,zoul_voice=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
            Command::Ask { text } => ask(&text).await,
            Command::Voices => list_voices().await,
        };
    }

    tracing::info!(disable_voice = cli.disable_voice, "starting zoul");

    let config = Config::load_with_options(cli.disable_voice);
    tracing::debug!(?config, "loaded configuration");

    if config.voice.enabled {
        if config.settings.wake_word_enabled {
            tracing::info!("zoul ready - say \"{}\"", config.voice.wake_phrase);
        } else {
            tracing::info!("zoul ready (wake word off, start capture from the dashboard)");
        }
    } else {
        tracing::info!("zoul ready (text-only mode, voice disabled)");
    }

    Daemon::new(config).run().await?;

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]",
            i + 1
        );

        if let Some(failure) = capture.take_failure() {
            println!("Stream error: {failure}");
        }
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a faded sine tone
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds, fading in and out\n");

    let tone = AudioBuffer::tone(440.0, Duration::from_secs(2), 24_000);
    println!("Playing {} samples at {} Hz...", tone.samples.len(), tone.sample_rate);

    AudioPlaybackEngine::new().play(tone).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output through the full speech path
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load();
    let synthesizer = SpeechSynthesizer::new(
        Arc::new(OpenAiSpeech::new(&config.voice)),
        Arc::new(AudioPlaybackEngine::new()),
        Arc::new(SystemVoice::new()),
    );

    if config.settings.credential().is_none() {
        println!("No API key configured; using the local system voice");
    }

    let route = synthesizer
        .speak(text, config.settings.credential())
        .await?;

    println!("\n---");
    println!("Spoken via {route:?} route. If you heard the speech, TTS is working!");

    Ok(())
}

/// Run one completion and print the reply
async fn ask(text: &str) -> anyhow::Result<()> {
    let config = Config::load();
    let dispatcher =
        CompletionDispatcher::new(Arc::new(OpenAiCompletion::new(&config.completion)));

    let reply = dispatcher.reply(&[], text, &config.settings).await?;
    println!("{reply}");

    Ok(())
}

/// List voices offered by the local synthesizer
async fn list_voices() -> anyhow::Result<()> {
    let voice = SystemVoice::new();
    if !voice.is_available() {
        anyhow::bail!("no local speech synthesizer found (tried espeak-ng, espeak, say, spd-say)");
    }

    for info in voice.voices().await? {
        println!("{:<24} {}", info.id, info.description);
    }

    Ok(())
}
