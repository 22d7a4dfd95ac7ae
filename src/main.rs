use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use spectra_speech::voice::{AudioCapture, CpalPlayback, PlaybackEngine, samples_to_wav};
use spectra_speech::{Config, Priority, SpeechIo};

/// Spectra - speech I/O for the accessibility assistant
#[derive(Parser)]
#[command(name = "spectra", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak text through the TTS service
    Speak {
        /// Text to speak
        text: String,
        /// Voice name (defaults to the configured voice)
        #[arg(long, env = "SPECTRA_TTS_VOICE")]
        voice: Option<String>,
        /// Speak as a protected request
        #[arg(long)]
        protected: bool,
    },
    /// Listen for one utterance and print the transcript
    Listen {
        /// Seconds to wait per attempt
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Restarts after a timed-out attempt
        #[arg(short, long)]
        retries: Option<u32>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,spectra_speech=info",
        1 => "info,spectra_speech=debug",
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
    match cli.command {
        Command::Speak {
            text,
            voice,
            protected,
        } => speak(&text, voice, protected).await,
        Command::Listen { timeout, retries } => listen(timeout, retries).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestMic { duration } => test_mic(duration).await,
    }
}

async fn speak(text: &str, voice: Option<String>, protected: bool) -> anyhow::Result<()> {
    let config = Config::load();
    let voice = voice.unwrap_or_else(|| config.tts.default_voice.clone());
    let speech = SpeechIo::from_config(config)?;

    let priority = if protected {
        Priority::Protected
    } else {
        Priority::Normal
    };

    tokio::select! {
        result = speech.synthesizer().speak(text, &voice, priority) => result?,
        _ = tokio::signal::ctrl_c() => {
            speech.synthesizer().cancel_all();
            tracing::info!("interrupted");
        }
    }

    Ok(())
}

async fn listen(timeout: Option<u64>, retries: Option<u32>) -> anyhow::Result<()> {
    let mut config = Config::load();
    if let Some(secs) = timeout {
        config.listener.timeout_secs = secs;
    }
    if let Some(retries) = retries {
        config.listener.max_retries = retries;
    }

    let speech = SpeechIo::from_config(config)?;
    println!("Listening... speak now\n");

    let transcript = speech.hear(|partial| println!("  ... {partial}")).await?;
    match transcript {
        Some(text) => println!("{text}"),
        None => println!("No speech recognized"),
    }

    Ok(())
}

async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = CpalPlayback::new()?;

    // 2 seconds of 440Hz sine wave at 24kHz
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    let wav = samples_to_wav(&samples, sample_rate)?;
    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    playback.play(wav.into(), CancellationToken::new()).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let capture = AudioCapture::open()?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.drain();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    drop(capture);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
