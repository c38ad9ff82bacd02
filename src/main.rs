use anyhow::{anyhow, Result};
use audioscope::audio::{self, AudioCapture, DEFAULT_WINDOW_SIZE};
use clap::{Parser, Subcommand};
use jiff::Zoned;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "audioscope")]
#[command(about = "Microphone spectral capture and monitoring")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio input devices
    Devices,

    /// Render live frequency bars in the terminal
    Monitor {
        /// Analysis window size in samples (power of two)
        #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window_size: usize,

        /// How long to monitor, in seconds
        #[arg(long, default_value = "10")]
        duration: u64,

        /// Number of bars to draw
        #[arg(long, default_value = "32")]
        bars: usize,
    },

    /// Print one frequency and waveform snapshot as JSON
    Snapshot {
        /// Analysis window size in samples (power of two)
        #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window_size: usize,
    },

    /// Record the captured waveform to a WAV file
    Record {
        /// Recording duration in seconds
        #[arg(long, default_value = "5")]
        duration: u64,

        /// Output path (defaults to a timestamped file in the local data dir)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Analysis window size in samples (power of two)
        #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window_size: usize,
    },
}

fn get_captures_dir() -> Result<PathBuf> {
    let data_dir = directories::BaseDirs::new()
        .ok_or_else(|| anyhow!("Could not find data directory"))?
        .data_local_dir()
        .join("audioscope")
        .join("captures");

    // Create directory if it doesn't exist
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

fn get_capture_path() -> Result<PathBuf> {
    let captures_dir = get_captures_dir()?;
    let timestamp = Zoned::now().strftime("%Y-%m-%d_%H-%M-%S");
    Ok(captures_dir.join(format!("{}.wav", timestamp)))
}

#[derive(Serialize)]
struct Snapshot {
    device: String,
    sample_rate: u32,
    window_size: usize,
    frequency: Vec<u8>,
    waveform: Vec<u8>,
}

/// Collapse frequency bins into a fixed number of terminal bar glyphs
fn render_bars(frequency: &[u8], bars: usize) -> String {
    const LEVELS: [char; 9] = [' ', '\u{2581}', '\u{2582}', '\u{2583}', '\u{2584}', '\u{2585}', '\u{2586}', '\u{2587}', '\u{2588}'];

    let bars = bars.max(1);
    let chunk_size = (frequency.len() / bars).max(1);

    frequency
        .chunks(chunk_size)
        .take(bars)
        .map(|chunk| {
            let avg = chunk.iter().map(|&b| b as usize).sum::<usize>() / chunk.len();
            LEVELS[avg * (LEVELS.len() - 1) / 255]
        })
        .collect()
}

async fn run_monitor(capture: &mut AudioCapture, duration: u64, bars: usize) -> Result<()> {
    capture
        .initialize()
        .await
        .map_err(|e| anyhow!("Failed to start capture: {}", e))?;

    if let Some(info) = capture.stream_info() {
        println!("Capturing from {} at {} Hz", info.device_name, info.sample_rate);
    }

    let deadline = Instant::now() + Duration::from_secs(duration);
    let mut ticker = tokio::time::interval(Duration::from_millis(50));

    while Instant::now() < deadline {
        ticker.tick().await;

        let Some(frequency) = capture.frequency_data() else {
            break;
        };
        let line = render_bars(frequency, bars);
        print!("\r{}", line);
        std::io::stdout().flush()?;
    }

    println!();
    Ok(())
}

async fn run_snapshot(capture: &mut AudioCapture) -> Result<()> {
    capture
        .initialize()
        .await
        .map_err(|e| anyhow!("Failed to start capture: {}", e))?;

    let info = capture
        .stream_info()
        .cloned()
        .ok_or_else(|| anyhow!("No stream info after initialization"))?;

    // Let the pipeline see at least one full window before sampling
    let window_millis = capture.window_size() as u64 * 1000 / info.sample_rate as u64;
    tokio::time::sleep(Duration::from_millis(window_millis.max(100))).await;

    let snapshot = Snapshot {
        device: info.device_name,
        sample_rate: info.sample_rate,
        window_size: capture.window_size(),
        frequency: capture
            .frequency_data()
            .map(|s| s.to_vec())
            .ok_or_else(|| anyhow!("Capture session lost"))?,
        waveform: capture
            .waveform_data()
            .map(|s| s.to_vec())
            .ok_or_else(|| anyhow!("Capture session lost"))?,
    };

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn run_record(capture: &mut AudioCapture, duration: u64, output: Option<PathBuf>) -> Result<()> {
    capture
        .initialize()
        .await
        .map_err(|e| anyhow!("Failed to start capture: {}", e))?;

    let info = capture
        .stream_info()
        .cloned()
        .ok_or_else(|| anyhow!("No stream info after initialization"))?;

    let output_path = match output {
        Some(path) => path,
        None => get_capture_path()?,
    };

    println!(
        "Recording {}s from {} at {} Hz",
        duration, info.device_name, info.sample_rate
    );

    // Sample the waveform once per window so consecutive snapshots line up
    // approximately end to end
    let window_millis = capture.window_size() as u64 * 1000 / info.sample_rate as u64;
    let mut ticker = tokio::time::interval(Duration::from_millis(window_millis.max(1)));
    let deadline = Instant::now() + Duration::from_secs(duration);

    let mut samples = Vec::new();
    while Instant::now() < deadline {
        ticker.tick().await;
        let Some(waveform) = capture.waveform_data() else {
            break;
        };
        samples.extend_from_slice(waveform);
    }

    audio::waveform_to_wav(&samples, &output_path, info.sample_rate)?;
    println!(
        "Wrote {:.1}s of audio to {}",
        samples.len() as f32 / info.sample_rate as f32,
        output_path.display()
    );
    Ok(())
}

fn run_devices() -> Result<()> {
    let devices = audio::list_devices().map_err(|e| anyhow!("Failed to list audio devices: {}", e))?;

    println!("Available Audio Devices:");
    println!(
        "{:<30} {:<10} {:<20} Formats",
        "Name", "Default", "Sample Rates"
    );
    println!("{}", "-".repeat(80));

    for device in devices {
        let default_str = if device.is_default { "YES" } else { "NO" };
        let sample_rates = device
            .supported_sample_rates
            .iter()
            .take(3)
            .map(|sr| sr.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let formats = device
            .supported_formats
            .iter()
            .take(2)
            .map(|f| format!("{:?}", f))
            .collect::<Vec<_>>()
            .join(", ");

        println!(
            "{:<30} {:<10} {:<20} {}",
            &device.name[..device.name.len().min(30)],
            default_str,
            sample_rates,
            formats
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Devices => run_devices(),

        Commands::Monitor {
            window_size,
            duration,
            bars,
        } => {
            let mut capture = AudioCapture::new(window_size);
            let result = run_monitor(&mut capture, duration, bars).await;
            // Release the device on every exit path, including errors
            capture.close();
            result
        }

        Commands::Snapshot { window_size } => {
            let mut capture = AudioCapture::new(window_size);
            let result = run_snapshot(&mut capture).await;
            capture.close();
            result
        }

        Commands::Record {
            duration,
            output,
            window_size,
        } => {
            let mut capture = AudioCapture::new(window_size);
            let result = run_record(&mut capture, duration, output).await;
            capture.close();
            result
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_bars_length() {
        let frequency = vec![0u8; 1024];
        assert_eq!(render_bars(&frequency, 32).chars().count(), 32);
    }

    #[test]
    fn test_render_bars_silence_is_blank() {
        let frequency = vec![0u8; 128];
        let line = render_bars(&frequency, 16);
        assert!(line.chars().all(|c| c == ' '));
    }

    #[test]
    fn test_render_bars_full_scale_is_solid() {
        let frequency = vec![255u8; 128];
        let line = render_bars(&frequency, 16);
        assert!(line.chars().all(|c| c == '\u{2588}'));
    }
}
