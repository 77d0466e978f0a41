// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{crate_version, Parser, Subcommand};
use pcmbank::assets::{AssetSource, DirectoryAssetSource};
use pcmbank::decoder::{self, PcmFormat};
use pcmbank::output;
use pcmbank::{Engine, EngineConfig, PlayOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How long `play` waits for a voice to finish before giving up.
const PLAY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A low-latency sample bank and playback engine."
)]
struct Cli {
    /// The path to an engine configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Decodes the given files and prints what would be loaded.
    Verify {
        /// The directory the files are relative to.
        directory: PathBuf,
        /// The files to decode.
        files: Vec<String>,
    },
    /// Loads a file and plays it once through the output device.
    Play {
        /// The directory the file is relative to.
        directory: PathBuf,
        /// The file to play.
        file: String,
        /// The output device name. Overrides the configuration.
        #[arg(short, long)]
        device: Option<String>,
        /// Linear gain between 0.0 and 1.0.
        #[arg(short, long, default_value_t = 1.0)]
        volume: f32,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Devices {} => {
            let devices = output::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Verify { directory, files } => {
            let assets = DirectoryAssetSource::new(&directory);
            let target = PcmFormat {
                sample_rate: config.sample_rate(),
                channels: config.channels(),
            };

            let mut failed = 0;
            for file in files.iter() {
                let result = assets
                    .read(file)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| {
                        decoder::decode(file, bytes, target).map_err(|e| e.to_string())
                    });
                match result {
                    Ok(audio) => println!(
                        "- {}: {} frames ({} Hz, {} channel(s) at source)",
                        file,
                        audio.frames(target.channels),
                        audio.source.sample_rate,
                        audio.source.channels
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("- {}: FAILED: {}", file, e);
                    }
                }
            }

            if failed > 0 {
                return Err(format!("{} of {} file(s) failed to decode", failed, files.len()).into());
            }
        }
        Commands::Play {
            directory,
            file,
            device,
            volume,
        } => {
            let config = match device {
                Some(device) => config.with_device(&device),
                None => config,
            };
            let tick_interval = config.tick_interval()?;
            let device = output::get_device(&config)?;
            let engine = Engine::create(
                config,
                device,
                Arc::new(DirectoryAssetSource::new(&directory)),
            )?;

            let summary = engine.load_samples(&[(file.as_str(), file.as_str())])?;
            info!(
                frames = summary.frames,
                memory_bytes = summary.memory_bytes,
                "Loaded"
            );
            engine.play_sample_with(&file, PlayOptions::default().with_volume(volume))?;

            let start = Instant::now();
            while engine.stats().bound_voices > 0 {
                if start.elapsed() > PLAY_TIMEOUT {
                    return Err("timed out waiting for playback to finish".into());
                }
                thread::sleep(tick_interval);
                engine.tick()?;
            }

            let stats = engine.stats();
            engine.shutdown()?;
            println!(
                "Played {} ({} callbacks, {} underruns)",
                file, stats.callbacks, stats.underruns
            );
        }
    }

    Ok(())
}
