// Copyright (C) 2025 Marcus L. Hanestad <marlhan@proton.me>
//
// This file is part of DLNA Sender.
//
// DLNA Sender is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// DLNA Sender is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with DLNA Sender.  If not, see <https://www.gnu.org/licenses/>.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dlna::{Device, DeviceFinder, DiscoveryConfig};
use log::{warn, LevelFilter};
use sender::{CastEvent, CastingSession, Config};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "dlna-sender")]
#[command(version)]
#[command(about = "Cast local files or the screen to DLNA renderers")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with session settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Encoder executable
    #[arg(long, global = true)]
    ffmpeg: Option<String>,

    /// Search window in milliseconds
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List renderers on the local network
    Discover {
        /// Print the devices as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cast a local media file
    File {
        /// UUID or friendly name of the renderer
        #[arg(short, long)]
        device: String,
        path: PathBuf,
    },
    /// Mirror the primary display
    Screen {
        /// UUID or friendly name of the renderer
        #[arg(short, long)]
        device: String,
        /// Include system audio
        #[arg(long)]
        audio: bool,
    },
}

async fn search(config: &Config) -> Result<Vec<Device>> {
    let finder = DeviceFinder::new(DiscoveryConfig {
        user_agent: config.user_agent.clone(),
        ..DiscoveryConfig::default()
    })?;
    let devices = finder.search(config.search_timeout()).await;
    finder.stop();
    Ok(devices)
}

fn matches(device: &Device, query: &str) -> bool {
    let query = query.trim();
    device.uuid.eq_ignore_ascii_case(query.trim_start_matches("uuid:"))
        || device.friendly_name.eq_ignore_ascii_case(query)
}

async fn find_device(config: &Config, query: &str) -> Result<Device> {
    let devices = search(config).await?;
    if devices.is_empty() {
        bail!("no renderers found");
    }
    devices
        .into_iter()
        .find(|d| matches(d, query))
        .with_context(|| format!("no renderer matches `{query}`"))
}

async fn discover(config: &Config, json: bool) -> Result<()> {
    let devices = search(config).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No renderers found");
    }
    for device in &devices {
        let castable = if device.av_transport().is_some() {
            ""
        } else {
            " [no AVTransport]"
        };
        println!("{}  {device}{castable}", device.uuid);
    }
    Ok(())
}

/// Run until Ctrl-C or a failure of the active cast.
async fn cast_until_interrupted(session: &CastingSession, url: String) -> Result<()> {
    let mut events = session.subscribe();
    println!("Casting {url}, press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("Failed to listen for Ctrl-C: {err}");
                }
                session.stop().await;
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(CastEvent::Error { message }) => bail!("cast failed: {message}"),
                Ok(CastEvent::Stopped) | Err(RecvError::Closed) => return Ok(()),
                Ok(CastEvent::Started { .. }) | Err(RecvError::Lagged(_)) => {}
            }
        }
    }
}

async fn run(command: Command, mut config: Config) -> Result<()> {
    match command {
        Command::Discover { json } => discover(&config, json).await,
        Command::File { device, path } => {
            let device = find_device(&config, &device).await?;
            let session = CastingSession::new(config)?;
            let url = session.start_file(&device, &path).await?;
            cast_until_interrupted(&session, url).await
        }
        Command::Screen { device, audio } => {
            config.enable_audio |= audio;
            let device = find_device(&config, &device).await?;
            let session = CastingSession::new(config)?;
            let url = session.start_screen(&device).await?;
            cast_until_interrupted(&session, url).await
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        common::default_log_level()
    };
    env_logger::Builder::from_default_env()
        .filter_module("sender", level)
        .filter_module("dlna_sender", level)
        .filter_module("dlna", level)
        .filter_module("scap", level)
        .filter_module("common", level)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(ffmpeg) = cli.ffmpeg {
        config.encoder_program = ffmpeg;
    }
    if let Some(timeout) = cli.timeout {
        config.search_timeout_ms = timeout;
    }

    common::runtime()?.block_on(run(cli.command, config))
}
