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

//! One capture and encode run feeding a single live client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{ChannelError, DuplexByteChannel};
use log::{debug, info, warn};
use scap::{AudioLoopbackCapturer, Size, VideoCapturer};
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;

use crate::encoder::{encoder_args, gpu_encoder_available, AudioInput, EncoderProcess};
use crate::{CastError, Config};

/// How a pipeline is built, resolved once per live server.
#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    pub program: String,
    pub hardware: Option<bool>,
    pub audio: bool,
    pub size: Option<Size>,
    pub video_attach_timeout: Duration,
    pub audio_attach_timeout: Duration,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            program: config.encoder_program.clone(),
            hardware: config.hardware_encoder,
            audio: config.enable_audio,
            size: config.resolution.map(Size::from),
            video_attach_timeout: config.video_attach_timeout(),
            audio_attach_timeout: config.audio_attach_timeout(),
        }
    }
}

impl PipelineSettings {
    fn capture_size(&self) -> Result<Size, CastError> {
        match self.size {
            Some(size) => Ok(size),
            None => Ok(scap::capture_size(scap::primary_display_size()?)),
        }
    }
}

type AudioSlot = Arc<Mutex<Option<AudioLoopbackCapturer>>>;

fn start_audio(slot: &AudioSlot, writer: common::ChannelWriter) {
    let Ok(mut guard) = slot.lock() else {
        return;
    };
    if let Some(capturer) = guard.as_mut() {
        match capturer.start(writer) {
            Ok(()) => info!("Audio capture attached"),
            Err(err) => warn!("Failed to start audio capture: {err}"),
        }
    }
}

/// Screen capturer, optional audio capturer and the encoder between them and the client.
pub(crate) struct Pipeline {
    /// Connection that owns this pipeline.
    pub id: u64,
    encoder: Option<EncoderProcess>,
    video: Option<Box<dyn VideoCapturer>>,
    audio: AudioSlot,
    late_audio: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Launch the encoder and start capturing once it has attached.
    ///
    /// The encoder opens its inputs in order, so the video capturer is started as soon as the
    /// video channel is attached; otherwise the encoder would block on the first frame and
    /// never reach the audio input.
    pub async fn start(
        id: u64,
        settings: &PipelineSettings,
    ) -> Result<(Self, ChildStdout), CastError> {
        let size = settings.capture_size()?;
        let hardware = match settings.hardware {
            Some(hardware) => hardware,
            None => gpu_encoder_available(&settings.program).await,
        };

        let video_channel = DuplexByteChannel::bind("video").await?;

        let mut audio_capturer = None;
        if settings.audio {
            match AudioLoopbackCapturer::new() {
                Ok(capturer) => audio_capturer = Some(capturer),
                Err(err) => warn!("Streaming without audio: {err}"),
            }
        }
        let audio_channel = match audio_capturer {
            Some(_) => Some(DuplexByteChannel::bind("audio").await?),
            None => None,
        };
        let audio_input = audio_channel
            .as_ref()
            .zip(audio_capturer.as_ref())
            .map(|(channel, capturer)| AudioInput {
                url: channel.url(),
                sample_rate: capturer.sample_rate(),
            });

        let args = encoder_args(size, &video_channel.url(), audio_input.as_ref(), hardware);
        let mut encoder = EncoderProcess::spawn(&settings.program, &args)?;
        info!(
            "Encoder started (pid {:?}, {size}, {})",
            encoder.id(),
            if hardware { "gpu" } else { "cpu" }
        );

        let attached = tokio::select! {
            res = video_channel.accept(settings.video_attach_timeout) => res.map_err(CastError::from),
            status = encoder.exited() => Err(CastError::EncoderExited(status)),
        };
        let video_writer = match attached {
            Ok(writer) => writer,
            Err(err) => {
                encoder.kill().await;
                return Err(err);
            }
        };

        let video = match scap::start_video_capturer(size, video_writer) {
            Ok(capturer) => capturer,
            Err(err) => {
                encoder.kill().await;
                return Err(err.into());
            }
        };

        let audio: AudioSlot = Arc::new(Mutex::new(audio_capturer));
        let mut late_audio = None;
        if let Some(channel) = audio_channel {
            match channel.accept(settings.audio_attach_timeout).await {
                Ok(writer) => start_audio(&audio, writer),
                Err(ChannelError::AttachTimeout { timeout, .. }) => {
                    warn!("Encoder did not attach audio within {timeout:?}, continuing without it");
                    let slot = Arc::clone(&audio);
                    late_audio = Some(tokio::spawn(async move {
                        match channel.accept(Duration::MAX).await {
                            Ok(writer) => start_audio(&slot, writer),
                            Err(err) => debug!("Audio channel closed: {err}"),
                        }
                    }));
                }
                Err(err) => warn!("Continuing without audio: {err}"),
            }
        }

        let Some(stdout) = encoder.take_stdout() else {
            let mut pipeline = Self {
                id,
                encoder: Some(encoder),
                video: Some(video),
                audio,
                late_audio,
            };
            pipeline.shutdown().await;
            return Err(CastError::EncoderExited("no stdout".to_owned()));
        };

        Ok((
            Self {
                id,
                encoder: Some(encoder),
                video: Some(video),
                audio,
                late_audio,
            },
            stdout,
        ))
    }

    /// Stop capture, then the encoder. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.late_audio.take() {
            task.abort();
        }

        let video = self.video.take();
        let audio = Arc::clone(&self.audio);
        let stopped = tokio::task::spawn_blocking(move || {
            if let Some(mut video) = video {
                video.stop();
            }
            if let Ok(mut guard) = audio.lock() {
                if let Some(mut capturer) = guard.take() {
                    capturer.stop();
                }
            }
        })
        .await;
        if let Err(err) = stopped {
            warn!("Capture shutdown task failed: {err}");
        }

        if let Some(encoder) = self.encoder.take() {
            encoder.kill().await;
        }
        debug!("Pipeline {} torn down", self.id);
    }
}
