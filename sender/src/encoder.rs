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

//! External encoder process: argument construction, GPU probing and supervision.

use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use scap::{Size, FRAME_RATE};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::OnceCell;

use crate::CastError;

/// Codec name looked for in the encoder listing.
pub const GPU_CODEC: &str = "h264_nvenc";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Raw PCM input fed through the audio channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInput {
    pub url: String,
    pub sample_rate: u32,
}

fn command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd.kill_on_drop(true);
    cmd
}

async fn probe_gpu_encoder(program: &str) -> bool {
    let output = command(program)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    match tokio::time::timeout(PROBE_TIMEOUT, output).await {
        Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).contains(GPU_CODEC),
        Ok(Err(err)) => {
            warn!("Failed to probe `{program}` for encoders: {err}");
            false
        }
        Err(_) => {
            warn!("Probing `{program}` for encoders timed out");
            false
        }
    }
}

/// Whether the encoder has a GPU H.264 encoder. Probed once per process.
pub async fn gpu_encoder_available(program: &str) -> bool {
    static AVAILABLE: OnceCell<bool> = OnceCell::const_new();
    *AVAILABLE
        .get_or_init(|| async {
            let available = probe_gpu_encoder(program).await;
            info!("GPU encoder {GPU_CODEC} available: {available}");
            available
        })
        .await
}

/// Full encoder command line for raw BGRA video (and optional PCM16 audio) in, MPEG-TS on
/// stdout.
pub fn encoder_args(
    size: Size,
    video_url: &str,
    audio: Option<&AudioInput>,
    hardware: bool,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(96);
    let mut push = |list: &[&str]| args.extend(list.iter().map(|s| (*s).to_owned()));

    push(&["-hide_banner", "-loglevel", "error"]);

    let video_size = size.to_string();
    let frame_rate = FRAME_RATE.to_string();
    push(&[
        "-probesize", "32",
        "-analyzeduration", "0",
        "-fflags", "nobuffer",
        "-f", "rawvideo",
        "-pixel_format", "bgra",
        "-video_size", &video_size,
        "-framerate", &frame_rate,
        "-i", video_url,
    ]);

    if let Some(audio) = audio {
        let rate = audio.sample_rate.to_string();
        push(&[
            "-probesize", "32",
            "-analyzeduration", "0",
            "-f", "s16le",
            "-ac", "2",
            "-ar", &rate,
            "-i", &audio.url,
        ]);
    }

    push(&["-map", "0:v"]);
    if audio.is_some() {
        push(&["-map", "1:a"]);
    }

    if hardware {
        push(&[
            "-c:v", GPU_CODEC,
            "-preset", "p1",
            "-tune", "ll",
            "-rc", "cbr",
            "-b:v", "2000k",
            "-maxrate", "2000k",
            "-bufsize", "500k",
            "-zerolatency", "1",
            "-delay", "0",
            "-g", "30",
            "-bf", "0",
            "-forced-idr", "1",
        ]);
    } else {
        push(&[
            "-c:v", "libx264",
            "-preset", "ultrafast",
            "-tune", "zerolatency",
            "-pix_fmt", "yuv420p",
            "-b:v", "1500k",
            "-maxrate", "1500k",
            "-bufsize", "300k",
            "-g", "30",
            "-bf", "0",
            "-x264opts", "no-scenecut:rc-lookahead=0",
        ]);
    }

    if audio.is_some() {
        push(&["-c:a", "aac", "-b:a", "96k", "-ac", "2", "-ar", "48000"]);
    }

    push(&[
        "-f", "mpegts",
        "-mpegts_flags", "+initial_discontinuity",
        "-flush_packets", "1",
        "-fflags", "+flush_packets+nobuffer",
        "-max_delay", "0",
        "-muxdelay", "0.001",
        "-",
    ]);

    args
}

/// A running encoder. Killed when dropped.
pub struct EncoderProcess {
    child: Child,
}

impl EncoderProcess {
    /// Launch `program` with stdout captured and stderr drained into the log.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, CastError> {
        debug!("Launching {program} {}", args.join(" "));

        let mut child = command(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CastError::EncoderLaunch {
                program: program.to_owned(),
                source,
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if !line.is_empty() {
                        warn!("ffmpeg: {line}");
                    }
                }
            });
        }

        Ok(Self { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Resolves when the process exits on its own.
    pub async fn exited(&mut self) -> String {
        match self.child.wait().await {
            Ok(status) => status.to_string(),
            Err(err) => err.to_string(),
        }
    }

    pub async fn kill(mut self) {
        if let Err(err) = self.child.start_kill() {
            debug!("Encoder already gone: {err}");
        }
        match tokio::time::timeout(KILL_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Encoder exited with {status}"),
            Ok(Err(err)) => warn!("Failed to reap encoder: {err}"),
            Err(_) => warn!("Encoder did not exit within {KILL_TIMEOUT:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    fn joined(args: &[String]) -> String {
        args.join(" ")
    }

    #[test]
    fn cpu_video_only() {
        let args = encoder_args(Size::new(1280, 720), "tcp://127.0.0.1:5000", None, false);
        assert_eq!(
            joined(&args),
            "-hide_banner -loglevel error \
             -probesize 32 -analyzeduration 0 -fflags nobuffer -f rawvideo -pixel_format bgra \
             -video_size 1280x720 -framerate 30 -i tcp://127.0.0.1:5000 \
             -map 0:v \
             -c:v libx264 -preset ultrafast -tune zerolatency -pix_fmt yuv420p -b:v 1500k \
             -maxrate 1500k -bufsize 300k -g 30 -bf 0 -x264opts no-scenecut:rc-lookahead=0 \
             -f mpegts -mpegts_flags +initial_discontinuity -flush_packets 1 \
             -fflags +flush_packets+nobuffer -max_delay 0 -muxdelay 0.001 -"
        );
    }

    #[test]
    fn gpu_with_audio() {
        let audio = AudioInput {
            url: "tcp://127.0.0.1:5001".to_owned(),
            sample_rate: 44100,
        };
        let args = encoder_args(
            Size::new(1920, 1080),
            "tcp://127.0.0.1:5000",
            Some(&audio),
            true,
        );
        let joined = joined(&args);

        assert!(joined.contains(
            "-i tcp://127.0.0.1:5000 -probesize 32 -analyzeduration 0 -f s16le -ac 2 -ar 44100 \
             -i tcp://127.0.0.1:5001 -map 0:v -map 1:a -c:v h264_nvenc"
        ));
        assert!(joined.contains("-zerolatency 1 -delay 0 -g 30 -bf 0 -forced-idr 1"));
        assert!(joined.contains("-c:a aac -b:a 96k -ac 2 -ar 48000 -f mpegts"));
        assert!(!joined.contains("libx264"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[quickcheck]
    fn video_size_and_stdout_output(width: u16, height: u16, hardware: bool) -> bool {
        let args = encoder_args(
            Size::new(width as u32, height as u32),
            "tcp://127.0.0.1:5000",
            None,
            hardware,
        );
        args.windows(2)
            .any(|pair| pair[0] == "-video_size" && pair[1] == format!("{width}x{height}"))
            && args.last().map(String::as_str) == Some("-")
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let err = EncoderProcess::spawn("/nonexistent/encoder-binary", &[])
            .err()
            .unwrap();
        assert!(matches!(err, CastError::EncoderLaunch { .. }));
    }

    #[tokio::test]
    async fn probe_failure_means_no_gpu() {
        assert!(!probe_gpu_encoder("/nonexistent/encoder-binary").await);
    }
}
