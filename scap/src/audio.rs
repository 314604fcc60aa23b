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

//! System audio loopback capture as interleaved stereo PCM16.

use common::ChannelWriter;

use crate::capturer::CaptureError;

/// Sample rate assumed when the output device reports none.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Convert one float sample to little endian PCM16, clamping to [-1.0, 1.0].
pub fn f32_to_pcm16(sample: f32) -> [u8; 2] {
    let clamped = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    ((clamped * i16::MAX as f32) as i16).to_le_bytes()
}

/// Append interleaved `channels` float samples to `out` as stereo PCM16.
///
/// Mono is duplicated to both channels, anything wider keeps the first two.
pub fn push_stereo_pcm16(samples: &[f32], channels: usize, out: &mut Vec<u8>) {
    push_stereo(samples, channels, out, f32_to_pcm16);
}

/// Same as [`push_stereo_pcm16`] for samples that already are PCM16.
pub fn push_stereo_i16(samples: &[i16], channels: usize, out: &mut Vec<u8>) {
    push_stereo(samples, channels, out, i16::to_le_bytes);
}

fn push_stereo<T: Copy>(samples: &[T], channels: usize, out: &mut Vec<u8>, conv: fn(T) -> [u8; 2]) {
    if channels == 0 {
        return;
    }
    for frame in samples.chunks_exact(channels) {
        let left = conv(frame[0]);
        let right = if channels == 1 { left } else { conv(frame[1]) };
        out.extend_from_slice(&left);
        out.extend_from_slice(&right);
    }
}

/// Captures what the default output device plays.
pub struct AudioLoopbackCapturer {
    inner: imp::Loopback,
}

impl AudioLoopbackCapturer {
    pub fn new() -> Result<Self, CaptureError> {
        Ok(Self {
            inner: imp::Loopback::new()?,
        })
    }

    /// Rate of the PCM written to the output channel.
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    /// Start writing PCM16 stereo into `output`. Stops on its own when the channel closes.
    pub fn start(&mut self, output: ChannelWriter) -> Result<(), CaptureError> {
        self.inner.start(output)
    }

    pub fn stop(&mut self) {
        self.inner.stop();
    }
}

#[cfg(target_os = "windows")]
mod imp {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use common::ChannelWriter;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use log::{debug, error, info, warn};

    use super::{push_stereo_i16, push_stereo_pcm16};
    use crate::capturer::{CaptureError, Worker};

    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    pub(super) struct Loopback {
        sample_rate: u32,
        worker: Option<Worker>,
    }

    impl Loopback {
        pub fn new() -> Result<Self, CaptureError> {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| CaptureError::init("audio loopback", "no default output device"))?;
            let config = device
                .default_output_config()
                .map_err(|err| CaptureError::init("audio loopback", err))?;

            Ok(Self {
                sample_rate: config.sample_rate().0,
                worker: None,
            })
        }

        pub fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        pub fn start(&mut self, output: ChannelWriter) -> Result<(), CaptureError> {
            self.stop();
            self.worker = Some(Worker::spawn("audio-loopback", output, loopback_thread)?);
            Ok(())
        }

        pub fn stop(&mut self) {
            if let Some(mut worker) = self.worker.take() {
                worker.stop();
            }
        }
    }

    fn loopback_thread(running: &AtomicBool, output: ChannelWriter) {
        let failed = Arc::new(AtomicBool::new(false));

        let stream = match build_stream(output, Arc::clone(&failed)) {
            Ok(stream) => stream,
            Err(err) => {
                error!("Failed to open audio loopback stream: {err}");
                return;
            }
        };

        if let Err(err) = stream.play() {
            error!("Failed to start audio loopback stream: {err}");
            return;
        }
        info!("Audio loopback capture started");

        while running.load(Ordering::Acquire) && !failed.load(Ordering::Acquire) {
            std::thread::sleep(POLL_INTERVAL);
        }

        drop(stream);
    }

    fn build_stream(
        mut writer: ChannelWriter,
        failed: Arc<AtomicBool>,
    ) -> Result<cpal::Stream, CaptureError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| CaptureError::init("audio loopback", "no default output device"))?;
        let supported = device
            .default_output_config()
            .map_err(|err| CaptureError::init("audio loopback", err))?;
        let config: StreamConfig = supported.config();
        let channels = config.channels as usize;
        debug!("Audio loopback format: {supported:?}");

        let mut pcm = Vec::new();
        let err_fn = |err: cpal::StreamError| warn!("Audio loopback stream error: {err}");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &_| {
                    pcm.clear();
                    push_stereo_pcm16(data, channels, &mut pcm);
                    write_block(&mut writer, &pcm, &failed);
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &_| {
                    pcm.clear();
                    push_stereo_i16(data, channels, &mut pcm);
                    write_block(&mut writer, &pcm, &failed);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(CaptureError::init(
                    "audio loopback",
                    format!("unsupported sample format {other:?}"),
                ))
            }
        };

        stream.map_err(|err| CaptureError::init("audio loopback", err))
    }

    fn write_block(writer: &mut ChannelWriter, pcm: &[u8], failed: &AtomicBool) {
        if failed.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = writer.write_all(pcm) {
            debug!("Audio channel closed: {err}");
            failed.store(true, Ordering::Release);
        }
    }
}

#[cfg(not(target_os = "windows"))]
mod imp {
    use common::ChannelWriter;

    use crate::capturer::CaptureError;

    pub(super) struct Loopback;

    impl Loopback {
        pub fn new() -> Result<Self, CaptureError> {
            Err(CaptureError::Unsupported("audio loopback capture"))
        }

        pub fn sample_rate(&self) -> u32 {
            super::DEFAULT_SAMPLE_RATE
        }

        pub fn start(&mut self, _output: ChannelWriter) -> Result<(), CaptureError> {
            Err(CaptureError::Unsupported("audio loopback capture"))
        }

        pub fn stop(&mut self) {}
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[test]
    fn full_scale() {
        assert_eq!(f32_to_pcm16(1.0), [0xFF, 0x7F]);
        assert_eq!(i16::from_le_bytes(f32_to_pcm16(-1.0)), -32767);
        assert_eq!(f32_to_pcm16(0.0), [0, 0]);
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(f32_to_pcm16(4.5), f32_to_pcm16(1.0));
        assert_eq!(f32_to_pcm16(-7.0), f32_to_pcm16(-1.0));
        assert_eq!(f32_to_pcm16(f32::INFINITY), f32_to_pcm16(1.0));
        assert_eq!(f32_to_pcm16(f32::NAN), [0, 0]);
    }

    #[test]
    fn mono_is_duplicated() {
        let mut out = Vec::new();
        push_stereo_pcm16(&[1.0, 0.0], 1, &mut out);
        assert_eq!(out, vec![0xFF, 0x7F, 0xFF, 0x7F, 0, 0, 0, 0]);
    }

    #[test]
    fn surround_keeps_front_pair() {
        let mut out = Vec::new();
        push_stereo_i16(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12], 6, &mut out);
        let samples: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![1, 2, 7, 8]);
    }

    #[test]
    fn drops_partial_frames() {
        let mut out = Vec::new();
        push_stereo_i16(&[1, 2, 3], 2, &mut out);
        assert_eq!(out.len(), 4);
        push_stereo_i16(&[1, 2, 3], 0, &mut out);
        assert_eq!(out.len(), 4);
    }

    #[quickcheck]
    fn never_wraps(sample: f32) -> bool {
        let value = i16::from_le_bytes(f32_to_pcm16(sample));
        (-32767..=32767).contains(&value)
            && (sample.is_nan() || (sample >= 0.0) == (value >= 0) || value == 0)
    }
}
