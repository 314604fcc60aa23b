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

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<Resolution> for scap::Size {
    fn from(r: Resolution) -> Self {
        scap::Size::new(r.width, r.height)
    }
}

/// Session tunables. Every field is optional in the TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub encoder_program: String,
    /// `None` probes the encoder once for a GPU H.264 encoder.
    pub hardware_encoder: Option<bool>,
    pub enable_audio: bool,
    /// Forced capture size. `None` derives it from the primary display.
    pub resolution: Option<Resolution>,
    pub control_timeout_ms: u64,
    pub play_delay_ms: u64,
    pub video_attach_timeout_ms: u64,
    pub audio_attach_timeout_ms: u64,
    pub search_timeout_ms: u64,
    pub user_agent: String,
    /// Address the media servers bind and advertise. `None` picks the best local address.
    pub local_ip: Option<Ipv4Addr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoder_program: "ffmpeg".to_owned(),
            hardware_encoder: None,
            enable_audio: false,
            resolution: None,
            control_timeout_ms: 5000,
            play_delay_ms: 500,
            video_attach_timeout_ms: 3000,
            audio_attach_timeout_ms: 1000,
            search_timeout_ms: 2000,
            user_agent: "DLNA-Sender/1.0".to_owned(),
            local_ip: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn play_delay(&self) -> Duration {
        Duration::from_millis(self.play_delay_ms)
    }

    pub fn video_attach_timeout(&self) -> Duration {
        Duration::from_millis(self.video_attach_timeout_ms)
    }

    pub fn audio_attach_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_attach_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip.unwrap_or_else(common::net::best_local_ipv4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            "enable_audio = true\n\
             play_delay_ms = 800\n\
             [resolution]\n\
             width = 1280\n\
             height = 720\n",
        )
        .unwrap();

        assert!(config.enable_audio);
        assert_eq!(config.play_delay(), Duration::from_millis(800));
        assert_eq!(
            config.resolution,
            Some(Resolution {
                width: 1280,
                height: 720
            })
        );
        assert_eq!(config.encoder_program, "ffmpeg");
        assert_eq!(config.hardware_encoder, None);
        assert_eq!(config.video_attach_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(toml::from_str::<Config>("").unwrap(), Config::default());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sender.toml");
        std::fs::write(
            &path,
            "encoder_program = \"/opt/ffmpeg/bin/ffmpeg\"\n\
             hardware_encoder = false\n\
             local_ip = \"192.168.1.10\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.encoder_program, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.hardware_encoder, Some(false));
        assert_eq!(config.local_ip(), Ipv4Addr::new(192, 168, 1, 10));

        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }
}
