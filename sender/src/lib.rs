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
use std::time::Duration;

use common::ChannelError;

mod config;
pub mod encoder;
pub mod file_server;
pub mod live_server;
mod pipeline;
pub mod session;

pub use config::{Config, Resolution};
pub use file_server::FileServer;
pub use live_server::LiveServer;
pub use session::CastingSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    File,
    Live,
}

/// Observable state of a [`CastingSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active(CastKind),
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastEvent {
    Started { url: String },
    Stopped,
    Error { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CastError {
    #[error("already casting")]
    AlreadyCasting,
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("{0} does not offer an AVTransport service")]
    UnsupportedDevice(String),
    #[error(transparent)]
    Control(#[from] dlna::ControlError),
    #[error(transparent)]
    Capture(#[from] scap::CaptureError),
    #[error("failed to launch encoder `{program}`: {source}")]
    EncoderLaunch {
        program: String,
        source: std::io::Error,
    },
    #[error("encoder exited before attaching ({0})")]
    EncoderExited(String),
    #[error("encoder did not attach to the {channel} channel within {timeout:?}")]
    PipeAttachTimeout {
        channel: &'static str,
        timeout: Duration,
    },
    #[error(transparent)]
    Channel(ChannelError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ChannelError> for CastError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::AttachTimeout { name, timeout } => Self::PipeAttachTimeout {
                channel: name,
                timeout,
            },
            other => Self::Channel(other),
        }
    }
}
