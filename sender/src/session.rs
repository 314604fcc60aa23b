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

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use dlna::{didl, ControlClient, Device, Service};
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::{CastError, CastEvent, CastKind, Config, FileServer, LiveServer, SessionState};

enum Server {
    File(FileServer),
    Live(LiveServer),
}

impl Server {
    fn url(&self) -> &str {
        match self {
            Server::File(s) => s.url(),
            Server::Live(s) => s.url(),
        }
    }

    fn kind(&self) -> CastKind {
        match self {
            Server::File(_) => CastKind::File,
            Server::Live(_) => CastKind::Live,
        }
    }

    async fn stop(&mut self) {
        match self {
            Server::File(s) => s.stop().await,
            Server::Live(s) => s.stop().await,
        }
    }
}

struct Active {
    id: u64,
    service: Service,
    server: Server,
    watcher: Option<JoinHandle<()>>,
}

enum State {
    Idle,
    Starting,
    Active(Active),
    Stopping,
}

impl State {
    fn snapshot(&self) -> SessionState {
        match self {
            State::Idle => SessionState::Idle,
            State::Starting => SessionState::Starting,
            State::Active(active) => SessionState::Active(active.server.kind()),
            State::Stopping => SessionState::Stopping,
        }
    }
}

struct Inner {
    state: Mutex<State>,
    events: broadcast::Sender<CastEvent>,
}

impl Inner {
    fn emit(&self, event: CastEvent) {
        debug!("Session event: {event:?}");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Local teardown of cast `id` after its live pipeline failed.
    async fn fail_active(&self, id: u64, err: CastError) {
        let mut active = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, State::Stopping) {
                State::Active(active) if active.id == id => active,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        error!("Cast failed: {err}");
        active.server.stop().await;
        *self.state.lock().await = State::Idle;
        self.emit(CastEvent::Error {
            message: err.to_string(),
        });
    }
}

/// Drives one cast at a time: serve the media, point the renderer at it, tear it all down.
pub struct CastingSession {
    config: Config,
    control: ControlClient,
    inner: Arc<Inner>,
    next_id: AtomicU64,
}

impl CastingSession {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let control = ControlClient::new(config.control_timeout(), config.user_agent.clone())
            .context("failed to create control client")?;
        let (events, _) = broadcast::channel(32);

        Ok(Self {
            config,
            control,
            inner: Arc::new(Inner {
                state: Mutex::new(State::Idle),
                events,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CastEvent> {
        self.inner.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.state.lock().await.snapshot()
    }

    /// Cast a local file. Returns the URL the renderer was given.
    pub async fn start_file(&self, device: &Device, path: &Path) -> Result<String, CastError> {
        let service = self.begin(device, Some(path)).await?;

        let served = match FileServer::start_on(path, self.config.local_ip()).await {
            Ok(server) => {
                let metadata = didl::file_metadata(path, server.url());
                Ok((Server::File(server), metadata, None))
            }
            Err(err) => Err(err),
        };
        self.launch(service, served).await
    }

    /// Mirror the screen as a live MPEG-TS stream.
    pub async fn start_screen(&self, device: &Device) -> Result<String, CastError> {
        let service = self.begin(device, None).await?;

        let served = match LiveServer::start_on(&self.config, self.config.local_ip()).await {
            Ok(mut server) => {
                let failures = server.take_failures();
                let metadata = didl::live_metadata(server.url());
                Ok((Server::Live(server), metadata, failures))
            }
            Err(err) => Err(err),
        };
        self.launch(service, served).await
    }

    /// Stop the active cast. Returns `false` when nothing was being cast.
    pub async fn stop(&self) -> bool {
        let mut active = {
            let mut state = self.inner.state.lock().await;
            match std::mem::replace(&mut *state, State::Stopping) {
                State::Active(active) => active,
                other => {
                    *state = other;
                    return false;
                }
            }
        };

        if let Some(watcher) = active.watcher.take() {
            watcher.abort();
        }

        if let Err(err) = self.control.stop(&active.service).await {
            warn!("Renderer did not acknowledge Stop: {err}");
        }

        active.server.stop().await;
        *self.inner.state.lock().await = State::Idle;
        info!("Cast stopped");
        self.inner.emit(CastEvent::Stopped);

        true
    }

    /// Check preconditions and claim the session.
    async fn begin(&self, device: &Device, file: Option<&Path>) -> Result<Service, CastError> {
        let mut state = self.inner.state.lock().await;
        if !matches!(*state, State::Idle) {
            return Err(CastError::AlreadyCasting);
        }
        if let Some(path) = file {
            if !path.is_file() {
                return Err(CastError::FileNotFound(path.to_path_buf()));
            }
        }
        let service = device
            .av_transport()
            .cloned()
            .ok_or_else(|| CastError::UnsupportedDevice(device.to_string()))?;

        *state = State::Starting;
        Ok(service)
    }

    async fn launch(
        &self,
        service: Service,
        served: Result<(Server, String, Option<mpsc::UnboundedReceiver<CastError>>), CastError>,
    ) -> Result<String, CastError> {
        let (mut server, metadata, failures) = match served {
            Ok(served) => served,
            Err(err) => return Err(self.abort_start(err).await),
        };
        let url = server.url().to_owned();

        if let Err(err) = self.point_renderer(&service, &url, &metadata).await {
            server.stop().await;
            return Err(self.abort_start(err).await);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.state.lock().await;
        // The watcher cannot observe the session before it is marked active
        let watcher = failures.map(|mut failures| {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Some(err) = failures.recv().await {
                    inner.fail_active(id, err).await;
                }
            })
        });
        *state = State::Active(Active {
            id,
            service,
            server,
            watcher,
        });
        drop(state);
        info!("Casting {url}");
        self.inner.emit(CastEvent::Started { url: url.clone() });

        Ok(url)
    }

    async fn point_renderer(
        &self,
        service: &Service,
        url: &str,
        metadata: &str,
    ) -> Result<(), CastError> {
        self.control
            .set_av_transport_uri(service, url, metadata)
            .await?;
        // Renderers may drop a Play that arrives before they parsed the new source
        tokio::time::sleep(self.config.play_delay()).await;
        self.control.play(service).await?;
        Ok(())
    }

    async fn abort_start(&self, err: CastError) -> CastError {
        error!("Failed to start cast: {err}");
        *self.inner.state.lock().await = State::Idle;
        self.inner.emit(CastEvent::Error {
            message: err.to_string(),
        });
        err
    }
}
