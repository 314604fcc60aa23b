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

//! Live MPEG-TS stream of the screen. Every client connection gets a fresh pipeline.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use http::{Header, Response, StatusCode};
use log::{debug, error, info, trace, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::pipeline::{Pipeline, PipelineSettings};
use crate::{CastError, Config};

pub const LIVE_PATH: &str = "/live.ts";

const LIVE_HEADERS: &[(&str, &str)] = &[
    ("Content-Type", "video/mpeg"),
    ("Connection", "close"),
    ("Cache-Control", "no-cache, no-store, must-revalidate"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
    ("X-Content-Duration", "0"),
    ("transferMode.dlna.org", "Streaming"),
    (
        "contentFeatures.dlna.org",
        "DLNA.ORG_PN=MPEG_TS_SD_EU_ISO;DLNA.ORG_OP=01;DLNA.ORG_CI=1;\
         DLNA.ORG_FLAGS=01700000000000000000000000000000",
    ),
];

/// Response head sent before any stream data.
pub fn live_response_head() -> Vec<u8> {
    let headers = LIVE_HEADERS
        .iter()
        .map(|(k, v)| Header::new(*k, *v))
        .collect();
    let mut buf = Vec::new();
    Response::head(StatusCode::Ok, headers).serialize_into(&mut buf);
    buf
}

struct Shared {
    settings: PipelineSettings,
    /// The one live pipeline, shared by connections and [`LiveServer::stop`].
    pipeline: Mutex<Option<Pipeline>>,
    next_id: AtomicU64,
    stopped: AtomicBool,
    failures: mpsc::UnboundedSender<CastError>,
}

impl Shared {
    async fn reset(&self) {
        let mut pipeline = self.pipeline.lock().await;
        if let Some(mut old) = pipeline.take() {
            debug!("Resetting pipeline {}", old.id);
            old.shutdown().await;
        }
    }

    /// Tear down the pipeline only if connection `id` still owns it.
    async fn release(&self, id: u64) {
        let mut pipeline = self.pipeline.lock().await;
        if pipeline.as_ref().is_some_and(|p| p.id == id) {
            if let Some(mut own) = pipeline.take() {
                own.shutdown().await;
            }
        }
    }
}

pub struct LiveServer {
    url: String,
    addr: SocketAddr,
    shared: Arc<Shared>,
    failures: Option<mpsc::UnboundedReceiver<CastError>>,
    fin: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LiveServer {
    pub async fn start(config: &Config) -> Result<Self, CastError> {
        Self::start_on(config, config.local_ip()).await
    }

    pub async fn start_on(config: &Config, ip: Ipv4Addr) -> Result<Self, CastError> {
        let (listener, addr) = common::net::bind_ephemeral(ip).await?;
        let url = format!("http://{addr}{LIVE_PATH}");
        info!("Live stream at {url}");

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            settings: PipelineSettings::from(config),
            pipeline: Mutex::new(None),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            failures: failures_tx,
        });

        let (fin_tx, fin_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&shared), fin_rx));

        Ok(Self {
            url,
            addr,
            shared,
            failures: Some(failures_rx),
            fin: Some(fin_tx),
            task: Some(task),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Pipeline start failures, one per failed client connection.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<CastError>> {
        self.failures.take()
    }

    /// Stop accepting and tear down the running pipeline.
    pub async fn stop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(fin) = self.fin.take() {
            let _ = fin.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("Live server accept loop failed: {err}");
            }
        }
        self.shared.reset().await;
    }
}

impl Drop for LiveServer {
    fn drop(&mut self) {
        if let Some(fin) = self.fin.take() {
            let _ = fin.send(());
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut fin: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut fin => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(err) => {
                        error!("Failed to accept live client: {err}");
                        continue;
                    }
                };
                if let Err(err) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {peer}: {err}");
                }

                let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                info!("Live client {id} connected from {peer}");
                tokio::spawn(handle_client(stream, id, Arc::clone(&shared)));
            }
        }
    }

    debug!("Live server stopped");
}

async fn handle_client(mut stream: TcpStream, id: u64, shared: Arc<Shared>) {
    shared.reset().await;

    let mut reader = http::RequestReader::new();
    match reader.read_head(&mut stream).await {
        Ok(Some(request)) => trace!(
            "Live client {id}: {} {}",
            request.start_line.method.to_str(),
            request.start_line.target
        ),
        Ok(None) => return,
        Err(err) => {
            debug!("Live client {id} sent a bad request: {err}");
            return;
        }
    }

    let head = live_response_head();
    if let Err(err) = async {
        stream.write_all(&head).await?;
        stream.flush().await
    }
    .await
    {
        debug!("Live client {id} went away before streaming: {err}");
        return;
    }

    let mut stdout = {
        let mut pipeline = shared.pipeline.lock().await;
        if shared.stopped.load(Ordering::Acquire) {
            return;
        }
        if pipeline.as_ref().is_some_and(|p| p.id > id) {
            debug!("Live client {id} was superseded");
            return;
        }
        if let Some(mut old) = pipeline.take() {
            old.shutdown().await;
        }

        match Pipeline::start(id, &shared.settings).await {
            Ok((started, stdout)) => {
                *pipeline = Some(started);
                stdout
            }
            Err(err) => {
                error!("Failed to start live pipeline: {err}");
                let _ = shared.failures.send(err);
                return;
            }
        }
    };

    match tokio::io::copy(&mut stdout, &mut stream).await {
        Ok(bytes) => debug!("Live client {id} finished after {bytes} bytes"),
        Err(err) => debug!("Live client {id} ended: {err}"),
    }

    shared.release(id).await;
}
