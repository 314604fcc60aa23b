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

//! Serves one local file to renderers, with byte range support.

use std::io::SeekFrom;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dlna::didl::FILE_DLNA_FEATURES;
use dlna::mime::{dlna_profile, mime_type};
use http::{ByteRange, Header, RangeError, RequestMethod, Response, StatusCode};
use log::{debug, error, trace, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::CastError;

pub const CHUNK_SIZE: usize = 64 * 1024;

struct ServedFile {
    path: PathBuf,
    mime: &'static str,
}

/// HTTP server for a single file. Any request path serves the file.
pub struct FileServer {
    url: String,
    addr: SocketAddr,
    fin: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FileServer {
    /// Serve `path` on the best local address.
    pub async fn start(path: impl Into<PathBuf>) -> Result<Self, CastError> {
        Self::start_on(path, common::net::best_local_ipv4()).await
    }

    pub async fn start_on(path: impl Into<PathBuf>, ip: Ipv4Addr) -> Result<Self, CastError> {
        let path = path.into();
        if !path.is_file() {
            return Err(CastError::FileNotFound(path));
        }

        let (listener, addr) = common::net::bind_ephemeral(ip).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = format!("http://{addr}/{}", http::encode_segment(&file_name));
        debug!("Serving {} at {url}", path.display());

        let file = Arc::new(ServedFile {
            mime: mime_type(&path),
            path,
        });
        let (fin_tx, fin_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, file, fin_rx));

        Ok(Self {
            url,
            addr,
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

    /// Close the listener. Connections in flight finish on their own.
    pub async fn stop(&mut self) {
        if let Some(fin) = self.fin.take() {
            let _ = fin.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("File server accept loop failed: {err}");
            }
        }
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        if let Some(fin) = self.fin.take() {
            let _ = fin.send(());
        }
    }
}

async fn accept_loop(listener: TcpListener, file: Arc<ServedFile>, mut fin: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut fin => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(err) => {
                        error!("Failed to accept file client: {err}");
                        continue;
                    }
                };
                if let Err(err) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {peer}: {err}");
                }
                trace!("File client connected: {peer}");

                let file = Arc::clone(&file);
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, &file).await {
                        debug!("File client {peer} dropped: {err}");
                    }
                });
            }
        }
    }

    debug!("File server stopped");
}

async fn write_head(
    stream: &mut TcpStream,
    status: StatusCode,
    headers: Vec<Header>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    Response::head(status, headers).serialize_into(&mut buf);
    stream.write_all(&buf).await
}

fn content_headers(file: &ServedFile, range: ByteRange, total: u64) -> Vec<Header> {
    let mut headers = Vec::with_capacity(7);
    if range.is_partial(total) {
        headers.push(Header::new("Content-Range", range.content_range(total)));
    }
    headers.extend([
        Header::new("Content-Length", range.length.to_string()),
        Header::new("Content-Type", file.mime),
        Header::new("Connection", "keep-alive"),
        Header::new("Accept-Ranges", "bytes"),
        Header::new("transferMode.dlna.org", "Streaming"),
        Header::new(
            "contentFeatures.dlna.org",
            format!("DLNA.ORG_PN={};{FILE_DLNA_FEATURES}", dlna_profile(file.mime)),
        ),
    ]);
    headers
}

/// Answer requests on one connection until the peer goes away.
async fn handle_client(mut stream: TcpStream, file: &ServedFile) -> anyhow::Result<()> {
    let mut reader = http::RequestReader::new();

    while let Some(request) = reader.read_head(&mut stream).await? {
        let target = &request.start_line.target;
        trace!(
            "{} {}",
            request.start_line.method.to_str(),
            http::decode_path(target).as_deref().unwrap_or(target)
        );

        match request.start_line.method {
            // Renderer probe, answered by closing
            RequestMethod::Head => return Ok(()),
            RequestMethod::Get => {}
            _ => {
                let headers = vec![Header::new("Content-Length", "0")];
                write_head(&mut stream, StatusCode::NotImplemented, headers).await?;
                continue;
            }
        }

        let total = tokio::fs::metadata(&file.path).await?.len();
        let range = match http::parse_range(request.header("range"), total) {
            Ok(range) => range,
            Err(RangeError::Malformed) => ByteRange::full(total),
            Err(RangeError::Unsatisfiable) => {
                let headers = vec![
                    Header::new("Content-Range", format!("bytes */{total}")),
                    Header::new("Content-Length", "0"),
                ];
                write_head(&mut stream, StatusCode::RangeNotSatisfiable, headers).await?;
                continue;
            }
        };

        let status = if range.is_partial(total) {
            StatusCode::PartialContent
        } else {
            StatusCode::Ok
        };
        write_head(&mut stream, status, content_headers(file, range, total)).await?;
        send_body(&mut stream, &file.path, range).await?;
    }

    Ok(())
}

async fn send_body(stream: &mut TcpStream, path: &Path, range: ByteRange) -> anyhow::Result<()> {
    let mut source = File::open(path).await?;
    if range.start > 0 {
        source.seek(SeekFrom::Start(range.start)).await?;
    }

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut remaining = range.length;
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let read = source.read(&mut chunk[..want]).await?;
        if read == 0 {
            anyhow::bail!("{} ended {remaining} bytes early", path.display());
        }
        stream.write_all(&chunk[..read]).await?;
        remaining -= read as u64;
    }

    stream.flush().await?;
    Ok(())
}
