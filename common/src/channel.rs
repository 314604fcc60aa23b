//! Byte channel between an in-process producer and the encoder subprocess.
//!
//! The channel is a loopback TCP listener. The encoder is handed [`DuplexByteChannel::url`]
//! as an input and connects to it, which is what "attaching" means here. Once attached, the
//! producer gets a blocking [`ChannelWriter`] it can push raw bytes into from a plain thread.

use std::io::Write;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use log::debug;
use tokio::net::TcpListener;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to open {name} channel: {source}")]
    Bind {
        name: &'static str,
        source: std::io::Error,
    },
    #[error("encoder did not attach to the {name} channel within {timeout:?}")]
    AttachTimeout {
        name: &'static str,
        timeout: Duration,
    },
    #[error("failed to accept on the {name} channel: {source}")]
    Accept {
        name: &'static str,
        source: std::io::Error,
    },
}

pub struct DuplexByteChannel {
    name: &'static str,
    listener: TcpListener,
    addr: SocketAddr,
}

impl DuplexByteChannel {
    pub async fn bind(name: &'static str) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|source| ChannelError::Bind { name, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ChannelError::Bind { name, source })?;

        debug!("{name} channel listening on {addr}");

        Ok(Self {
            name,
            listener,
            addr,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The address the encoder should read from.
    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Wait for the encoder to attach.
    pub async fn accept(&self, timeout: Duration) -> Result<ChannelWriter, ChannelError> {
        let name = self.name;
        let (stream, peer) = tokio::time::timeout(timeout, self.listener.accept())
            .await
            .map_err(|_| ChannelError::AttachTimeout { name, timeout })?
            .map_err(|source| ChannelError::Accept { name, source })?;

        debug!("Encoder attached to the {name} channel from {peer}");

        let stream = stream
            .into_std()
            .map_err(|source| ChannelError::Accept { name, source })?;
        stream
            .set_nonblocking(false)
            .map_err(|source| ChannelError::Accept { name, source })?;
        stream
            .set_nodelay(true)
            .map_err(|source| ChannelError::Accept { name, source })?;

        Ok(ChannelWriter { stream })
    }
}

/// Blocking write half of an attached channel.
pub struct ChannelWriter {
    stream: TcpStream,
}

impl ChannelWriter {
    /// A handle that can close the channel from another thread, unblocking a pending write.
    pub fn closer(&self) -> std::io::Result<ChannelCloser> {
        Ok(ChannelCloser {
            stream: self.stream.try_clone()?,
        })
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

pub struct ChannelCloser {
    stream: TcpStream,
}

impl ChannelCloser {
    pub fn close(&self) {
        // Already closed by the peer is fine
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
