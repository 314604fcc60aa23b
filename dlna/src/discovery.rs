//! SSDP search for UPnP root devices.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, trace, warn};
use regex::Regex;
use reqwest::header::USER_AGENT;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};

use crate::description::parse_description;
use crate::device::Device;

pub const SSDP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;
pub const SEARCH_TARGET: &str = "upnp:rootdevice";
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(2);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    DeviceDiscovered(Device),
    /// Always reported with `success` set, failures during a search are absorbed.
    SearchComplete { devices: Vec<Device>, success: bool },
    /// A response that did not produce a device.
    ResponseDropped {
        location: Option<String>,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub user_agent: String,
    pub fetch_timeout: Duration,
    pub multicast_ttl: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            user_agent: "DLNA-Sender/1.0".to_owned(),
            fetch_timeout: Duration::from_secs(3),
            multicast_ttl: 2,
        }
    }
}

pub fn search_request() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_ADDR}:{SSDP_PORT}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 2\r\n\
         ST: {SEARCH_TARGET}\r\n\
         \r\n"
    )
}

/// State shared with the per-response fetch tasks.
struct Shared {
    config: DiscoveryConfig,
    client: reqwest::Client,
    location_re: Regex,
    devices: Mutex<Vec<Device>>,
    events: broadcast::Sender<DiscoveryEvent>,
    /// Incremented for every search, late fetches from an older search are discarded.
    generation: AtomicU64,
}

impl Shared {
    fn emit(&self, event: DiscoveryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn drop_response(&self, location: Option<String>, reason: String) {
        debug!("Dropped SSDP response (location: {location:?}): {reason}");
        self.emit(DiscoveryEvent::ResponseDropped { location, reason });
    }

    fn location(&self, raw: &str) -> Option<String> {
        self.location_re
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_owned())
    }

    async fn fetch(&self, location: &str) -> Result<String> {
        let body = self
            .client
            .get(location)
            .header(USER_AGENT, &self.config.user_agent)
            .timeout(self.config.fetch_timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    async fn handle_response(&self, raw: &str, generation: u64) {
        let Some(location) = self.location(raw) else {
            // Other control points' M-SEARCH requests end up here too
            if raw.starts_with("HTTP/") || raw.starts_with("NOTIFY") {
                self.drop_response(None, "no LOCATION header".to_owned());
            } else {
                trace!("Ignoring SSDP message without LOCATION");
            }
            return;
        };

        if url::Url::parse(&location).is_err() {
            self.drop_response(Some(location), "LOCATION is not an absolute URL".to_owned());
            return;
        }

        let xml = match self.fetch(&location).await {
            Ok(xml) => xml,
            Err(err) => {
                self.drop_response(Some(location), format!("description fetch failed: {err}"));
                return;
            }
        };

        let device = match parse_description(&xml, &location) {
            Ok(device) => device,
            Err(err) => {
                self.drop_response(Some(location), err.to_string());
                return;
            }
        };

        {
            let Ok(mut devices) = self.devices.lock() else {
                warn!("Device list lock poisoned");
                return;
            };
            if self.generation.load(Ordering::Acquire) != generation {
                trace!("Discarding {device} from a previous search");
                return;
            }
            if devices.iter().any(|d| d.uuid == device.uuid) {
                trace!("Already know {}", device.uuid);
                return;
            }
            devices.push(device.clone());
            // Emitted under the lock so one event fires per UUID
            info!("Discovered {device} at {location}");
            self.emit(DiscoveryEvent::DeviceDiscovered(device));
        }
    }
}

fn open_socket(ttl: u32) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    let well_known = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT);
    if let Err(err) = socket.bind(&well_known.into()) {
        debug!("Could not bind {well_known} ({err}), using an ephemeral port");
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    }

    if let Err(err) = socket.join_multicast_v4(&SSDP_ADDR, &Ipv4Addr::UNSPECIFIED) {
        warn!("Failed to join SSDP multicast group: {err}");
    }
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

/// Finds renderers with SSDP `M-SEARCH`.
///
/// Results are published incrementally on [`DeviceFinder::subscribe`] and returned as a
/// snapshot from [`DeviceFinder::search`].
pub struct DeviceFinder {
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
}

impl DeviceFinder {
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        let location_re = Regex::new(r"(?im)^LOCATION:\s*(.+)$")?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                client,
                location_re,
                devices: Mutex::new(Vec::new()),
                events,
                generation: AtomicU64::new(0),
            }),
            stop_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.shared.events.subscribe()
    }

    /// Devices found by the current or last search.
    pub fn devices(&self) -> Vec<Device> {
        self.shared
            .devices
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Stop a running search. Calling it when no search is running does nothing.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Search for `timeout` and return every device found.
    ///
    /// Never fails: network and parse errors are logged and reported as
    /// [`DiscoveryEvent::ResponseDropped`]. Fetches still in flight when the window closes
    /// may emit [`DiscoveryEvent::DeviceDiscovered`] afterwards.
    pub async fn search(&self, timeout: Duration) -> Vec<Device> {
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Ok(mut devices) = self.shared.devices.lock() {
            devices.clear();
        }
        self.stop_tx.send_replace(false);
        // A stop() from here on is seen by the receive loop, it checks the current value
        let mut stop_rx = self.stop_tx.subscribe();

        match open_socket(self.shared.config.multicast_ttl) {
            Ok(socket) => self.receive(socket, timeout, generation, &mut stop_rx).await,
            Err(err) => warn!("Failed to open SSDP socket: {err}"),
        }

        let devices = self.devices();
        debug!("Search finished with {} device(s)", devices.len());
        self.shared.emit(DiscoveryEvent::SearchComplete {
            devices: devices.clone(),
            success: true,
        });

        devices
    }

    async fn receive(
        &self,
        socket: UdpSocket,
        timeout: Duration,
        generation: u64,
        stop_rx: &mut watch::Receiver<bool>,
    ) {
        if *stop_rx.borrow_and_update() {
            debug!("Search stopped before it started");
            return;
        }

        let target = SocketAddr::V4(SocketAddrV4::new(SSDP_ADDR, SSDP_PORT));
        if let Err(err) = socket.send_to(search_request().as_bytes(), target).await {
            warn!("Failed to send M-SEARCH: {err}");
            return;
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = stop_rx.wait_for(|stopped| *stopped) => {
                    debug!("Search stopped");
                    break;
                }
                r = socket.recv_from(&mut buf) => {
                    let (len, from) = match r {
                        Ok(r) => r,
                        Err(err) => {
                            debug!("SSDP receive failed: {err}");
                            continue;
                        }
                    };
                    let raw = String::from_utf8_lossy(&buf[..len]).into_owned();
                    trace!("SSDP datagram from {from}: {raw:?}");

                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        shared.handle_response(&raw, generation).await;
                    });
                }
            }
        }
    }

    #[cfg(test)]
    async fn handle_response(&self, raw: &str) {
        let generation = self.shared.generation.load(Ordering::Acquire);
        self.shared.handle_response(raw, generation).await;
    }
}

impl Drop for DeviceFinder {
    fn drop(&mut self) {
        self.stop();
    }
}
