#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dlna::{Device, Service, AV_TRANSPORT};
use sender::{CastEvent, Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Answers AVTransport actions and records them in order.
pub struct MockRenderer {
    pub addr: SocketAddr,
    actions: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockRenderer {
    /// `fail` names an action answered with a SOAP fault.
    pub async fn start(fail: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let actions = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&actions);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&recorded), fail));
            }
        });

        Self { addr, actions }
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .map(|(action, _)| action.clone())
            .collect()
    }

    /// SOAP envelope of the first `action` received.
    pub fn envelope(&self, action: &str) -> Option<String> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == action)
            .map(|(_, body)| body.clone())
    }

    pub fn device(&self) -> Device {
        let service = Service {
            service_type: AV_TRANSPORT.to_owned(),
            service_id: Some("urn:upnp-org:serviceId:AVTransport".to_owned()),
            control_url: format!("http://{}/AVTransport/control", self.addr),
            event_sub_url: None,
            scpd_url: None,
        };
        Device {
            uuid: "5f9ec1b3-ed59-4a1b-8d2a-1b2c3d4e5f60".to_owned(),
            friendly_name: "Mock TV".to_owned(),
            device_type: "urn:schemas-upnp-org:device:MediaRenderer:1".to_owned(),
            manufacturer: "Test".to_owned(),
            model_name: "Renderer".to_owned(),
            presentation_url: None,
            location: format!("http://{}/description.xml", self.addr),
            services: [(service.service_type.clone(), service)].into_iter().collect(),
        }
    }
}

async fn serve(
    mut stream: TcpStream,
    actions: Arc<Mutex<Vec<(String, String)>>>,
    fail: Option<&'static str>,
) {
    let mut reader = http::RequestReader::new();
    while let Ok(Some(request)) = reader.read_head(&mut stream).await {
        let Some(body) = request.body.as_deref() else {
            return;
        };

        let action = request
            .header("soapaction")
            .and_then(|v| v.trim_matches('"').rsplit('#').next())
            .unwrap_or_default()
            .to_owned();
        actions
            .lock()
            .unwrap()
            .push((action.clone(), String::from_utf8_lossy(body).into_owned()));

        let (status, reply) = if Some(action.as_str()) == fail {
            (http::StatusCode::InternalServerError, FAULT)
        } else {
            (http::StatusCode::Ok, "")
        };

        let mut buf = Vec::new();
        http::Response::head(
            status,
            vec![http::Header::new("Content-Length", reply.len().to_string())],
        )
        .serialize_into(&mut buf);
        buf.extend_from_slice(reply.as_bytes());
        if stream.write_all(&buf).await.is_err() {
            return;
        }
    }
}

const FAULT: &str = "<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\"><s:Body>\
<s:Fault><detail><UPnPError xmlns=\"urn:schemas-upnp-org:control-1-0\">\
<errorCode>716</errorCode><errorDescription>Resource not found</errorDescription>\
</UPnPError></detail></s:Fault></s:Body></s:Envelope>";

pub fn config() -> Config {
    Config {
        local_ip: Some(std::net::Ipv4Addr::LOCALHOST),
        play_delay_ms: 10,
        control_timeout_ms: 2000,
        ..Config::default()
    }
}

pub fn media_file(len: usize) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("holiday.mp4");
    std::fs::write(&path, vec![7u8; len]).unwrap();
    (dir, path)
}

/// `host:port` of an `http://host:port/path` URL.
pub fn authority(url: &str) -> &str {
    url.trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap()
}

/// Send a GET and return the response head.
pub async fn get_head(url: &str) -> std::io::Result<(TcpStream, String)> {
    let mut stream = TcpStream::connect(authority(url)).await?;
    let path = &url["http://".len() + authority(url).len()..];
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: {}\r\n\r\n", authority(url)).as_bytes())
        .await?;

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            break;
        }
        head.push(byte[0]);
    }
    Ok((stream, String::from_utf8_lossy(&head).into_owned()))
}

pub async fn next_event(events: &mut broadcast::Receiver<CastEvent>) -> CastEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("no cast event")
        .unwrap()
}
