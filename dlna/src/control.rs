//! SOAP actions on a renderer's AVTransport service.

use std::fmt::Display;
use std::time::Duration;

use log::{debug, trace};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};

use crate::device::Service;
use crate::xml_escape;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// UPnP error details from a SOAP fault body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapFault {
    pub code: Option<String>,
    pub description: Option<String>,
}

impl Display for SoapFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.description) {
            (Some(code), Some(desc)) => write!(f, "UPnP error {code}: {desc}"),
            (Some(code), None) => write!(f, "UPnP error {code}"),
            (None, Some(desc)) => f.write_str(desc),
            (None, None) => f.write_str("unknown fault"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{action} timed out after {timeout:?}")]
    Timeout {
        action: &'static str,
        timeout: Duration,
    },
    #[error("{action} could not reach the renderer: {source}")]
    Transport {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{action} was rejected with HTTP {status}{}", .fault.as_ref().map(|f| format!(" ({f})")).unwrap_or_default())]
    Status {
        action: &'static str,
        status: u16,
        fault: Option<SoapFault>,
    },
}

/// Build the SOAP envelope for `action` with already ordered arguments.
pub fn envelope(service_type: &str, action: &str, args: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, value) in args {
        body.push_str(&format!("<{name}>{}</{name}>", xml_escape(value)));
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
         <s:Body><u:{action} xmlns:u=\"{service_type}\">{body}</u:{action}></s:Body>\
         </s:Envelope>"
    )
}

/// Extract `errorCode`/`errorDescription` from a fault response, if it is one.
pub fn parse_fault(body: &str) -> Option<SoapFault> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut fault = SoapFault::default();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Text(e)) => {
                let Ok(text) = e.unescape() else {
                    continue;
                };
                match current.as_deref() {
                    Some("errorCode") => fault.code = Some(text.trim().to_owned()),
                    Some("errorDescription") => fault.description = Some(text.trim().to_owned()),
                    _ => (),
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => (),
        }
    }

    (fault.code.is_some() || fault.description.is_some()).then_some(fault)
}

/// Sends AVTransport actions. No retries are attempted.
#[derive(Clone)]
pub struct ControlClient {
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
}

impl ControlClient {
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .http1_title_case_headers()
            // Renderers are on the local network
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            timeout,
            user_agent: user_agent.into(),
        })
    }

    pub async fn set_av_transport_uri(
        &self,
        service: &Service,
        uri: &str,
        metadata: &str,
    ) -> Result<(), ControlError> {
        self.invoke(
            service,
            "SetAVTransportURI",
            &[
                ("InstanceID", "0"),
                ("CurrentURI", uri),
                ("CurrentURIMetaData", metadata),
            ],
        )
        .await
        .map(|_| ())
    }

    pub async fn play(&self, service: &Service) -> Result<(), ControlError> {
        self.invoke(service, "Play", &[("InstanceID", "0"), ("Speed", "1")])
            .await
            .map(|_| ())
    }

    pub async fn stop(&self, service: &Service) -> Result<(), ControlError> {
        self.invoke(service, "Stop", &[("InstanceID", "0")])
            .await
            .map(|_| ())
    }

    /// POST one action to the service's control URL and return the response body.
    async fn invoke(
        &self,
        service: &Service,
        action: &'static str,
        args: &[(&str, &str)],
    ) -> Result<String, ControlError> {
        let body = envelope(&service.service_type, action, args);
        trace!("{action} -> {}: {body}", service.control_url);

        let map_err = |source: reqwest::Error| {
            if source.is_timeout() {
                ControlError::Timeout {
                    action,
                    timeout: self.timeout,
                }
            } else {
                ControlError::Transport { action, source }
            }
        };

        let response = self
            .client
            .post(&service.control_url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "text/xml; charset=\"utf-8\"")
            .header(USER_AGENT, &self.user_agent)
            .header(
                "SOAPACTION",
                format!("\"{}#{action}\"", service.service_type),
            )
            .body(body)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        let text = response.text().await.map_err(map_err)?;

        if !status.is_success() {
            return Err(ControlError::Status {
                action,
                status: status.as_u16(),
                fault: parse_fault(&text),
            });
        }

        debug!("{action} succeeded on {}", service.control_url);

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::device::tests::service;
    use crate::device::AV_TRANSPORT;

    const FAULT: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring>
    <detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
      <errorCode>714</errorCode><errorDescription>Illegal MIME-type</errorDescription>
    </UPnPError></detail>
  </s:Fault></s:Body>
</s:Envelope>"#;

    #[test]
    fn builds_envelope() {
        let env = envelope(AV_TRANSPORT, "Play", &[("InstanceID", "0"), ("Speed", "1")]);
        assert_eq!(
            env,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
             s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
             <s:Body><u:Play xmlns:u=\"urn:schemas-upnp-org:service:AVTransport:1\">\
             <InstanceID>0</InstanceID><Speed>1</Speed></u:Play></s:Body></s:Envelope>"
        );
    }

    #[test]
    fn escapes_arguments() {
        let env = envelope(
            AV_TRANSPORT,
            "SetAVTransportURI",
            &[("CurrentURIMetaData", "<DIDL-Lite>a & b</DIDL-Lite>")],
        );
        assert!(env.contains(
            "<CurrentURIMetaData>&lt;DIDL-Lite&gt;a &amp; b&lt;/DIDL-Lite&gt;</CurrentURIMetaData>"
        ));
    }

    #[test]
    fn parses_fault() {
        assert_eq!(
            parse_fault(FAULT),
            Some(SoapFault {
                code: Some("714".to_owned()),
                description: Some("Illegal MIME-type".to_owned()),
            })
        );
        assert_eq!(parse_fault("<ok/>"), None);
        assert_eq!(parse_fault("not xml at all <"), None);
    }

    struct Recorded {
        soap_action: Option<String>,
        content_type: Option<String>,
        target: String,
        body: String,
    }

    /// Answer one POST with `status` and `reply`, recording what was sent.
    async fn renderer(
        status: http::StatusCode,
        reply: &'static str,
    ) -> (String, Arc<Mutex<Option<Recorded>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(None));
        let recorded_clone = Arc::clone(&recorded);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut reader = http::RequestReader::new();
            let request = reader.read_head(&mut stream).await.unwrap().unwrap();
            let body = request.body.clone().unwrap_or_default();

            *recorded_clone.lock().unwrap() = Some(Recorded {
                soap_action: request.header("soapaction").map(str::to_owned),
                content_type: request.header("content-type").map(str::to_owned),
                target: request.start_line.target.clone(),
                body: String::from_utf8(body).unwrap(),
            });

            let mut buf = Vec::new();
            http::Response::head(
                status,
                vec![
                    http::Header::new("Content-Length", reply.len().to_string()),
                    http::Header::new("Connection", "close"),
                ],
            )
            .serialize_into(&mut buf);
            buf.extend_from_slice(reply.as_bytes());
            stream.write_all(&buf).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        (format!("http://{addr}/AVTransport/control"), recorded)
    }

    #[tokio::test]
    async fn sends_set_uri() {
        let (url, recorded) = renderer(http::StatusCode::Ok, "").await;
        let client = ControlClient::new(DEFAULT_TIMEOUT, "test").unwrap();

        client
            .set_av_transport_uri(
                &service(AV_TRANSPORT, &url),
                "http://192.168.1.3:4000/a.mp4",
                "<DIDL-Lite/>",
            )
            .await
            .unwrap();

        let recorded = recorded.lock().unwrap().take().unwrap();
        assert_eq!(recorded.target, "/AVTransport/control");
        assert_eq!(
            recorded.soap_action.as_deref(),
            Some("\"urn:schemas-upnp-org:service:AVTransport:1#SetAVTransportURI\"")
        );
        assert!(recorded.content_type.unwrap().starts_with("text/xml"));
        assert!(recorded.body.contains(
            "<InstanceID>0</InstanceID>\
             <CurrentURI>http://192.168.1.3:4000/a.mp4</CurrentURI>\
             <CurrentURIMetaData>&lt;DIDL-Lite/&gt;</CurrentURIMetaData>"
        ));
    }

    #[tokio::test]
    async fn reports_fault() {
        let (url, _) = renderer(http::StatusCode::InternalServerError, FAULT).await;
        let client = ControlClient::new(DEFAULT_TIMEOUT, "test").unwrap();

        let err = client
            .play(&service(AV_TRANSPORT, &url))
            .await
            .unwrap_err();
        match err {
            ControlError::Status {
                action,
                status,
                fault,
            } => {
                assert_eq!(action, "Play");
                assert_eq!(status, 500);
                assert_eq!(fault.unwrap().code.as_deref(), Some("714"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn times_out() {
        // Accepts but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client = ControlClient::new(Duration::from_millis(200), "test").unwrap();
        let err = client
            .stop(&service(AV_TRANSPORT, &format!("http://{addr}/ctl")))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Timeout { action: "Stop", .. }));
    }

    #[tokio::test]
    async fn unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ControlClient::new(DEFAULT_TIMEOUT, "test").unwrap();
        let err = client
            .stop(&service(AV_TRANSPORT, &format!("http://{addr}/ctl")))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Transport { action: "Stop", .. }));
    }
}
