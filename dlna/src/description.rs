//! Parsing of UPnP device description documents.

use std::collections::BTreeMap;

use log::debug;
use quick_xml::events::Event;
use quick_xml::Reader;
use url::Url;

use crate::device::{Device, Service};

#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    #[error("invalid description location `{0}`")]
    InvalidLocation(String),
    #[error("malformed description document: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("description has no device element")]
    MissingDevice,
    #[error("device is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Turn an endpoint from a description into an absolute URL.
///
/// Absolute URLs are returned unchanged, everything else is treated as a path on the
/// scheme, host and port of `location`.
pub fn resolve_url(location: &Url, endpoint: &str) -> String {
    if let Ok(absolute) = Url::parse(endpoint) {
        if matches!(absolute.scheme(), "http" | "https") {
            return endpoint.to_owned();
        }
    }

    let host = location
        .host()
        .map(|h| h.to_string())
        .unwrap_or_default();
    let port = location.port_or_known_default().unwrap_or(80);
    let sep = if endpoint.starts_with('/') { "" } else { "/" };

    format!("{}://{host}:{port}{sep}{endpoint}", location.scheme())
}

#[derive(Default)]
struct Identity {
    friendly_name: Option<String>,
    device_type: Option<String>,
    manufacturer: Option<String>,
    model_name: Option<String>,
    udn: Option<String>,
    presentation_url: Option<String>,
}

#[derive(Default)]
struct ServiceFields {
    service_type: Option<String>,
    service_id: Option<String>,
    control_url: Option<String>,
    event_sub_url: Option<String>,
    scpd_url: Option<String>,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_owned())
}

/// Parse a description document fetched from `location`.
///
/// Identity is taken from the root device. Services are collected from the root device and
/// any embedded devices, services without a type or control URL are skipped.
pub fn parse_description(xml: &str, location: &str) -> Result<Device, DescriptionError> {
    let base = Url::parse(location)
        .map_err(|_| DescriptionError::InvalidLocation(location.to_owned()))?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    // Depth of the root device element in `stack`
    let mut root_device: Option<usize> = None;
    let mut identity = Identity::default();
    let mut current_service: Option<ServiceFields> = None;
    let mut services = BTreeMap::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "device" && root_device.is_none() {
                    root_device = Some(stack.len());
                }
                if name == "service" {
                    current_service = Some(ServiceFields::default());
                }
                stack.push(name);
                text.clear();
            }
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    continue;
                };
                let parent = stack.last().map(String::as_str);

                if name == "service" {
                    if let Some(fields) = current_service.take() {
                        match (fields.service_type, fields.control_url) {
                            (Some(service_type), Some(control_url)) => {
                                let service = Service {
                                    service_type: service_type.clone(),
                                    service_id: fields.service_id,
                                    control_url: resolve_url(&base, &control_url),
                                    event_sub_url: fields
                                        .event_sub_url
                                        .map(|u| resolve_url(&base, &u)),
                                    scpd_url: fields.scpd_url.map(|u| resolve_url(&base, &u)),
                                };
                                services.insert(service_type, service);
                            }
                            (service_type, _) => {
                                debug!("Skipping incomplete service {service_type:?} at {location}")
                            }
                        }
                    }
                } else if parent == Some("service") {
                    if let Some(fields) = current_service.as_mut() {
                        let value = non_empty(&text);
                        match name.as_str() {
                            "serviceType" => fields.service_type = value,
                            "serviceId" => fields.service_id = value,
                            "controlURL" => fields.control_url = value,
                            "eventSubURL" => fields.event_sub_url = value,
                            "SCPDURL" => fields.scpd_url = value,
                            _ => (),
                        }
                    }
                } else if parent == Some("device") && root_device == Some(stack.len() - 1) {
                    let value = non_empty(&text);
                    match name.as_str() {
                        "friendlyName" => identity.friendly_name = value,
                        "deviceType" => identity.device_type = value,
                        "manufacturer" => identity.manufacturer = value,
                        "modelName" => identity.model_name = value,
                        "UDN" => identity.udn = value,
                        "presentationURL" => identity.presentation_url = value,
                        _ => (),
                    }
                }
                text.clear();
            }
            Event::Eof => break,
            _ => (),
        }
    }

    if root_device.is_none() {
        return Err(DescriptionError::MissingDevice);
    }

    let udn = identity
        .udn
        .ok_or(DescriptionError::MissingField("UDN"))?;
    let uuid = udn
        .strip_prefix("uuid:")
        .map(str::to_owned)
        .unwrap_or(udn);

    Ok(Device {
        uuid,
        friendly_name: identity
            .friendly_name
            .ok_or(DescriptionError::MissingField("friendlyName"))?,
        device_type: identity
            .device_type
            .ok_or(DescriptionError::MissingField("deviceType"))?,
        manufacturer: identity
            .manufacturer
            .ok_or(DescriptionError::MissingField("manufacturer"))?,
        model_name: identity
            .model_name
            .ok_or(DescriptionError::MissingField("modelName"))?,
        presentation_url: identity
            .presentation_url
            .map(|u| resolve_url(&base, &u)),
        location: location.to_owned(),
        services,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::device::AV_TRANSPORT;

    pub(crate) const RENDERER: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room &amp; Kitchen</friendlyName>
    <manufacturer>ACME</manufacturer>
    <modelName>TV 9000</modelName>
    <UDN>uuid:5f9ec1b3-ed59-79bb-4530-745f4e4c6da5</UDN>
    <presentationURL>/web/</presentationURL>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/AVTransport/control</controlURL>
        <eventSubURL>AVTransport/event</eventSubURL>
        <SCPDURL>http://10.0.0.9:8080/avt.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:Embedded:1</deviceType>
        <friendlyName>Embedded</friendlyName>
        <UDN>uuid:embedded</UDN>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
            <controlURL>/ConnectionManager/control</controlURL>
          </service>
        </serviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn resolves_endpoints() {
        let base = Url::parse("http://192.168.1.5:49152/description.xml").unwrap();
        assert_eq!(
            resolve_url(&base, "/ctl"),
            "http://192.168.1.5:49152/ctl"
        );
        assert_eq!(resolve_url(&base, "ctl"), "http://192.168.1.5:49152/ctl");
        assert_eq!(
            resolve_url(&base, "http://10.0.0.1/ctl"),
            "http://10.0.0.1/ctl"
        );

        let default_port = Url::parse("http://tv.local/desc.xml").unwrap();
        assert_eq!(resolve_url(&default_port, "x"), "http://tv.local:80/x");
    }

    #[test]
    fn relative_endpoint_starting_with_http() {
        let base = Url::parse("http://192.168.1.5:49152/description.xml").unwrap();
        assert_eq!(
            resolve_url(&base, "httpctl/av"),
            "http://192.168.1.5:49152/httpctl/av"
        );
        assert_eq!(
            resolve_url(&base, "/http/AVTransport"),
            "http://192.168.1.5:49152/http/AVTransport"
        );
        assert_eq!(
            resolve_url(&base, "HTTPS://10.0.0.1:8443/ctl"),
            "HTTPS://10.0.0.1:8443/ctl"
        );
    }

    #[test]
    fn parses_renderer() {
        let device = parse_description(RENDERER, "http://192.168.1.5:49152/desc.xml").unwrap();

        assert_eq!(device.uuid, "5f9ec1b3-ed59-79bb-4530-745f4e4c6da5");
        assert_eq!(device.friendly_name, "Living Room & Kitchen");
        assert_eq!(device.manufacturer, "ACME");
        assert_eq!(device.model_name, "TV 9000");
        assert_eq!(
            device.device_type,
            "urn:schemas-upnp-org:device:MediaRenderer:1"
        );
        assert_eq!(
            device.presentation_url.as_deref(),
            Some("http://192.168.1.5:49152/web/")
        );
        assert_eq!(device.location, "http://192.168.1.5:49152/desc.xml");

        let avt = device.service(AV_TRANSPORT).unwrap();
        assert_eq!(avt.control_url, "http://192.168.1.5:49152/AVTransport/control");
        assert_eq!(
            avt.event_sub_url.as_deref(),
            Some("http://192.168.1.5:49152/AVTransport/event")
        );
        assert_eq!(avt.scpd_url.as_deref(), Some("http://10.0.0.9:8080/avt.xml"));
        assert_eq!(
            avt.service_id.as_deref(),
            Some("urn:upnp-org:serviceId:AVTransport")
        );

        // No control URL
        assert!(!device.has_service("urn:schemas-upnp-org:service:RenderingControl:1"));
        // Embedded device services are kept
        assert!(device.has_service("urn:schemas-upnp-org:service:ConnectionManager:1"));
        assert_eq!(device.services.len(), 2);
    }

    #[test]
    fn prefixed_namespace() {
        let xml = r#"<d:root xmlns:d="urn:schemas-upnp-org:device-1-0"><d:device>
            <d:deviceType>t</d:deviceType><d:friendlyName>f</d:friendlyName>
            <d:manufacturer>m</d:manufacturer><d:modelName>n</d:modelName>
            <d:UDN>plain-id</d:UDN></d:device></d:root>"#;
        let device = parse_description(xml, "http://h:1/d.xml").unwrap();
        assert_eq!(device.uuid, "plain-id");
        assert!(device.services.is_empty());
        assert!(device.av_transport().is_none());
    }

    #[test]
    fn missing_identity_field() {
        let xml = "<root><device><deviceType>t</deviceType><friendlyName>f</friendlyName>\
                   <manufacturer>m</manufacturer><UDN>uuid:x</UDN></device></root>";
        assert!(matches!(
            parse_description(xml, "http://h:1/d.xml"),
            Err(DescriptionError::MissingField("modelName"))
        ));
    }

    #[test]
    fn missing_device() {
        assert!(matches!(
            parse_description("<root><specVersion/></root>", "http://h:1/d.xml"),
            Err(DescriptionError::MissingDevice)
        ));
    }

    #[test]
    fn malformed_xml() {
        assert!(matches!(
            parse_description("<root><device></root>", "http://h:1/d.xml"),
            Err(DescriptionError::Xml(_))
        ));
    }

    #[test]
    fn bad_location() {
        assert!(matches!(
            parse_description(RENDERER, "not a url"),
            Err(DescriptionError::InvalidLocation(_))
        ));
    }
}
