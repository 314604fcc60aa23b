use std::collections::BTreeMap;
use std::fmt::Display;

use serde::Serialize;

pub const AV_TRANSPORT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

const AV_TRANSPORT_PREFIX: &str = "urn:schemas-upnp-org:service:AVTransport:";

/// A service advertised in a device description. URLs are already absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub service_type: String,
    pub service_id: Option<String>,
    pub control_url: String,
    pub event_sub_url: Option<String>,
    pub scpd_url: Option<String>,
}

/// A renderer found on the network.
///
/// Devices without an AVTransport service are still reported, they are only rejected when
/// someone tries to cast to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// UDN with the `uuid:` prefix removed.
    pub uuid: String,
    pub friendly_name: String,
    pub device_type: String,
    pub manufacturer: String,
    pub model_name: String,
    pub presentation_url: Option<String>,
    /// Where the description document was fetched from.
    pub location: String,
    /// Keyed by service type.
    pub services: BTreeMap<String, Service>,
}

impl Device {
    pub fn service(&self, service_type: &str) -> Option<&Service> {
        self.services.get(service_type)
    }

    pub fn has_service(&self, service_type: &str) -> bool {
        self.services.contains_key(service_type)
    }

    /// The AVTransport service, preferring version 1 when several versions are advertised.
    pub fn av_transport(&self) -> Option<&Service> {
        self.service(AV_TRANSPORT).or_else(|| {
            self.services
                .iter()
                .find(|(ty, _)| ty.starts_with(AV_TRANSPORT_PREFIX))
                .map(|(_, service)| service)
        })
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} {})",
            self.friendly_name, self.manufacturer, self.model_name
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn service(service_type: &str, control_url: &str) -> Service {
        Service {
            service_type: service_type.to_owned(),
            service_id: None,
            control_url: control_url.to_owned(),
            event_sub_url: None,
            scpd_url: None,
        }
    }

    pub(crate) fn device(services: &[Service]) -> Device {
        Device {
            uuid: "1234".to_owned(),
            friendly_name: "Living Room".to_owned(),
            device_type: "urn:schemas-upnp-org:device:MediaRenderer:1".to_owned(),
            manufacturer: "ACME".to_owned(),
            model_name: "TV 9000".to_owned(),
            presentation_url: None,
            location: "http://192.168.1.2:1400/desc.xml".to_owned(),
            services: services
                .iter()
                .map(|s| (s.service_type.clone(), s.clone()))
                .collect(),
        }
    }

    #[test]
    fn display() {
        assert_eq!(device(&[]).to_string(), "Living Room (ACME TV 9000)");
    }

    #[test]
    fn av_transport_lookup() {
        let none = device(&[service(
            "urn:schemas-upnp-org:service:RenderingControl:1",
            "http://h/rc",
        )]);
        assert!(none.av_transport().is_none());

        let v1 = device(&[service(AV_TRANSPORT, "http://h/avt")]);
        assert_eq!(v1.av_transport().unwrap().control_url, "http://h/avt");
        assert!(v1.has_service(AV_TRANSPORT));

        let v2 = device(&[service(
            "urn:schemas-upnp-org:service:AVTransport:2",
            "http://h/avt2",
        )]);
        assert_eq!(v2.av_transport().unwrap().control_url, "http://h/avt2");

        let both = device(&[
            service("urn:schemas-upnp-org:service:AVTransport:2", "http://h/avt2"),
            service(AV_TRANSPORT, "http://h/avt1"),
        ]);
        assert_eq!(both.av_transport().unwrap().control_url, "http://h/avt1");
    }
}
