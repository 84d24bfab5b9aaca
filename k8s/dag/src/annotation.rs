use std::collections::BTreeMap;
use trellis_ingress_k8s_api::{ServicePort, API_GROUP};
use trellis_ingress_core::{MinTlsVersion, Protocol};

/// Reads the upstream protocol for a service port from annotations of the
/// form `trellis.dev/upstream-protocol.<proto>: "<port>[,<port>...]"` where
/// each entry is a port number or port name. The first matching protocol in
/// {h2, h2c, tls} wins.
pub(crate) fn upstream_protocol(
    annotations: &BTreeMap<String, String>,
    port: &ServicePort,
) -> Option<Protocol> {
    for protocol in [Protocol::H2, Protocol::H2c, Protocol::Tls] {
        let key = format!("{API_GROUP}/upstream-protocol.{}", protocol.as_str());
        let Some(ports) = annotations.get(&key) else {
            continue;
        };
        for entry in ports.split(',').map(str::trim) {
            if entry.is_empty() {
                continue;
            }
            let matched = match entry.parse::<i32>() {
                Ok(number) => number == port.port,
                Err(_) => port.name.as_deref() == Some(entry),
            };
            if matched {
                return Some(protocol);
            }
        }
    }
    None
}

/// Maps a `minimumProtocolVersion` field to a TLS version, defaulting to the
/// oldest supported version for unrecognized values.
pub(crate) fn min_tls_version(version: Option<&str>) -> MinTlsVersion {
    match version {
        Some("1.2") => MinTlsVersion::V1_2,
        Some("1.3") => MinTlsVersion::V1_3,
        _ => MinTlsVersion::V1_1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_port(name: Option<&str>, port: i32) -> ServicePort {
        ServicePort {
            name: name.map(str::to_string),
            port,
            ..Default::default()
        }
    }

    fn mk_annotations(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn protocol_annotation_matches_port_numbers_and_names() {
        let annotations = mk_annotations(&[("trellis.dev/upstream-protocol.h2c", "80,grpc")]);
        assert_eq!(
            upstream_protocol(&annotations, &mk_port(None, 80)),
            Some(Protocol::H2c)
        );
        assert_eq!(
            upstream_protocol(&annotations, &mk_port(Some("grpc"), 8080)),
            Some(Protocol::H2c)
        );
        assert_eq!(upstream_protocol(&annotations, &mk_port(None, 443)), None);
    }

    #[test]
    fn tls_annotation_selects_tls() {
        let annotations = mk_annotations(&[("trellis.dev/upstream-protocol.tls", " 443 ")]);
        assert_eq!(
            upstream_protocol(&annotations, &mk_port(None, 443)),
            Some(Protocol::Tls)
        );
    }

    #[test]
    fn minimum_protocol_version_defaults() {
        assert_eq!(min_tls_version(Some("1.2")), MinTlsVersion::V1_2);
        assert_eq!(min_tls_version(Some("1.3")), MinTlsVersion::V1_3);
        assert_eq!(min_tls_version(Some("1.4")), MinTlsVersion::V1_1);
        assert_eq!(min_tls_version(None), MinTlsVersion::V1_1);
    }
}
