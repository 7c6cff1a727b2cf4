use thiserror::Error;
use url::{Host, Url};

/// The only DNS name treated as local.
const LOOPBACK_DOMAIN: &str = "localhost";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OriginRejection {
    #[error("malformed Origin header")]
    Malformed,
    #[error("origin scheme '{scheme}' is not http or https")]
    Scheme { scheme: String },
    #[error("origin '{origin}' is not a loopback address")]
    NotLoopback { origin: String },
}

/// Returns `true` if the host portion of a parsed origin is loopback.
///
/// Address ranges are only checked on IP literals, so a domain such as
/// `127.example.com` never qualifies.
fn is_loopback_host(host: Host<&str>) -> bool {
    match host {
        Host::Domain(name) => name.eq_ignore_ascii_case(LOOPBACK_DOMAIN),
        Host::Ipv4(ip) => ip.is_loopback(),
        Host::Ipv6(ip) => ip.is_loopback(),
    }
}

/// Validates the Origin header of an upgrade request or a plain request.
///
/// - If no Origin header is present, the request is allowed (CLI clients and
///   native plugins typically do not send one).
/// - The origin must parse as a URL with an `http` or `https` scheme.
/// - Its host must be `localhost`, `127.0.0.1`, `::1`, or any address in
///   `127.0.0.0/8`. Ports are ignored.
pub fn validate_origin(origin_header: Option<&str>) -> Result<(), OriginRejection> {
    let origin = match origin_header {
        None => return Ok(()),
        Some(o) if o.trim().is_empty() => return Err(OriginRejection::Malformed),
        Some(o) => o,
    };

    let url = Url::parse(origin).map_err(|_| OriginRejection::Malformed)?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(OriginRejection::Scheme {
                scheme: other.to_string(),
            })
        }
    }

    match url.host() {
        Some(host) if is_loopback_host(host.clone()) => Ok(()),
        Some(_) => Err(OriginRejection::NotLoopback {
            origin: origin.to_string(),
        }),
        None => Err(OriginRejection::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // validate_origin
    // -----------------------------------------------------------------------

    #[test]
    fn no_origin_header_is_allowed() {
        assert!(validate_origin(None).is_ok());
    }

    #[test]
    fn empty_origin_is_malformed() {
        assert_eq!(validate_origin(Some("")), Err(OriginRejection::Malformed));
        assert_eq!(validate_origin(Some("   ")), Err(OriginRejection::Malformed));
    }

    #[test]
    fn loopback_origins_are_accepted() {
        let accepted = [
            "http://localhost",
            "http://localhost:3000",
            "https://localhost",
            "http://127.0.0.1",
            "http://127.0.0.1:8080",
            "https://127.0.0.1:443",
            "http://127.1.2.3:5173",
            "http://[::1]",
            "http://[::1]:9000",
            "HTTP://LOCALHOST:3001",
        ];
        for origin in accepted {
            assert!(
                validate_origin(Some(origin)).is_ok(),
                "expected {origin} to be accepted"
            );
        }
    }

    #[test]
    fn remote_origins_are_rejected() {
        let rejected = [
            "https://example.com",
            "http://192.168.1.10:3001",
            "http://10.0.0.1",
            "http://0.0.0.0:3001",
            "http://localhost.evil.com",
            "http://evil-localhost",
            "http://[::2]",
            "http://127.evil.com",
            "http://127.0.0.1.nip.io",
            "https://127.0.0.1.example.org:3001",
        ];
        for origin in rejected {
            match validate_origin(Some(origin)) {
                Err(OriginRejection::NotLoopback { origin: reported }) => {
                    assert_eq!(reported, origin);
                }
                other => panic!("expected NotLoopback for {origin}, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_origins_are_rejected() {
        for origin in ["null", "localhost:3000", "://localhost", "not a url"] {
            assert!(
                validate_origin(Some(origin)).is_err(),
                "expected {origin} to be rejected"
            );
        }
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        assert_eq!(
            validate_origin(Some("file://localhost/index.html")),
            Err(OriginRejection::Scheme {
                scheme: "file".to_string()
            })
        );
        assert!(matches!(
            validate_origin(Some("ws://127.0.0.1:3001")),
            Err(OriginRejection::Scheme { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // is_loopback_host
    // -----------------------------------------------------------------------

    #[test]
    fn is_loopback_host_checks_addresses_not_names() {
        use std::net::{Ipv4Addr, Ipv6Addr};

        assert!(is_loopback_host(Host::Domain("localhost")));
        assert!(is_loopback_host(Host::Ipv4(Ipv4Addr::LOCALHOST)));
        assert!(is_loopback_host(Host::Ipv4(Ipv4Addr::new(127, 255, 0, 9))));
        assert!(is_loopback_host(Host::Ipv6(Ipv6Addr::LOCALHOST)));
        assert!(!is_loopback_host(Host::Ipv4(Ipv4Addr::new(128, 0, 0, 1))));
        assert!(!is_loopback_host(Host::Domain("127.0.0.1.nip.io")));
        assert!(!is_loopback_host(Host::Domain("127.evil.com")));
        assert!(!is_loopback_host(Host::Domain("example.com")));
    }
}
