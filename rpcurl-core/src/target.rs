//! # Target Resolution
//!
//! Users may point `rpcurl` at a server in several ways:
//!
//! * A bare `host:port` (`localhost:50051`, `[::1]:50051`).
//! * An `http://` or `https://` URL, optionally carrying a path that a reverse proxy
//!   uses for routing (`https://api.example.com/grpc`).
//! * A special scheme handled entirely by the transport layer (`unix:///tmp/app.sock`).
//!
//! [`parse_target`] never fails. Anything it cannot make sense of is passed through
//! untouched and left for the dialer to accept or reject.
use url::{Host, Url};

const PASSTHROUGH_PREFIXES: [&str; 2] = ["unix://", "xds:///"];

/// The structured form of the address given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    /// The address used for dialing, `host:port` or an opaque scheme-prefixed string.
    pub address: String,
    /// The scheme found in the original string, if any.
    pub scheme: Option<String>,
    /// Host name or IP literal (without IPv6 brackets).
    pub host: String,
    /// Port, only set when the target was a URL.
    pub port: Option<u16>,
    /// URL path. A bare `/` is normalised to `None`.
    pub path: Option<String>,
    /// Whether the URL scheme asks for TLS (`https`).
    pub use_tls: bool,
    /// Whether the original string was an `http`/`https` URL.
    pub was_url: bool,
}

impl ParsedTarget {
    fn opaque(raw: &str, scheme: Option<String>) -> Self {
        Self {
            address: raw.to_string(),
            scheme,
            host: raw.to_string(),
            port: None,
            path: None,
            use_tls: false,
            was_url: false,
        }
    }

    /// The URL path that must be forwarded to a routing intermediary, if any.
    pub fn routing_path(&self) -> Option<&str> {
        self.path.as_deref().filter(|_| self.was_url)
    }

    /// Returns the dialable Unix socket path for `unix://` targets.
    pub fn unix_socket_path(&self) -> Option<&str> {
        self.address.strip_prefix("unix://")
    }

    /// The host name that identifies the server, used as the default TLS server name.
    pub fn server_host(&self) -> &str {
        if self.was_url {
            return &self.host;
        }

        let host = self
            .address
            .rsplit_once(':')
            .map_or(self.address.as_str(), |(host, _)| host);

        host.trim_start_matches('[').trim_end_matches(']')
    }
}

/// Parses the raw target string typed by the user.
pub fn parse_target(raw: &str) -> ParsedTarget {
    if PASSTHROUGH_PREFIXES
        .iter()
        .any(|prefix| raw.starts_with(prefix))
    {
        return ParsedTarget::opaque(raw, None);
    }

    // Bare IP addresses and bracketed IPv6 literals fail here.
    let Ok(url) = Url::parse(raw) else {
        return ParsedTarget::opaque(raw, None);
    };

    match url.scheme() {
        "http" | "https" => from_http_url(&url),
        "" => ParsedTarget::opaque(raw, None),
        scheme => {
            // `myhost:1234` parses as scheme `myhost` with an opaque path `1234`.
            let looks_like_host_port = url.host().is_none()
                && (url.cannot_be_a_base() || url.path().is_empty())
                && url.query().is_none()
                && url.fragment().is_none();

            if looks_like_host_port {
                ParsedTarget::opaque(raw, None)
            } else {
                ParsedTarget::opaque(raw, Some(scheme.to_string()))
            }
        }
    }
}

fn from_http_url(url: &Url) -> ParsedTarget {
    let use_tls = url.scheme() == "https";
    let port = url
        .port_or_known_default()
        .unwrap_or(if use_tls { 443 } else { 80 });

    let (host, address) = match url.host() {
        Some(Host::Ipv6(ip)) => (ip.to_string(), format!("[{ip}]:{port}")),
        Some(host) => (host.to_string(), format!("{host}:{port}")),
        None => (String::new(), format!(":{port}")),
    };

    let path = Some(url.path())
        .filter(|path| !path.is_empty() && *path != "/")
        .map(str::to_string);

    ParsedTarget {
        address,
        scheme: Some(url.scheme().to_string()),
        host,
        port: Some(port),
        path,
        use_tls,
        was_url: true,
    }
}
