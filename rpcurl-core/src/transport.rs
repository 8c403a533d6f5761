//! # Transport Negotiation
//!
//! Selects exactly one transport security mode for the connection and validates every
//! credential related option against it.
//!
//! The resulting [`TransportConfig`] is an immutable value. [`dial`] turns it into a live
//! [`Transport`].
//!
//! ## Mode selection
//!
//! * TLS is the default.
//! * `plaintext` and `alts` select their mode and are mutually exclusive.
//! * When the target was an `https://` URL, asking for plaintext or ALTS is an error.
//! * When the target was an `http://` URL and neither was asked for, plaintext is used.
mod dial;
mod tls;

pub use dial::{ConnectError, Transport, dial};

use crate::target::ParsedTarget;
use std::path::PathBuf;
use std::time::Duration;

/// Dial timeout used when none is given.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default ALTS handshaker service address.
pub const DEFAULT_ALTS_HANDSHAKER: &str = "metadata.google.internal.:8080";

const PRODUCT_TAG: &str = "rpcurl";

/// The transport related options as given by the user.
#[derive(Debug, Clone, Default)]
pub struct TransportFlags {
    pub plaintext: bool,
    pub alts: bool,
    pub insecure: bool,
    pub cacert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub alts_handshaker_service: Option<String>,
    pub alts_target_service_accounts: Vec<String>,
    pub authority: Option<String>,
    pub servername: Option<String>,
    pub user_agent: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub keepalive_time: Option<Duration>,
    pub max_msg_size: Option<usize>,
    pub key_log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportConfigError {
    #[error("The --plaintext and --alts arguments are mutually exclusive.")]
    PlaintextAndAlts,
    #[error("Target URL scheme 'https' requires TLS but --plaintext or --alts flag is set.")]
    SchemeRequiresTls,
    #[error("The --{0} argument can only be used with TLS.")]
    TlsOnlyOption(&'static str),
    #[error("The --cert and --key arguments must be used together and both be present.")]
    CertKeyPair,
    #[error("The --{0} argument must be used with the --alts argument.")]
    AltsOnlyOption(&'static str),
    #[error("Cannot specify different values for --servername and --authority.")]
    ConflictingServerName,
}

/// TLS credential material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub insecure_skip_verify: bool,
    /// Name used to verify the server certificate, when not derived from the target.
    pub server_name: Option<String>,
    pub key_log_file: Option<PathBuf>,
}

/// ALTS handshake options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltsOptions {
    pub handshaker_service: String,
    pub target_service_accounts: Vec<String>,
}

/// The one active transport security mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    Plaintext,
    Tls(TlsOptions),
    Alts(AltsOptions),
}

impl TransportMode {
    pub fn name(&self) -> &'static str {
        match self {
            TransportMode::Plaintext => "plaintext",
            TransportMode::Tls(_) => "TLS",
            TransportMode::Alts(_) => "ALTS",
        }
    }
}

/// A validated transport configuration, ready to be dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// Value for the `:authority` pseudo-header.
    pub authority: Option<String>,
    pub keepalive: Option<Duration>,
    pub dial_timeout: Duration,
    pub max_recv_msg_size: Option<usize>,
    pub user_agent: String,
    /// Non-fatal advisories produced while negotiating.
    pub warnings: Vec<String>,
}

/// Builds the user agent: the product tag and version, prefixed by the user override.
pub fn user_agent(version: &str, user_override: Option<&str>) -> String {
    let base = format!("{PRODUCT_TAG}/{version}");
    match user_override.filter(|ua| !ua.is_empty()) {
        Some(ua) => format!("{ua} {base}"),
        None => base,
    }
}

/// Validates the flags against the target and selects the transport mode.
pub fn negotiate(
    flags: &TransportFlags,
    target: Option<&ParsedTarget>,
    version: &str,
) -> Result<TransportConfig, TransportConfigError> {
    if flags.plaintext && flags.alts {
        return Err(TransportConfigError::PlaintextAndAlts);
    }

    let mut plaintext = flags.plaintext;

    if let Some(target) = target.filter(|t| t.was_url) {
        if target.use_tls && (flags.plaintext || flags.alts) {
            return Err(TransportConfigError::SchemeRequiresTls);
        }
        // The http scheme decides on its own; https never relaxes an explicit flag.
        if !target.use_tls && !flags.plaintext && !flags.alts {
            plaintext = true;
        }
    }

    let use_tls = !plaintext && !flags.alts;

    if !use_tls {
        if flags.insecure {
            return Err(TransportConfigError::TlsOnlyOption("insecure"));
        }
        if flags.cert.is_some() {
            return Err(TransportConfigError::TlsOnlyOption("cert"));
        }
        if flags.key.is_some() {
            return Err(TransportConfigError::TlsOnlyOption("key"));
        }
        if flags.servername.is_some() {
            return Err(TransportConfigError::TlsOnlyOption("servername"));
        }
    }

    if flags.cert.is_some() != flags.key.is_some() {
        return Err(TransportConfigError::CertKeyPair);
    }

    if !flags.alts {
        if flags.alts_handshaker_service.is_some() {
            return Err(TransportConfigError::AltsOnlyOption(
                "alts-handshaker-service",
            ));
        }
        if !flags.alts_target_service_accounts.is_empty() {
            return Err(TransportConfigError::AltsOnlyOption(
                "alts-target-service-account",
            ));
        }
    }

    let mut warnings = Vec::new();

    let override_name = match (&flags.servername, &flags.authority) {
        (Some(servername), Some(authority)) if servername != authority => {
            return Err(TransportConfigError::ConflictingServerName);
        }
        (Some(servername), Some(_)) => {
            warnings.push(
                "Both --servername and --authority are present; prefer only --authority."
                    .to_string(),
            );
            Some(servername.clone())
        }
        (Some(name), None) | (None, Some(name)) => Some(name.clone()),
        (None, None) => None,
    };

    let mode = if plaintext {
        TransportMode::Plaintext
    } else if flags.alts {
        TransportMode::Alts(AltsOptions {
            handshaker_service: flags
                .alts_handshaker_service
                .clone()
                .unwrap_or_else(|| DEFAULT_ALTS_HANDSHAKER.to_string()),
            target_service_accounts: flags.alts_target_service_accounts.clone(),
        })
    } else {
        // A proxied URL is verified against its own host, not the overridden name.
        let server_name = match target.and_then(ParsedTarget::routing_path) {
            Some(_) => target.map(|t| t.host.clone()),
            None => override_name.clone(),
        };

        TransportMode::Tls(TlsOptions {
            ca_cert: flags.cacert.clone(),
            client_cert: flags.cert.clone(),
            client_key: flags.key.clone(),
            insecure_skip_verify: flags.insecure,
            server_name,
            key_log_file: flags.key_log_file.clone(),
        })
    };

    Ok(TransportConfig {
        mode,
        authority: override_name,
        keepalive: flags.keepalive_time.filter(|d| !d.is_zero()),
        dial_timeout: flags
            .connect_timeout
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_DIAL_TIMEOUT),
        max_recv_msg_size: flags.max_msg_size.filter(|size| *size > 0),
        user_agent: user_agent(version, flags.user_agent.as_deref()),
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::parse_target;

    fn negotiate_with(
        flags: TransportFlags,
        target: &str,
    ) -> Result<TransportConfig, TransportConfigError> {
        negotiate(&flags, Some(&parse_target(target)), "1.0.0")
    }

    #[test]
    fn tls_is_the_default() {
        let config = negotiate_with(TransportFlags::default(), "localhost:443").unwrap();

        assert!(matches!(config.mode, TransportMode::Tls(_)));
        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT);
    }

    #[test]
    fn plaintext_and_alts_are_exclusive() {
        let flags = TransportFlags {
            plaintext: true,
            alts: true,
            ..Default::default()
        };

        assert_eq!(
            negotiate_with(flags, "localhost:50051"),
            Err(TransportConfigError::PlaintextAndAlts)
        );
    }

    #[test]
    fn https_url_rejects_plaintext_and_alts() {
        let plaintext = TransportFlags {
            plaintext: true,
            ..Default::default()
        };
        let alts = TransportFlags {
            alts: true,
            ..Default::default()
        };

        assert_eq!(
            negotiate_with(plaintext, "https://example.com"),
            Err(TransportConfigError::SchemeRequiresTls)
        );
        assert_eq!(
            negotiate_with(alts, "https://example.com"),
            Err(TransportConfigError::SchemeRequiresTls)
        );
    }

    #[test]
    fn http_url_forces_plaintext() {
        let config = negotiate_with(TransportFlags::default(), "http://example.com").unwrap();

        assert_eq!(config.mode, TransportMode::Plaintext);
    }

    #[test]
    fn http_url_keeps_explicit_alts() {
        let flags = TransportFlags {
            alts: true,
            ..Default::default()
        };
        let config = negotiate_with(flags, "http://example.com").unwrap();

        assert!(matches!(config.mode, TransportMode::Alts(_)));
    }

    #[test]
    fn tls_only_options_fail_without_tls() {
        let cases = [
            (
                TransportFlags {
                    plaintext: true,
                    insecure: true,
                    ..Default::default()
                },
                "insecure",
            ),
            (
                TransportFlags {
                    plaintext: true,
                    cert: Some("c.pem".into()),
                    key: Some("k.pem".into()),
                    ..Default::default()
                },
                "cert",
            ),
            (
                TransportFlags {
                    alts: true,
                    key: Some("k.pem".into()),
                    ..Default::default()
                },
                "key",
            ),
            (
                TransportFlags {
                    plaintext: true,
                    servername: Some("example.com".into()),
                    ..Default::default()
                },
                "servername",
            ),
        ];

        for (flags, flag) in cases {
            assert_eq!(
                negotiate_with(flags, "localhost:50051"),
                Err(TransportConfigError::TlsOnlyOption(flag))
            );
        }
    }

    #[test]
    fn insecure_over_http_url_fails() {
        let flags = TransportFlags {
            insecure: true,
            ..Default::default()
        };

        assert_eq!(
            negotiate_with(flags, "http://example.com"),
            Err(TransportConfigError::TlsOnlyOption("insecure"))
        );
    }

    #[test]
    fn cert_and_key_go_together() {
        let flags = TransportFlags {
            cert: Some("c.pem".into()),
            ..Default::default()
        };

        assert_eq!(
            negotiate_with(flags, "localhost:443"),
            Err(TransportConfigError::CertKeyPair)
        );
    }

    #[test]
    fn alts_only_options_need_alts() {
        let handshaker = TransportFlags {
            alts_handshaker_service: Some("localhost:8080".into()),
            ..Default::default()
        };
        let accounts = TransportFlags {
            alts_target_service_accounts: vec!["svc@example.iam.gserviceaccount.com".into()],
            ..Default::default()
        };

        assert_eq!(
            negotiate_with(handshaker, "localhost:443"),
            Err(TransportConfigError::AltsOnlyOption("alts-handshaker-service"))
        );
        assert_eq!(
            negotiate_with(accounts, "localhost:443"),
            Err(TransportConfigError::AltsOnlyOption(
                "alts-target-service-account"
            ))
        );
    }

    #[test]
    fn alts_options_are_carried() {
        let flags = TransportFlags {
            alts: true,
            alts_target_service_accounts: vec!["a@b".into()],
            ..Default::default()
        };
        let config = negotiate_with(flags, "localhost:443").unwrap();

        assert_eq!(
            config.mode,
            TransportMode::Alts(AltsOptions {
                handshaker_service: DEFAULT_ALTS_HANDSHAKER.to_string(),
                target_service_accounts: vec!["a@b".to_string()],
            })
        );
    }

    #[test]
    fn servername_and_authority_must_agree() {
        let different = TransportFlags {
            servername: Some("a.example.com".into()),
            authority: Some("b.example.com".into()),
            ..Default::default()
        };
        assert_eq!(
            negotiate_with(different, "localhost:443"),
            Err(TransportConfigError::ConflictingServerName)
        );

        let same = TransportFlags {
            servername: Some("a.example.com".into()),
            authority: Some("a.example.com".into()),
            ..Default::default()
        };
        let config = negotiate_with(same, "localhost:443").unwrap();
        assert_eq!(config.authority.as_deref(), Some("a.example.com"));
        assert_eq!(config.warnings.len(), 1);
    }

    #[test]
    fn authority_is_allowed_with_plaintext() {
        let flags = TransportFlags {
            plaintext: true,
            authority: Some("svc.internal".into()),
            ..Default::default()
        };
        let config = negotiate_with(flags, "localhost:50051").unwrap();

        assert_eq!(config.authority.as_deref(), Some("svc.internal"));
    }

    #[test]
    fn proxied_url_verifies_against_url_host() {
        let flags = TransportFlags {
            authority: Some("backend.internal".into()),
            ..Default::default()
        };
        let config = negotiate_with(flags, "https://proxy.example.com/backend").unwrap();

        match config.mode {
            TransportMode::Tls(tls) => {
                assert_eq!(tls.server_name.as_deref(), Some("proxy.example.com"))
            }
            other => panic!("Expected TLS, got {other:?}"),
        }
    }

    #[test]
    fn timeouts_and_sizes_are_carried() {
        let flags = TransportFlags {
            plaintext: true,
            connect_timeout: Some(Duration::from_millis(1500)),
            keepalive_time: Some(Duration::from_secs(30)),
            max_msg_size: Some(1024),
            ..Default::default()
        };
        let config = negotiate_with(flags, "localhost:50051").unwrap();

        assert_eq!(config.dial_timeout, Duration::from_millis(1500));
        assert_eq!(config.keepalive, Some(Duration::from_secs(30)));
        assert_eq!(config.max_recv_msg_size, Some(1024));
    }

    #[test]
    fn user_agent_prefixes_the_override() {
        assert_eq!(user_agent("1.2.3", None), "rpcurl/1.2.3");
        assert_eq!(user_agent("1.2.3", Some("ci-bot/7")), "ci-bot/7 rpcurl/1.2.3");
    }
}
