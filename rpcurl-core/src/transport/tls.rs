//! Builds the rustls client configuration for the TLS transport mode.
use super::TlsOptions;
use super::dial::ConnectError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::{ClientConfig, DigitallySignedStruct, KeyLog, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const ALPN_H2: &[u8] = b"h2";

pub(super) fn client_config(options: &TlsOptions) -> Result<ClientConfig, ConnectError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = if options.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(
                provider.signature_verification_algorithms,
            )))
    } else {
        builder.with_root_certificates(root_store(options.ca_cert.as_deref())?)
    };

    let mut config = match (&options.client_cert, &options.client_key) {
        (Some(cert), Some(key)) => {
            builder.with_client_auth_cert(read_certificates(cert)?, read_private_key(key)?)?
        }
        _ => builder.with_no_client_auth(),
    };

    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    if let Some(path) = &options.key_log_file {
        config.key_log = Arc::new(KeyLogWriter::open(path)?);
    }

    Ok(config)
}

pub(super) fn server_name(name: &str) -> Result<ServerName<'static>, ConnectError> {
    ServerName::try_from(name.to_string())
        .map_err(|_| ConnectError::InvalidServerName(name.to_string()))
}

fn root_store(ca_cert: Option<&Path>) -> Result<RootCertStore, ConnectError> {
    let mut roots = RootCertStore::empty();

    match ca_cert {
        Some(path) => {
            let (added, _) = roots.add_parsable_certificates(read_certificates(path)?);
            tracing::debug!(added, path = %path.display(), "loaded CA bundle");
        }
        None => {
            let native = rustls_native_certs::load_native_certs();
            for error in &native.errors {
                tracing::debug!(%error, "skipping unreadable native certificate");
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            tracing::debug!(added, ignored, "loaded native root certificates");
        }
    }

    Ok(roots)
}

fn open_pem(path: &Path) -> Result<BufReader<File>, ConnectError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ConnectError::ReadPem {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnectError> {
    let certs = rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConnectError::ReadPem {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(ConnectError::EmptyCertificates(path.to_path_buf()));
    }

    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConnectError> {
    rustls_pemfile::private_key(&mut open_pem(path)?)
        .map_err(|source| ConnectError::ReadPem {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ConnectError::MissingPrivateKey(path.to_path_buf()))
}

/// Appends session secrets in the NSS key log format.
#[derive(Debug)]
struct KeyLogWriter(Mutex<File>);

impl KeyLogWriter {
    fn open(path: &Path) -> Result<Self, ConnectError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(|file| Self(Mutex::new(file)))
            .map_err(|source| ConnectError::KeyLogFile {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl KeyLog for KeyLogWriter {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        if let Ok(mut file) = self.0.lock()
            && let Err(error) = writeln!(
                file,
                "{label} {} {}",
                hex::encode(client_random),
                hex::encode(secret)
            )
        {
            tracing::warn!(%error, "failed to write TLS key log entry");
        }
    }
}

/// Accepts any server certificate. Signatures are still checked.
#[derive(Debug)]
struct SkipServerVerification(WebPkiSupportedAlgorithms);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ca_bundle_is_a_read_error() {
        let options = TlsOptions {
            ca_cert: Some("/definitely/not/here.pem".into()),
            ..Default::default()
        };

        assert!(matches!(
            client_config(&options),
            Err(ConnectError::ReadPem { .. })
        ));
    }

    #[test]
    fn empty_ca_bundle_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let options = TlsOptions {
            ca_cert: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        assert!(matches!(
            client_config(&options),
            Err(ConnectError::EmptyCertificates(_))
        ));
    }

    #[test]
    fn insecure_config_negotiates_h2() {
        let options = TlsOptions {
            insecure_skip_verify: true,
            ..Default::default()
        };
        let config = client_config(&options).unwrap();

        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn key_log_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.log");
        let options = TlsOptions {
            insecure_skip_verify: true,
            key_log_file: Some(path.clone()),
            ..Default::default()
        };

        client_config(&options).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unopenable_key_log_file_is_fatal() {
        let options = TlsOptions {
            insecure_skip_verify: true,
            key_log_file: Some("/definitely/not/here/keys.log".into()),
            ..Default::default()
        };

        assert!(matches!(
            client_config(&options),
            Err(ConnectError::KeyLogFile { .. })
        ));
    }

    #[test]
    fn server_names_accept_hosts_and_ips() {
        assert!(server_name("example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
