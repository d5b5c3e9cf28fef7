//! Cipher connection factory: TLS to the relay server, wrapped in a
//! [`CipherStream`]. Implements the pool's [`Connector`] trait so the
//! pool can pre-dial and replace entries on demand.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use skiff_cipher::{CipherStream, SessionKeys};
use skiff_pool::Connector;

use crate::config::{ClientTlsConfig, TcpConfig};
use crate::error::ClientError;

/// Dials TLS connections to the relay server and wraps them in cipher
/// streams.
pub struct CipherConnector {
    remote_addr: String,
    tls_connector: TlsConnector,
    sni: ServerName<'static>,
    tcp_config: TcpConfig,
    handshake_timeout: Duration,
    keys: SessionKeys,
}

impl CipherConnector {
    pub fn new(
        remote_addr: String,
        tls_connector: TlsConnector,
        sni: ServerName<'static>,
        tcp_config: TcpConfig,
        handshake_timeout: Duration,
        keys: SessionKeys,
    ) -> Self {
        Self {
            remote_addr,
            tls_connector,
            sni,
            tcp_config,
            handshake_timeout,
            keys,
        }
    }

    async fn dial(&self) -> io::Result<CipherStream<TlsStream<TcpStream>>> {
        let addr: SocketAddr = tokio::net::lookup_host(&self.remote_addr)
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for {}", self.remote_addr),
                )
            })?;

        debug!(remote = %addr, "dialing relay server");

        let tcp = TcpStream::connect(addr).await?;
        apply_tcp_options(&tcp, &self.tcp_config)?;

        let tls = tokio::time::timeout(
            self.handshake_timeout,
            self.tls_connector.connect(self.sni.clone(), tcp),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))??;

        Ok(CipherStream::client(tls, &self.keys))
    }
}

impl Connector for CipherConnector {
    type Stream = CipherStream<TlsStream<TcpStream>>;

    fn connect(&self) -> Pin<Box<dyn Future<Output = io::Result<Self::Stream>> + Send + '_>> {
        Box::pin(self.dial())
    }
}

/// Build a TLS client config from the TLS settings.
pub fn build_tls_config(tls: &ClientTlsConfig) -> Result<rustls::ClientConfig, ClientError> {
    if tls.skip_verify {
        return Ok(rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::AcceptAnyServerCert))
            .with_no_client_auth());
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(trust_roots(tls.ca.as_deref())?)
        .with_no_client_auth())
}

/// Root store for server verification: the configured CA file, or the
/// bundled webpki roots when none is given.
fn trust_roots(ca: Option<&str>) -> Result<rustls::RootCertStore, ClientError> {
    let mut roots = rustls::RootCertStore::empty();

    let Some(path) = ca else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    let ca_error = |e: String| ClientError::Config(format!("CA certificate {path}: {e}"));
    let pem = std::fs::read(path).map_err(|e| ca_error(e.to_string()))?;

    let mut added = 0usize;
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| ca_error(e.to_string()))?;
        roots.add(cert).map_err(|e| ca_error(e.to_string()))?;
        added += 1;
    }
    if added == 0 {
        return Err(ca_error("no certificates found".into()));
    }

    Ok(roots)
}

/// SNI name for the relay connection: the configured override, or the
/// host part of the server address.
pub fn resolve_sni(tls: &ClientTlsConfig, server: &str) -> Result<ServerName<'static>, ClientError> {
    let host = match &tls.sni {
        Some(sni) => sni.clone(),
        None => server_host(server).to_string(),
    };

    ServerName::try_from(host)
        .map_err(|e| ClientError::Config(format!("invalid SNI hostname: {e}")))
}

/// Host portion of a `host:port` server address. Brackets around an
/// IPv6 literal are dropped; a bare IPv6 literal passes through whole.
fn server_host(server: &str) -> &str {
    if let Some(bracketed) = server.strip_prefix('[') {
        return match bracketed.split_once(']') {
            Some((host, _)) => host,
            None => bracketed,
        };
    }

    match server.rsplit_once(':') {
        // A colon in the left part means this was an unbracketed IPv6
        // literal, not host:port.
        Some((host, _)) if !host.contains(':') => host,
        _ => server,
    }
}

/// Apply the configured socket options to a freshly dialed connection.
fn apply_tcp_options(stream: &TcpStream, config: &TcpConfig) -> io::Result<()> {
    stream.set_nodelay(config.no_delay)?;

    match config.keepalive_secs {
        0 => Ok(()),
        secs => socket2::SockRef::from(stream).set_tcp_keepalive(
            &socket2::TcpKeepalive::new().with_time(Duration::from_secs(secs)),
        ),
    }
}

mod danger {
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any server certificate, for `skip_verify` deployments.
    ///
    /// This gives up endpoint identity on the TLS layer only; the cipher
    /// stream still authenticates every frame under keys derived from
    /// the shared password, so a wrong endpoint can neither read nor
    /// forge session data.
    #[derive(Debug)]
    pub(super) struct AcceptAnyServerCert;

    impl ServerCertVerifier for AcceptAnyServerCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            match rustls::crypto::CryptoProvider::get_default() {
                Some(provider) => provider
                    .signature_verification_algorithms
                    .supported_schemes(),
                None => Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_sni, server_host};
    use crate::config::ClientTlsConfig;

    #[test]
    fn server_host_strips_port() {
        assert_eq!(server_host("example.com:9999"), "example.com");
        assert_eq!(server_host("10.0.0.1:9999"), "10.0.0.1");
    }

    #[test]
    fn server_host_passes_portless_input_through() {
        assert_eq!(server_host("example.com"), "example.com");
    }

    #[test]
    fn server_host_unwraps_bracketed_ipv6() {
        assert_eq!(server_host("[::1]:9999"), "::1");
        assert_eq!(server_host("[2001:db8::1]:8443"), "2001:db8::1");
        assert_eq!(server_host("[::1]"), "::1");
    }

    #[test]
    fn server_host_keeps_bare_ipv6_whole() {
        assert_eq!(server_host("2001:db8::1"), "2001:db8::1");
    }

    #[test]
    fn resolve_sni_prefers_configured_name() {
        let tls = ClientTlsConfig {
            sni: Some("front.example.org".into()),
            ..Default::default()
        };
        let sni = resolve_sni(&tls, "1.2.3.4:9999").unwrap();
        assert!(format!("{sni:?}").contains("front.example.org"));
    }

    #[test]
    fn resolve_sni_accepts_ipv6_literal() {
        let tls = ClientTlsConfig::default();
        resolve_sni(&tls, "[::1]:9999").unwrap();
    }
}
