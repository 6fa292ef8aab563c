//! Optional TLS 1.2/1.3 wrapping for outbound and inbound links.
//!
//! Certificate provisioning is out of scope for this crate (spec §1); the
//! host binary builds a `rustls::ServerConfig` for inbound links and hands
//! it to `ConnectionManager` via `TlsConfig`. Outbound links, by default,
//! accept any certificate the peer presents -- there is no PKI or pinning
//! story here, matching the documented default in spec §6. This is **not
//! production-safe** and must not be relied on for authentication.

use std::sync::Arc;
use std::time::SystemTime;

use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{Certificate, ClientConfig, Error as TlsError, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;
use crate::error::{NetworkError, NetworkResult};

/// A `ServerCertVerifier` that accepts every certificate unconditionally.
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Build the `TlsConnector` used by `ConnectionManager::connect` when
/// `TlsConfig::enabled` is set. Always insecure per `accept_any_cert`;
/// there is no verifying mode in this crate (spec Non-goals: no formal
/// PKI or certificate-pinning story).
pub fn build_connector(config: &TlsConfig) -> NetworkResult<TlsConnector> {
    if !config.accept_any_cert {
        return Err(NetworkError::Tls(
            "certificate-verifying TLS client mode is not implemented; \
             set accept_any_cert to use TLS"
                .into(),
        ));
    }
    let client_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Build the `TlsAcceptor` used by `ConnectionManager::start` to accept
/// inbound TLS connections. Requires a pre-built server identity.
pub fn build_acceptor(config: &TlsConfig) -> NetworkResult<TlsAcceptor> {
    let server_config = config
        .server_config
        .clone()
        .ok_or_else(|| NetworkError::Tls("TLS enabled but no server_config provided".into()))?;
    Ok(TlsAcceptor::from(server_config))
}
