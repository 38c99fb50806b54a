//! TLS client setup for `https` origins reached by the forward proxy

use mesh_sidecar_common::{Result, SidecarError};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Crypto backend used for every TLS session the gateway opens
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client configuration trusting the given roots, speaking HTTP/1.1 only
pub fn client_config(roots: RootCertStore) -> Result<Arc<ClientConfig>> {
    let mut config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| SidecarError::Transport(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Client configuration trusting the system root certificates
pub fn native_client_config() -> Result<Arc<ClientConfig>> {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        debug!("Skipping native certificate source: {}", err);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!("Loaded {} root certificates ({} ignored)", added, ignored);

    if roots.is_empty() {
        warn!("No system root certificates found; https origins will fail verification");
    }

    client_config(roots)
}

/// Server name to verify for a URI host, IPv6 brackets removed
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(bare.to_string())
        .map_err(|_| SidecarError::InvalidRequest(format!("invalid TLS server name: {}", host)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_forms() {
        assert!(matches!(
            server_name("peer.tailnet.ts.net").unwrap(),
            ServerName::DnsName(_)
        ));
        assert!(matches!(
            server_name("100.64.0.10").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name("[fd7a:115c:a1e0::a]").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(server_name("bad host").is_err());
    }

    #[test]
    fn test_client_config_offers_http1() {
        let config = client_config(RootCertStore::empty()).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }
}
