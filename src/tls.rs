//! TLS termination for the collector
//!
//! Builds a rustls server configuration that *requires* a client certificate
//! chaining to the configured CA bundle, and extracts the identities an agent
//! certificate asserts so payloads can be bound to them.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerConfig, WebPkiClientVerifier};
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// Paths to the PEM material the collector needs at startup
#[derive(Debug, Clone)]
pub struct TlsPaths {
    /// Server certificate chain (leaf first)
    pub cert: PathBuf,

    /// Server private key (PKCS#8, PKCS#1 or SEC1)
    pub key: PathBuf,

    /// CA bundle used to verify client certificates
    pub ca_bundle: PathBuf,
}

/// Startup errors while loading TLS material
#[derive(Debug, thiserror::Error)]
pub enum TlsSetupError {
    #[error("failed to read {what} from {}", .path.display())]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("invalid CA certificate in {}", .path.display())]
    InvalidCa {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("failed to build client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(what: &'static str, path: &Path) -> Result<BufReader<File>, TlsSetupError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsSetupError::Read {
            what,
            path: path.to_path_buf(),
            source,
        })
}

/// Load every certificate from a PEM file
pub fn load_certs(
    what: &'static str,
    path: &Path,
) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let mut reader = open(what, path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsSetupError::Read {
            what,
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsSetupError::NoCertificates(path.to_path_buf()));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsSetupError> {
    let mut reader = open("private key", path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsSetupError::Read {
            what: "private key",
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsSetupError::NoPrivateKey(path.to_path_buf()))
}

/// Build the collector's server configuration
///
/// The resulting configuration:
/// - only negotiates TLS 1.2 and TLS 1.3
/// - rejects any client without a certificate chaining to `ca_bundle`
/// - advertises `http/1.1` via ALPN
pub fn load_server_config(paths: &TlsPaths) -> Result<Arc<ServerConfig>, TlsSetupError> {
    let cert_chain = load_certs("server certificate", &paths.cert)?;
    let key = load_private_key(&paths.key)?;

    let mut roots = RootCertStore::empty();
    for ca in load_certs("CA bundle", &paths.ca_bundle)? {
        roots.add(ca).map_err(|source| TlsSetupError::InvalidCa {
            path: paths.ca_bundle.clone(),
            source,
        })?;
    }
    debug!("loaded {} trusted client CA(s)", roots.len());

    let provider = provider();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Names asserted by a verified client certificate
///
/// Collected from the DNS subject alternative names and the subject common
/// name of the leaf certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    names: Vec<String>,
}

impl ClientIdentity {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Extract identities from a DER encoded leaf certificate
    ///
    /// An unparseable certificate yields an empty identity, which matches no
    /// host.
    pub fn from_der(der: &[u8]) -> Self {
        let cert = match X509Certificate::from_der(der) {
            Ok((_, cert)) => cert,
            Err(e) => {
                warn!("failed to parse client certificate: {e}");
                return Self::default();
            }
        };

        let mut names = Vec::new();

        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    names.push(dns.to_string());
                }
            }
        }

        for cn in cert.subject().iter_common_name() {
            if let Ok(cn) = cn.as_str() {
                if !names.iter().any(|name| name.eq_ignore_ascii_case(cn)) {
                    names.push(cn.to_string());
                }
            }
        }

        Self { names }
    }

    /// Identity of the first certificate in a peer chain
    pub fn from_peer_chain(chain: Option<&[CertificateDer<'_>]>) -> Self {
        chain
            .and_then(|certs| certs.first())
            .map(|leaf| Self::from_der(leaf.as_ref()))
            .unwrap_or_default()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether `host` is one of the certificate's names (ASCII case-insensitive)
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim();
        self.names.iter().any(|name| name.eq_ignore_ascii_case(host))
    }
}
