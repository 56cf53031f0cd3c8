//! Helper functions for integration tests
//!
//! Generates a throwaway PKI per test: a CA, a server certificate for
//! `localhost` / `127.0.0.1` and client certificates naming an agent host.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use process_dashboard::tls::TlsPaths;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use tempfile::TempDir;

pub struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
}

impl CertificateAuthority {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    /// Issue a leaf certificate, returning `(cert_pem, key_pem)`
    pub fn issue(&self, names: &[&str], purpose: ExtendedKeyUsagePurpose) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, names.first().copied().unwrap_or("leaf"));
        params.extended_key_usages = vec![purpose];
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert.pem(), key.serialize_pem())
    }
}

/// PEM files for one collector and its agents, living in a temp dir
pub struct TestPki {
    pub dir: TempDir,
    pub ca: CertificateAuthority,
    pub server: TlsPaths,
}

impl TestPki {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new("procdash test CA");

        let (cert, key) = ca.issue(
            &["localhost", "127.0.0.1"],
            ExtendedKeyUsagePurpose::ServerAuth,
        );

        let server = TlsPaths {
            cert: write(&dir, "server.pem", &cert),
            key: write(&dir, "server-key.pem", &key),
            ca_bundle: write(&dir, "ca.pem", &ca.pem()),
        };

        Self { dir, ca, server }
    }

    /// Client certificate for `host`, returning `(cert_path, key_path)`
    pub fn client(&self, host: &str) -> (PathBuf, PathBuf) {
        let (cert, key) = self.ca.issue(&[host], ExtendedKeyUsagePurpose::ClientAuth);
        (
            write(&self.dir, &format!("{host}.pem"), &cert),
            write(&self.dir, &format!("{host}-key.pem"), &key),
        )
    }

    /// HTTPS client trusting the test CA, optionally presenting a certificate for `host`
    pub fn https_client(&self, host: Option<&str>) -> reqwest::Client {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(reqwest::Certificate::from_pem(self.ca.pem().as_bytes()).unwrap());

        if let Some(host) = host {
            let (cert, key) = self.ca.issue(&[host], ExtendedKeyUsagePurpose::ClientAuth);
            let identity = reqwest::Identity::from_pem(format!("{cert}\n{key}").as_bytes()).unwrap();
            builder = builder.identity(identity);
        }

        builder.build().unwrap()
    }

    /// HTTPS client presenting a certificate from an unrelated CA
    pub fn untrusted_client(&self, host: &str) -> reqwest::Client {
        let rogue = CertificateAuthority::new("rogue CA");
        let (cert, key) = rogue.issue(&[host], ExtendedKeyUsagePurpose::ClientAuth);

        reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(reqwest::Certificate::from_pem(self.ca.pem().as_bytes()).unwrap())
            .identity(reqwest::Identity::from_pem(format!("{cert}\n{key}").as_bytes()).unwrap())
            .build()
            .unwrap()
    }
}

pub fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Loopback address with an OS-assigned port
pub fn any_port() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

pub fn envelope(host: &str) -> serde_json::Value {
    serde_json::json!({
        "timestamp": "2024-05-01T12:00:00Z",
        "host": host,
        "metrics": {
            "cpus": {"average_usage": 12.5},
            "memory": {"total": 8192, "used": 1024}
        }
    })
}
