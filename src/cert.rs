//! Ephemeral server identity
//!
//! Each server process generates a fresh Ed25519 key pair and a self-signed
//! certificate for `localhost` / `127.0.0.1`. The identity lives only in memory.

use std::net::{IpAddr, Ipv4Addr};

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ED25519, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::error::Result;

/// Validity window of the generated certificate.
const VALIDITY_DAYS: i64 = 365;

/// Certificate chain and private key used to terminate TLS.
#[derive(Debug)]
pub struct Identity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Identity {
    /// The key is not `Clone`, rustls configs each need their own copy.
    pub fn clone_key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

/// Generate a throwaway self-signed identity.
pub fn generate_identity() -> Result<Identity> {
    let key_pair = KeyPair::generate_for(&PKCS_ED25519)?;

    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, "localhost");
    params.distinguished_name = name;
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(VALIDITY_DAYS);

    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let cert = params.self_signed(&key_pair)?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    debug!("Generated self-signed certificate for localhost");

    Ok(Identity {
        cert_chain: vec![cert.der().clone()],
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_usable_by_rustls() {
        let identity = generate_identity().unwrap();
        assert_eq!(identity.cert_chain.len(), 1);

        let provider = std::sync::Arc::new(rustls::crypto::ring::default_provider());
        rustls::ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(identity.cert_chain.clone(), identity.clone_key())
            .unwrap();
    }

    #[test]
    fn test_each_identity_is_fresh() {
        let a = generate_identity().unwrap();
        let b = generate_identity().unwrap();
        assert_ne!(a.cert_chain[0], b.cert_chain[0]);
        assert_ne!(a.key.secret_der(), b.key.secret_der());
    }
}
