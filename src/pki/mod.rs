//! PKI operations for the cluster certificate authority
//!
//! This module issues the self-signed root CA and every leaf certificate
//! the cluster needs, persisting them as PEM files in the work directory.
//! Keys are ECDSA P-256. Certificate files are world-readable (0644);
//! private keys are owner-only (0600).
//!
//! Issuance is not idempotent within a run: generating the same name twice
//! overwrites the previous pair. The orchestrator issues each name once.

use std::fs;
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

#[cfg(test)]
use mockall::automock;
use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
    PKCS_ECDSA_P256_SHA256,
};
use serde_json::json;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::config::CertificateProfile;

/// CA certificate file name under the work directory
pub const CA_CERT_FILE: &str = "ca.pem";
/// CA private key file name under the work directory
pub const CA_KEY_FILE: &str = "ca-key.pem";
/// Signing-profile declaration file name under the work directory
pub const CA_CONFIG_FILE: &str = "ca-config.json";

/// Leaf validity under the `kubernetes` signing profile
const LEAF_EXPIRY_HOURS: i64 = 8760;

/// PKI errors; all of them are fatal to the run
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key pair generation failed
    #[error("key generation failed: {0}")]
    KeyGen(String),

    /// Signing a certificate failed
    #[error("signing failed: {0}")]
    Sign(String),

    /// PEM or JSON encoding failed
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Reading or writing a PKI file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Certificate issuance contract
///
/// All operations take the work directory and the certificate profile; see
/// the module docs for file naming and modes.
#[cfg_attr(test, automock)]
pub trait CertificateIssuer: Send + Sync {
    /// Emit the self-signed root CA plus the signing-profile declaration
    fn generate_ca(&self, dir: &Path, profile: &CertificateProfile) -> Result<(), PkiError>;

    /// Issue a client leaf certificate with `CN = name` and no SANs
    fn generate_client_cert(
        &self,
        dir: &Path,
        name: &str,
        profile: &CertificateProfile,
    ) -> Result<(), PkiError>;

    /// Issue a server leaf certificate with `CN = name` and the given SANs
    ///
    /// Each entry of `hosts` is treated as an IP SAN when it parses as an
    /// IP literal and as a DNS SAN otherwise.
    fn generate_server_cert(
        &self,
        dir: &Path,
        name: &str,
        hosts: &[String],
        profile: &CertificateProfile,
    ) -> Result<(), PkiError>;
}

/// [`CertificateIssuer`] implementation backed by `rcgen`
#[derive(Debug, Default)]
pub struct RcgenIssuer;

impl RcgenIssuer {
    /// Create a new issuer
    pub fn new() -> Self {
        Self
    }

    fn issue_leaf(
        &self,
        dir: &Path,
        name: &str,
        hosts: &[String],
        profile: &CertificateProfile,
    ) -> Result<(), PkiError> {
        let ca_pem = fs::read_to_string(dir.join(CA_CERT_FILE))?;
        let ca_key_pem = fs::read_to_string(dir.join(CA_KEY_FILE))?;
        let ca_key = KeyPair::from_pem(&ca_key_pem)
            .map_err(|e| PkiError::Sign(format!("failed to load CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&ca_pem, &ca_key)
            .map_err(|e| PkiError::Sign(format!("failed to load CA certificate: {e}")))?;

        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| PkiError::KeyGen(format!("failed to generate key for {name}: {e}")))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject_dn(name, profile);
        params.is_ca = IsCa::NoCa;
        // The `kubernetes` signing profile applies the same usages to every
        // leaf: digital signature + key encipherment, server and client auth.
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::hours(LEAF_EXPIRY_HOURS);
        params.subject_alt_names = parse_sans(hosts)?;

        let cert = params
            .signed_by(&key, &issuer)
            .map_err(|e| PkiError::Sign(format!("failed to sign certificate for {name}: {e}")))?;

        write_file(&dir.join(format!("{name}.pem")), cert.pem().as_bytes(), 0o644)?;
        write_file(
            &dir.join(format!("{name}-key.pem")),
            key.serialize_pem().as_bytes(),
            0o600,
        )?;
        info!(name, "issued certificate");
        Ok(())
    }
}

impl CertificateIssuer for RcgenIssuer {
    fn generate_ca(&self, dir: &Path, profile: &CertificateProfile) -> Result<(), PkiError> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| PkiError::KeyGen(format!("failed to generate CA key: {e}")))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject_dn(&profile.organization, profile);
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(1));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::hours(i64::from(profile.validity_days) * 24);

        let cert = params
            .self_signed(&key)
            .map_err(|e| PkiError::Sign(format!("failed to self-sign CA: {e}")))?;

        write_file(&dir.join(CA_CERT_FILE), cert.pem().as_bytes(), 0o644)?;
        write_file(&dir.join(CA_KEY_FILE), key.serialize_pem().as_bytes(), 0o600)?;
        write_file(&dir.join(CA_CONFIG_FILE), signing_profile()?.as_bytes(), 0o644)?;
        info!(cn = %profile.organization, "generated cluster CA");
        Ok(())
    }

    fn generate_client_cert(
        &self,
        dir: &Path,
        name: &str,
        profile: &CertificateProfile,
    ) -> Result<(), PkiError> {
        self.issue_leaf(dir, name, &[], profile)
    }

    fn generate_server_cert(
        &self,
        dir: &Path,
        name: &str,
        hosts: &[String],
        profile: &CertificateProfile,
    ) -> Result<(), PkiError> {
        self.issue_leaf(dir, name, hosts, profile)
    }
}

/// The signing-profile declaration written next to the CA
///
/// Mirrors a CFSSL config with a single `kubernetes` profile so operators
/// can re-sign certificates out of band with the same policy.
fn signing_profile() -> Result<String, PkiError> {
    let config = json!({
        "signing": {
            "default": { "expiry": "8760h" },
            "profiles": {
                "kubernetes": {
                    "usages": ["signing", "key encipherment", "server auth", "client auth"],
                    "expiry": "8760h"
                }
            }
        }
    });
    serde_json::to_string_pretty(&config)
        .map_err(|e| PkiError::Encode(format!("failed to encode CA config: {e}")))
}

fn subject_dn(common_name: &str, profile: &CertificateProfile) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::CountryName,
        DnValue::Utf8String(profile.country.clone()),
    );
    dn.push(
        DnType::StateOrProvinceName,
        DnValue::Utf8String(profile.state.clone()),
    );
    dn.push(
        DnType::LocalityName,
        DnValue::Utf8String(profile.city.clone()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(profile.organization.clone()),
    );
    dn.push(
        DnType::OrganizationalUnitName,
        DnValue::Utf8String(profile.organizational_unit.clone()),
    );
    dn
}

/// Classify SAN entries: IP literals become IP SANs, the rest DNS SANs
fn parse_sans(hosts: &[String]) -> Result<Vec<SanType>, PkiError> {
    hosts
        .iter()
        .map(|host| match host.parse::<IpAddr>() {
            Ok(ip) => Ok(SanType::IpAddress(ip)),
            Err(_) => Ia5String::try_from(host.as_str())
                .map(SanType::DnsName)
                .map_err(|e| PkiError::Encode(format!("invalid SAN {host}: {e}"))),
        })
        .collect()
}

fn write_file(path: &Path, bytes: &[u8], mode: u32) -> Result<(), PkiError> {
    fs::write(path, bytes)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn profile() -> CertificateProfile {
        CertificateProfile {
            country: "US".into(),
            state: "California".into(),
            city: "San Francisco".into(),
            organization: "ExampleOrg".into(),
            organizational_unit: "IT".into(),
            validity_days: 365,
        }
    }

    fn cert_der(dir: &Path, file: &str) -> Vec<u8> {
        let pem_text = fs::read_to_string(dir.join(file)).unwrap();
        ::pem::parse(pem_text).unwrap().contents().to_vec()
    }

    fn mode_of(dir: &Path, file: &str) -> u32 {
        fs::metadata(dir.join(file)).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn ca_files_written_with_mandated_modes() {
        let dir = tempfile::tempdir().unwrap();
        RcgenIssuer::new().generate_ca(dir.path(), &profile()).unwrap();

        assert_eq!(mode_of(dir.path(), CA_CERT_FILE), 0o644);
        assert_eq!(mode_of(dir.path(), CA_KEY_FILE), 0o600);
        assert_eq!(mode_of(dir.path(), CA_CONFIG_FILE), 0o644);
    }

    #[test]
    fn ca_subject_is_the_organization_and_is_a_ca() {
        let dir = tempfile::tempdir().unwrap();
        RcgenIssuer::new().generate_ca(dir.path(), &profile()).unwrap();

        let der = cert_der(dir.path(), CA_CERT_FILE);
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap();
        assert_eq!(cn, "ExampleOrg");
        assert!(cert.is_ca());
    }

    #[test]
    fn ca_config_declares_kubernetes_profile() {
        let dir = tempfile::tempdir().unwrap();
        RcgenIssuer::new().generate_ca(dir.path(), &profile()).unwrap();

        let raw = fs::read_to_string(dir.path().join(CA_CONFIG_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let kubernetes = &parsed["signing"]["profiles"]["kubernetes"];
        assert_eq!(kubernetes["expiry"], "8760h");
        let usages: Vec<&str> = kubernetes["usages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u.as_str().unwrap())
            .collect();
        assert_eq!(
            usages,
            ["signing", "key encipherment", "server auth", "client auth"]
        );
    }

    #[test]
    fn client_cert_has_cn_and_verifies_against_ca() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = RcgenIssuer::new();
        issuer.generate_ca(dir.path(), &profile()).unwrap();
        issuer
            .generate_client_cert(dir.path(), "admin", &profile())
            .unwrap();

        assert_eq!(mode_of(dir.path(), "admin.pem"), 0o644);
        assert_eq!(mode_of(dir.path(), "admin-key.pem"), 0o600);

        let der = cert_der(dir.path(), "admin.pem");
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap();
        assert_eq!(cn, "admin");

        // No SANs on client certificates
        assert!(cert.subject_alternative_name().unwrap().is_none());

        let ca_der = cert_der(dir.path(), CA_CERT_FILE);
        let (_, ca) = X509Certificate::from_der(&ca_der).unwrap();
        cert.verify_signature(Some(ca.public_key())).unwrap();
    }

    #[test]
    fn server_cert_carries_ip_and_dns_sans_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = RcgenIssuer::new();
        issuer.generate_ca(dir.path(), &profile()).unwrap();
        let hosts = vec![
            "127.0.0.1".to_string(),
            "10.32.0.1".to_string(),
            "10.240.0.10".to_string(),
            "kubernetes".to_string(),
            "kubernetes.default.svc.cluster.local".to_string(),
        ];
        issuer
            .generate_server_cert(dir.path(), "kubernetes", &hosts, &profile())
            .unwrap();

        let der = cert_der(dir.path(), "kubernetes.pem");
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let san = cert
            .subject_alternative_name()
            .unwrap()
            .expect("server cert must carry SANs");

        let mut dns = Vec::new();
        let mut ips = Vec::new();
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(d) => dns.push(d.to_string()),
                GeneralName::IPAddress(bytes) => {
                    let octets: [u8; 4] = (*bytes).try_into().unwrap();
                    ips.push(std::net::Ipv4Addr::from(octets).to_string());
                }
                other => panic!("unexpected SAN {other:?}"),
            }
        }
        assert_eq!(dns, ["kubernetes", "kubernetes.default.svc.cluster.local"]);
        assert_eq!(ips, ["127.0.0.1", "10.32.0.1", "10.240.0.10"]);
    }

    #[test]
    fn leaf_cannot_be_issued_without_a_ca() {
        let dir = tempfile::tempdir().unwrap();
        let err = RcgenIssuer::new()
            .generate_client_cert(dir.path(), "admin", &profile())
            .unwrap_err();
        assert!(matches!(err, PkiError::Io(_)));
    }

    #[test]
    fn reissuing_a_name_overwrites_the_pair() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = RcgenIssuer::new();
        issuer.generate_ca(dir.path(), &profile()).unwrap();

        issuer
            .generate_client_cert(dir.path(), "kube-proxy", &profile())
            .unwrap();
        let first = fs::read(dir.path().join("kube-proxy.pem")).unwrap();
        issuer
            .generate_client_cert(dir.path(), "kube-proxy", &profile())
            .unwrap();
        let second = fs::read(dir.path().join("kube-proxy.pem")).unwrap();
        assert_ne!(first, second, "re-issuance replaces the certificate");
    }

    #[test]
    fn invalid_san_is_an_encoding_error() {
        let err = parse_sans(&["bad host name".to_string()]).unwrap_err();
        assert!(matches!(err, PkiError::Encode(_)));
    }

    // ==========================================================================
    // Story Tests: Cluster PKI Lifecycle
    // ==========================================================================
    //
    // The PKI phase issues every credential the cluster trusts. Key
    // properties:
    // - All leaves chain to the single cluster CA
    // - Client and server certificates differ only in their SANs
    // - Certificates from a foreign CA are rejected

    /// Story: Complete issuance flow for a new cluster
    ///
    /// This walks the exact sequence the orchestrator runs during the PKI
    /// phase, from CA creation to a verified API server certificate.
    #[test]
    fn story_complete_issuance_lifecycle() {
        // Chapter 1: The run starts with a fresh CA in the work directory
        // ---------------------------------------------------------------
        let dir = tempfile::tempdir().unwrap();
        let issuer = RcgenIssuer::new();
        issuer.generate_ca(dir.path(), &profile()).unwrap();

        let ca_der = cert_der(dir.path(), CA_CERT_FILE);
        let (_, ca) = X509Certificate::from_der(&ca_der).unwrap();
        assert!(ca.is_ca());

        // Chapter 2: Client credentials are issued for each principal
        // ------------------------------------------------------------
        for name in ["admin", "kube-controller-manager", "worker-0"] {
            issuer.generate_client_cert(dir.path(), name, &profile()).unwrap();

            let der = cert_der(dir.path(), &format!("{name}.pem"));
            let (_, cert) = X509Certificate::from_der(&der).unwrap();
            cert.verify_signature(Some(ca.public_key())).unwrap();
        }

        // Chapter 3: The API server gets the one server certificate
        // -----------------------------------------------------------
        let hosts = vec!["127.0.0.1".to_string(), "kubernetes".to_string()];
        issuer
            .generate_server_cert(dir.path(), "kubernetes", &hosts, &profile())
            .unwrap();

        // Chapter 4: The whole bundle chains back to the CA
        // --------------------------------------------------
        let der = cert_der(dir.path(), "kubernetes.pem");
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        cert.verify_signature(Some(ca.public_key())).unwrap();
        assert!(cert.subject_alternative_name().unwrap().is_some());
    }

    /// Story: Certificates from a foreign CA are rejected
    ///
    /// A credential issued by some other cluster's CA must not verify
    /// against this cluster's trust root.
    #[test]
    fn story_foreign_ca_certificates_rejected() {
        let issuer = RcgenIssuer::new();

        // This cluster's CA
        let ours = tempfile::tempdir().unwrap();
        issuer.generate_ca(ours.path(), &profile()).unwrap();

        // Some other cluster's CA issues an admin certificate
        let theirs = tempfile::tempdir().unwrap();
        issuer.generate_ca(theirs.path(), &profile()).unwrap();
        issuer
            .generate_client_cert(theirs.path(), "admin", &profile())
            .unwrap();

        // The foreign admin certificate does not chain to our CA
        let ca_der = cert_der(ours.path(), CA_CERT_FILE);
        let (_, ca) = X509Certificate::from_der(&ca_der).unwrap();
        let der = cert_der(theirs.path(), "admin.pem");
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        assert!(cert.verify_signature(Some(ca.public_key())).is_err());
    }
}
