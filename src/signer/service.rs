//! Per-root signer
//!
//! A `Signer` binds one root's key and issuing certificate to its policy and
//! optional audit store. The key family is checked once here so nothing
//! downstream ever branches on key type.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{CertificateParams, IsCa, Issuer, KeyPair, SanType, SerialNumber};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::csr::{parse_csr, request_fingerprint, SubjectFields};
use crate::audit::{AuditRecord, AuditStore};
use crate::policy::{parse_duration, Grant, Policy, SubjectAltName};
use crate::types::{CaError, Result};

/// Serial length in bytes (160 bits)
const SERIAL_LEN: usize = 20;

/// Key families a root may sign with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ecdsa,
}

impl KeyFamily {
    /// Classify a loaded key, rejecting anything that is not RSA or ECDSA
    pub fn of(label: &str, key: &KeyPair) -> Result<Self> {
        let alg = key.algorithm();
        if alg == &rcgen::PKCS_RSA_SHA256
            || alg == &rcgen::PKCS_RSA_SHA384
            || alg == &rcgen::PKCS_RSA_SHA512
        {
            Ok(KeyFamily::Rsa)
        } else if alg == &rcgen::PKCS_ECDSA_P256_SHA256
            || alg == &rcgen::PKCS_ECDSA_P384_SHA384
            || alg == &rcgen::PKCS_ECDSA_P521_SHA512
        {
            Ok(KeyFamily::Ecdsa)
        } else {
            Err(CaError::UnsupportedKeyType {
                label: label.to_string(),
                algorithm: format!("{:?}", alg),
            })
        }
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFamily::Rsa => write!(f, "rsa"),
            KeyFamily::Ecdsa => write!(f, "ecdsa"),
        }
    }
}

/// Caller-supplied adjustments to the issued certificate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    /// Requested validity, humantime ("2160h", "90days")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,

    /// Replacement subject fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectFields>,

    /// Replacement SAN list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
}

/// One signing call, as handed over by the dispatcher
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// PEM certificate request
    pub csr: String,
    pub overrides: ProfileOverrides,
    /// TCP peer of the caller
    pub remote_address: IpAddr,
}

/// A freshly issued certificate
#[derive(Debug, Clone)]
pub struct Issued {
    pub certificate_pem: String,
    /// Hex serial
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Whether the requested validity was shortened by policy
    pub clamped: bool,
}

/// Result of a successful `sign`
#[derive(Debug)]
pub struct Signed {
    pub issued: Issued,
    /// Audit write failure; the certificate stands regardless
    pub persistence_error: Option<CaError>,
}

/// Longest a single audit write may hold up a response
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a signer records what it did
#[derive(Clone)]
pub struct AuditSink {
    pub store: Arc<dyn AuditStore>,
    /// Also record rejected requests
    pub record_denials: bool,
    /// A write still pending after this is reported as a persistence failure
    pub write_timeout: Duration,
}

impl AuditSink {
    pub fn new(store: Arc<dyn AuditStore>, record_denials: bool) -> Self {
        Self {
            store,
            record_denials,
            write_timeout: DEFAULT_AUDIT_TIMEOUT,
        }
    }

    /// Append one record, bounded by `write_timeout`
    async fn write(&self, record: &AuditRecord) -> Result<()> {
        match tokio::time::timeout(self.write_timeout, self.store.record(record)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(CaError::Persistence(reason))) => Err(CaError::Persistence(reason)),
            Ok(Err(other)) => Err(CaError::Persistence(other.to_string())),
            Err(_) => Err(CaError::Persistence(format!(
                "{} did not answer within {:?}",
                self.store.describe(),
                self.write_timeout
            ))),
        }
    }
}

struct SignerInner {
    label: String,
    family: KeyFamily,
    issuer: Issuer<'static, KeyPair>,
    certificate_pem: String,
    policy: Arc<Policy>,
    audit: Option<AuditSink>,
}

/// Cheap-to-clone handle on one root's signing capability
#[derive(Clone)]
pub struct Signer {
    inner: Arc<SignerInner>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("label", &self.inner.label)
            .field("family", &self.inner.family)
            .field("audit", &self.audit_target())
            .finish()
    }
}

impl Signer {
    /// Bind a key and issuing certificate to a policy.
    ///
    /// Fails with `UnsupportedKeyType` unless the key is RSA or ECDSA, and
    /// with `Config` when the key does not belong to the certificate.
    pub fn new(
        label: &str,
        key: KeyPair,
        certificate_pem: &str,
        policy: Arc<Policy>,
        audit: Option<AuditSink>,
    ) -> Result<Self> {
        let family = KeyFamily::of(label, &key)?;
        check_issuing_certificate(label, &key, certificate_pem)?;

        let issuer = Issuer::from_ca_cert_pem(certificate_pem, key).map_err(|e| {
            CaError::Config(format!("root '{}': unusable issuing certificate: {}", label, e))
        })?;

        debug!(label = %label, family = %family, "Signer ready");
        Ok(Self {
            inner: Arc::new(SignerInner {
                label: label.to_string(),
                family,
                issuer,
                certificate_pem: certificate_pem.to_string(),
                policy,
                audit,
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn family(&self) -> KeyFamily {
        self.inner.family
    }

    /// Issuing certificate, PEM
    pub fn certificate_pem(&self) -> &str {
        &self.inner.certificate_pem
    }

    pub fn policy(&self) -> &Arc<Policy> {
        &self.inner.policy
    }

    pub fn audit_target(&self) -> Option<String> {
        self.inner.audit.as_ref().map(|sink| sink.store.describe())
    }

    /// Validate, apply policy, issue, then record.
    ///
    /// CSR verification and certificate signing run on the blocking pool.
    pub async fn sign(&self, request: SigningRequest) -> Result<Signed> {
        let inner = Arc::clone(&self.inner);
        let remote = request.remote_address;
        let csr = request.csr.clone();

        let outcome = tokio::task::spawn_blocking(move || inner.issue(&request))
            .await
            .map_err(|e| CaError::Internal(format!("signing task failed: {}", e)))?;

        let (issued, fingerprint) = match outcome {
            Ok(done) => done,
            Err(e) => {
                if matches!(
                    e,
                    CaError::InvalidCsr(_) | CaError::PolicyViolation(_) | CaError::MalformedRequest(_)
                ) {
                    self.record_denial(remote, &csr, &e).await;
                }
                return Err(e);
            }
        };

        info!(
            label = %self.inner.label,
            serial = %issued.serial,
            requester = %remote,
            not_after = %issued.not_after,
            clamped = issued.clamped,
            "Certificate issued"
        );

        let persistence_error = match self.inner.audit {
            Some(ref sink) => {
                let record = AuditRecord::issued(&self.inner.label, issued.serial.clone(), remote, fingerprint)
                    .with_validity(issued.not_before, issued.not_after);
                match sink.write(&record).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(
                            label = %self.inner.label,
                            serial = %issued.serial,
                            error = %e,
                            "Failed to persist audit record"
                        );
                        Some(e)
                    }
                }
            }
            None => None,
        };

        Ok(Signed {
            issued,
            persistence_error,
        })
    }

    /// Record a rejected request when the root audits denials
    pub async fn record_denial(&self, remote: IpAddr, csr: &str, reason: &CaError) {
        let Some(ref sink) = self.inner.audit else {
            return;
        };
        if !sink.record_denials {
            return;
        }
        let record = AuditRecord::denied(&self.inner.label, remote, request_fingerprint(csr), reason.kind());
        if let Err(e) = sink.write(&record).await {
            warn!(label = %self.inner.label, error = %e, "Failed to persist denial record");
        }
    }
}

impl SignerInner {
    fn issue(&self, request: &SigningRequest) -> Result<(Issued, String)> {
        let csr = parse_csr(&request.csr)?;
        let overrides = &request.overrides;

        let subject = match overrides.subject {
            Some(ref fields) => csr.subject.clone().merge(fields),
            None => csr.subject.clone(),
        };

        let mut profile = csr.profile.clone();
        profile.common_name = subject.common_name.clone();
        if let Some(ref hosts) = overrides.hosts {
            profile.sans = hosts
                .iter()
                .map(|h| h.trim())
                .filter(|h| !h.is_empty())
                .map(SubjectAltName::from_host)
                .collect();
        }
        if let Some(ref expiry) = overrides.expiry {
            let validity = parse_duration("expiry", expiry)
                .map_err(|e| CaError::MalformedRequest(e.to_string()))?;
            if validity.is_zero() {
                return Err(CaError::MalformedRequest("expiry must be positive".to_string()));
            }
            profile.validity = Some(validity);
        }

        let grant = self.policy.evaluate(&profile)?;
        let (params, not_before, not_after, serial) = build_params(&subject, &grant)?;

        let certificate = params
            .signed_by(&csr.public_key, &self.issuer)
            .map_err(|e| CaError::SigningFailure(format!("root '{}': {}", self.label, e)))?;

        Ok((
            Issued {
                certificate_pem: certificate.pem(),
                serial,
                not_before,
                not_after,
                clamped: grant.clamped,
            },
            csr.fingerprint,
        ))
    }
}

fn build_params(
    subject: &SubjectFields,
    grant: &Grant,
) -> Result<(CertificateParams, DateTime<Utc>, DateTime<Utc>, String)> {
    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| CaError::SigningFailure(format!("certificate parameters: {}", e)))?;

    params.distinguished_name = subject.to_distinguished_name();
    params.subject_alt_names = grant.sans.iter().map(san_type).collect::<Result<_>>()?;
    params.is_ca = IsCa::NoCa;
    params.key_usages = grant.key_usages.iter().map(|&u| u.into()).collect();
    params.extended_key_usages = grant.ext_key_usages.iter().map(|&u| u.into()).collect();
    params.use_authority_key_identifier_extension = true;

    let mut serial = [0u8; SERIAL_LEN];
    OsRng.fill_bytes(&mut serial);
    // Positive, full length
    serial[0] = (serial[0] & 0x7f) | 0x40;
    params.serial_number = Some(SerialNumber::from_slice(&serial));

    let now = Utc::now().timestamp();
    let not_before = now - seconds(grant.backdate)?;
    let not_after = not_before + seconds(grant.validity)?;
    params.not_before = offset_time(not_before)?;
    params.not_after = offset_time(not_after)?;

    Ok((
        params,
        utc_time(not_before)?,
        utc_time(not_after)?,
        hex::encode(serial),
    ))
}

fn san_type(san: &SubjectAltName) -> Result<SanType> {
    let ia5 = |value: &str| {
        rcgen::string::Ia5String::try_from(value.to_string()).map_err(|e| {
            CaError::PolicyViolation(format!("'{}' is not a valid name: {}", value, e))
        })
    };
    Ok(match san {
        SubjectAltName::Dns(name) => SanType::DnsName(ia5(name)?),
        SubjectAltName::Ip(addr) => SanType::IpAddress(*addr),
        SubjectAltName::Email(addr) => SanType::Rfc822Name(ia5(addr)?),
        SubjectAltName::Uri(uri) => SanType::URI(ia5(uri)?),
    })
}

fn seconds(d: Duration) -> Result<i64> {
    i64::try_from(d.as_secs())
        .map_err(|_| CaError::SigningFailure(format!("duration out of range: {:?}", d)))
}

fn offset_time(unix: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(unix)
        .map_err(|e| CaError::SigningFailure(format!("validity out of range: {}", e)))
}

fn utc_time(unix: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(unix, 0)
        .ok_or_else(|| CaError::SigningFailure(format!("validity out of range: {}", unix)))
}

/// The issuing certificate must be a CA certificate for exactly this key
fn check_issuing_certificate(label: &str, key: &KeyPair, certificate_pem: &str) -> Result<()> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(certificate_pem.as_bytes())
        .map_err(|e| CaError::Config(format!("root '{}': certificate is not PEM: {}", label, e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| CaError::Config(format!("root '{}': malformed certificate: {}", label, e)))?;

    if cert.public_key().subject_public_key.data.as_ref() != key.public_key_raw() {
        return Err(CaError::Config(format!(
            "root '{}': private key does not match the issuing certificate",
            label
        )));
    }

    let is_ca = matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca);
    if !is_ca {
        return Err(CaError::Config(format!(
            "root '{}': issuing certificate is not a CA certificate",
            label
        )));
    }

    if !cert.validity().is_valid() {
        warn!(label = %label, not_after = %cert.validity().not_after, "Issuing certificate is outside its validity period");
    }
    Ok(())
}
