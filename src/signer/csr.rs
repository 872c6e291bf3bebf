//! Certificate signing request parsing
//!
//! Decodes a PEM CSR, checks its self-signature and collects what it asks
//! for (subject, names, usages). The public key is kept in the form rcgen
//! needs to embed it in the issued certificate.

use rcgen::{PublicKeyData, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::oid_registry::asn1_rs::oid;
use x509_parser::prelude::FromDer;
use x509_parser::x509::{AlgorithmIdentifier, AttributeTypeAndValue, X509Name};

use crate::policy::{ExtKeyUsage, KeyUsage, RequestedProfile, SubjectAltName};
use crate::types::{CaError, Result};

const PEM_LABELS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

/// Distinguished name fields carried into the issued certificate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFields {
    #[serde(default, alias = "CN", skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, alias = "O", skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, alias = "OU", skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,
    #[serde(default, alias = "C", skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, alias = "ST", skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, alias = "L", skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

impl SubjectFields {
    fn from_name(name: &X509Name<'_>) -> Self {
        fn first<'a: 'b, 'b>(
            mut it: impl Iterator<Item = &'b AttributeTypeAndValue<'a>>,
        ) -> Option<String> {
            it.next().and_then(|attr| attr.as_str().ok()).map(str::to_string)
        }

        Self {
            common_name: first(name.iter_common_name()),
            organization: first(name.iter_organization()),
            organizational_unit: first(name.iter_organizational_unit()),
            country: first(name.iter_country()),
            province: first(name.iter_state_or_province()),
            locality: first(name.iter_locality()),
        }
    }

    /// Replace fields that the override sets, keep the rest
    pub fn merge(mut self, overrides: &SubjectFields) -> Self {
        fn pick(field: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value.as_ref().filter(|v| !v.is_empty()) {
                *field = Some(v.clone());
            }
        }
        pick(&mut self.common_name, &overrides.common_name);
        pick(&mut self.organization, &overrides.organization);
        pick(&mut self.organizational_unit, &overrides.organizational_unit);
        pick(&mut self.country, &overrides.country);
        pick(&mut self.province, &overrides.province);
        pick(&mut self.locality, &overrides.locality);
        self
    }

    pub fn to_distinguished_name(&self) -> rcgen::DistinguishedName {
        use rcgen::DnType;

        let mut dn = rcgen::DistinguishedName::new();
        let fields = [
            (DnType::CountryName, &self.country),
            (DnType::StateOrProvinceName, &self.province),
            (DnType::LocalityName, &self.locality),
            (DnType::OrganizationName, &self.organization),
            (DnType::OrganizationalUnitName, &self.organizational_unit),
            (DnType::CommonName, &self.common_name),
        ];
        for (ty, value) in fields {
            if let Some(value) = value {
                dn.push(ty, value.as_str());
            }
        }
        dn
    }
}

/// Public key taken from a CSR
#[derive(Debug, Clone)]
pub struct CsrPublicKey {
    /// Contents of the subjectPublicKey bit string
    raw: Vec<u8>,
    algorithm: &'static SignatureAlgorithm,
}

impl PublicKeyData for CsrPublicKey {
    fn der_bytes(&self) -> &[u8] {
        &self.raw
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.algorithm
    }
}

/// A CSR that passed structural and signature checks
#[derive(Debug, Clone)]
pub struct ParsedCsr {
    pub subject: SubjectFields,
    /// Names, usages and CN requested by the CSR itself
    pub profile: RequestedProfile,
    pub public_key: CsrPublicKey,
    pub fingerprint: String,
}

/// Hex SHA-256 of DER bytes
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Fingerprint of a request that may not even decode.
///
/// Uses the CSR DER when the PEM decodes, otherwise the raw request text.
pub fn request_fingerprint(pem: &str) -> String {
    match x509_parser::pem::parse_x509_pem(pem.as_bytes()) {
        Ok((_, decoded)) => fingerprint(&decoded.contents),
        Err(_) => fingerprint(pem.as_bytes()),
    }
}

/// Decode, verify and inspect a PEM certificate request
pub fn parse_csr(pem: &str) -> Result<ParsedCsr> {
    let (_, decoded) = x509_parser::pem::parse_x509_pem(pem.trim().as_bytes())
        .map_err(|e| CaError::InvalidCsr(format!("not a PEM document: {}", e)))?;
    if !PEM_LABELS.contains(&decoded.label.as_str()) {
        return Err(CaError::InvalidCsr(format!(
            "expected a certificate request, found '{}'",
            decoded.label
        )));
    }

    let (_, csr) = X509CertificationRequest::from_der(&decoded.contents)
        .map_err(|e| CaError::InvalidCsr(format!("malformed certificate request: {}", e)))?;
    csr.verify_signature()
        .map_err(|e| CaError::InvalidCsr(format!("signature check failed: {}", e)))?;

    let info = &csr.certification_request_info;
    let subject = SubjectFields::from_name(&info.subject);

    let mut profile = RequestedProfile {
        common_name: subject.common_name.clone(),
        ..Default::default()
    };
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            match extension {
                ParsedExtension::KeyUsage(ku) => {
                    profile.key_usages = KeyUsage::from_extension(ku);
                }
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    let (known, unknown) = ExtKeyUsage::from_extension(eku);
                    profile.ext_key_usages = known;
                    profile.unknown_ext_key_usages = unknown;
                }
                ParsedExtension::SubjectAlternativeName(san) => {
                    for name in &san.general_names {
                        profile.sans.push(san_from_general_name(name)?);
                    }
                }
                ParsedExtension::BasicConstraints(bc) if bc.ca => {
                    return Err(CaError::PolicyViolation(
                        "CA certificates cannot be requested".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }

    let spki = &info.subject_pki;
    let algorithm = detect_algorithm(&spki.algorithm).ok_or_else(|| {
        CaError::InvalidCsr(format!(
            "unsupported public key algorithm {}",
            spki.algorithm.algorithm.to_id_string()
        ))
    })?;

    Ok(ParsedCsr {
        subject,
        profile,
        public_key: CsrPublicKey {
            raw: spki.subject_public_key.data.to_vec(),
            algorithm,
        },
        fingerprint: fingerprint(&decoded.contents),
    })
}

fn san_from_general_name(name: &GeneralName<'_>) -> Result<SubjectAltName> {
    match name {
        GeneralName::DNSName(dns) => Ok(SubjectAltName::Dns(dns.to_string())),
        GeneralName::RFC822Name(email) => Ok(SubjectAltName::Email(email.to_string())),
        GeneralName::URI(uri) => Ok(SubjectAltName::Uri(uri.to_string())),
        GeneralName::IPAddress(bytes) => ip_from_bytes(bytes)
            .map(SubjectAltName::Ip)
            .ok_or_else(|| CaError::InvalidCsr("malformed IP address in subjectAltName".to_string())),
        other => Err(CaError::PolicyViolation(format!(
            "unsupported subjectAltName entry {:?}",
            other
        ))),
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Map a subject public key algorithm onto the rcgen algorithm that describes it
fn detect_algorithm(alg: &AlgorithmIdentifier<'_>) -> Option<&'static SignatureAlgorithm> {
    let rsa_oid = oid!(1.2.840 .113549 .1 .1 .1);
    let ec_oid = oid!(1.2.840 .10045 .2 .1);
    let ed25519_oid = oid!(1.3.101 .112);
    let p256_oid = oid!(1.2.840 .10045 .3 .1 .7);
    let p384_oid = oid!(1.3.132 .0 .34);
    let p521_oid = oid!(1.3.132 .0 .35);

    if alg.algorithm == rsa_oid {
        return Some(&rcgen::PKCS_RSA_SHA256);
    }
    if alg.algorithm == ed25519_oid {
        return Some(&rcgen::PKCS_ED25519);
    }
    if alg.algorithm == ec_oid {
        let curve = alg.parameters.as_ref()?.as_oid().ok()?;
        if curve == p256_oid {
            return Some(&rcgen::PKCS_ECDSA_P256_SHA256);
        }
        if curve == p384_oid {
            return Some(&rcgen::PKCS_ECDSA_P384_SHA384);
        }
        if curve == p521_oid {
            return Some(&rcgen::PKCS_ECDSA_P521_SHA512);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair, SanType};

    fn csr_pem(params: CertificateParams) -> String {
        let key = KeyPair::generate().unwrap();
        params.serialize_request(&key).unwrap().pem().unwrap()
    }

    #[test]
    fn test_parses_subject_and_names() {
        let mut params =
            CertificateParams::new(vec!["svc.example.com".to_string(), "10.1.2.3".to_string()])
                .unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "svc.example.com");
        params
            .distinguished_name
            .push(rcgen::DnType::OrganizationName, "Example");
        let parsed = parse_csr(&csr_pem(params)).unwrap();

        assert_eq!(parsed.subject.common_name.as_deref(), Some("svc.example.com"));
        assert_eq!(parsed.subject.organization.as_deref(), Some("Example"));
        assert_eq!(
            parsed.profile.sans,
            vec![
                SubjectAltName::Dns("svc.example.com".to_string()),
                SubjectAltName::Ip("10.1.2.3".parse().unwrap()),
            ]
        );
        assert_eq!(parsed.fingerprint.len(), 64);
    }

    #[test]
    fn test_email_san_extracted() {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.subject_alt_names = vec![SanType::Rfc822Name("ops@example.com".try_into().unwrap())];
        let parsed = parse_csr(&csr_pem(params)).unwrap();

        assert!(parsed.profile.unknown_ext_key_usages.is_empty());
        assert_eq!(
            parsed.profile.sans,
            vec![SubjectAltName::Email("ops@example.com".to_string())]
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(parse_csr("hello"), Err(CaError::InvalidCsr(_))));
    }

    #[test]
    fn test_rejects_certificate_instead_of_request() {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["a.example.com".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        assert!(matches!(parse_csr(&cert.pem()), Err(CaError::InvalidCsr(_))));
    }

    #[test]
    fn test_rejects_tampered_signature() {
        use base64::Engine;

        let pem = csr_pem(CertificateParams::new(vec!["a.example.com".to_string()]).unwrap());
        let (_, decoded) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).unwrap();
        let mut der = decoded.contents.clone();
        let last = der.len() - 1;
        der[last] ^= 0x01;

        let body = base64::engine::general_purpose::STANDARD.encode(&der);
        let tampered = format!(
            "-----BEGIN CERTIFICATE REQUEST-----\n{}\n-----END CERTIFICATE REQUEST-----\n",
            body
        );
        assert!(matches!(parse_csr(&tampered), Err(CaError::InvalidCsr(_))));
    }

    #[test]
    fn test_subject_merge() {
        let base = SubjectFields {
            common_name: Some("old".into()),
            organization: Some("Org".into()),
            ..Default::default()
        };
        let merged = base.merge(&SubjectFields {
            common_name: Some("new".into()),
            organization: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(merged.common_name.as_deref(), Some("new"));
        assert_eq!(merged.organization.as_deref(), Some("Org"));
    }

    #[test]
    fn test_request_fingerprint_stable() {
        let pem = csr_pem(CertificateParams::new(vec!["a.example.com".to_string()]).unwrap());
        assert_eq!(request_fingerprint(&pem), parse_csr(&pem).unwrap().fingerprint);
        assert_eq!(request_fingerprint("junk"), fingerprint(b"junk"));
    }
}
