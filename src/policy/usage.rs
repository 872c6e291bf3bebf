//! Key usage and extended key usage vocabulary
//!
//! Names are the lowercase, space-separated forms used in signing profiles
//! ("digital signature", "server auth").

use serde::{Deserialize, Serialize};
use std::fmt;

/// X.509 key usage bits a policy may grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    #[serde(rename = "digital signature", alias = "signing")]
    DigitalSignature,
    #[serde(rename = "content commitment")]
    ContentCommitment,
    #[serde(rename = "key encipherment")]
    KeyEncipherment,
    #[serde(rename = "data encipherment")]
    DataEncipherment,
    #[serde(rename = "key agreement")]
    KeyAgreement,
    #[serde(rename = "cert sign")]
    CertSign,
    #[serde(rename = "crl sign")]
    CrlSign,
    #[serde(rename = "encipher only")]
    EncipherOnly,
    #[serde(rename = "decipher only")]
    DecipherOnly,
}

impl KeyUsage {
    /// Usage string as written in policy files
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::DigitalSignature => "digital signature",
            KeyUsage::ContentCommitment => "content commitment",
            KeyUsage::KeyEncipherment => "key encipherment",
            KeyUsage::DataEncipherment => "data encipherment",
            KeyUsage::KeyAgreement => "key agreement",
            KeyUsage::CertSign => "cert sign",
            KeyUsage::CrlSign => "crl sign",
            KeyUsage::EncipherOnly => "encipher only",
            KeyUsage::DecipherOnly => "decipher only",
        }
    }

    /// Whether this usage is reserved for CA certificates
    pub fn is_ca_only(&self) -> bool {
        matches!(self, KeyUsage::CertSign | KeyUsage::CrlSign)
    }

    /// Collect the bits set in a parsed key usage extension
    pub fn from_extension(ku: &x509_parser::extensions::KeyUsage) -> Vec<KeyUsage> {
        let mut out = Vec::new();
        if ku.digital_signature() {
            out.push(KeyUsage::DigitalSignature);
        }
        if ku.non_repudiation() {
            out.push(KeyUsage::ContentCommitment);
        }
        if ku.key_encipherment() {
            out.push(KeyUsage::KeyEncipherment);
        }
        if ku.data_encipherment() {
            out.push(KeyUsage::DataEncipherment);
        }
        if ku.key_agreement() {
            out.push(KeyUsage::KeyAgreement);
        }
        if ku.key_cert_sign() {
            out.push(KeyUsage::CertSign);
        }
        if ku.crl_sign() {
            out.push(KeyUsage::CrlSign);
        }
        if ku.encipher_only() {
            out.push(KeyUsage::EncipherOnly);
        }
        if ku.decipher_only() {
            out.push(KeyUsage::DecipherOnly);
        }
        out
    }
}

impl From<KeyUsage> for rcgen::KeyUsagePurpose {
    fn from(usage: KeyUsage) -> Self {
        match usage {
            KeyUsage::DigitalSignature => rcgen::KeyUsagePurpose::DigitalSignature,
            KeyUsage::ContentCommitment => rcgen::KeyUsagePurpose::ContentCommitment,
            KeyUsage::KeyEncipherment => rcgen::KeyUsagePurpose::KeyEncipherment,
            KeyUsage::DataEncipherment => rcgen::KeyUsagePurpose::DataEncipherment,
            KeyUsage::KeyAgreement => rcgen::KeyUsagePurpose::KeyAgreement,
            KeyUsage::CertSign => rcgen::KeyUsagePurpose::KeyCertSign,
            KeyUsage::CrlSign => rcgen::KeyUsagePurpose::CrlSign,
            KeyUsage::EncipherOnly => rcgen::KeyUsagePurpose::EncipherOnly,
            KeyUsage::DecipherOnly => rcgen::KeyUsagePurpose::DecipherOnly,
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extended key usage purposes a policy may grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExtKeyUsage {
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "server auth")]
    ServerAuth,
    #[serde(rename = "client auth")]
    ClientAuth,
    #[serde(rename = "code signing")]
    CodeSigning,
    #[serde(rename = "email protection", alias = "s/mime")]
    EmailProtection,
    #[serde(rename = "timestamping")]
    TimeStamping,
    #[serde(rename = "ocsp signing")]
    OcspSigning,
}

impl ExtKeyUsage {
    /// Usage string as written in policy files
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtKeyUsage::Any => "any",
            ExtKeyUsage::ServerAuth => "server auth",
            ExtKeyUsage::ClientAuth => "client auth",
            ExtKeyUsage::CodeSigning => "code signing",
            ExtKeyUsage::EmailProtection => "email protection",
            ExtKeyUsage::TimeStamping => "timestamping",
            ExtKeyUsage::OcspSigning => "ocsp signing",
        }
    }

    /// Collect the purposes named in a parsed extended key usage extension.
    ///
    /// Purposes outside this vocabulary come back as their dotted OIDs in the
    /// second element so the caller can reject them.
    pub fn from_extension(
        eku: &x509_parser::extensions::ExtendedKeyUsage<'_>,
    ) -> (Vec<ExtKeyUsage>, Vec<String>) {
        let mut known = Vec::new();
        if eku.any {
            known.push(ExtKeyUsage::Any);
        }
        if eku.server_auth {
            known.push(ExtKeyUsage::ServerAuth);
        }
        if eku.client_auth {
            known.push(ExtKeyUsage::ClientAuth);
        }
        if eku.code_signing {
            known.push(ExtKeyUsage::CodeSigning);
        }
        if eku.email_protection {
            known.push(ExtKeyUsage::EmailProtection);
        }
        if eku.time_stamping {
            known.push(ExtKeyUsage::TimeStamping);
        }
        if eku.ocsp_signing {
            known.push(ExtKeyUsage::OcspSigning);
        }
        let unknown = eku.other.iter().map(|oid| oid.to_id_string()).collect();
        (known, unknown)
    }
}

impl From<ExtKeyUsage> for rcgen::ExtendedKeyUsagePurpose {
    fn from(usage: ExtKeyUsage) -> Self {
        match usage {
            ExtKeyUsage::Any => rcgen::ExtendedKeyUsagePurpose::Any,
            ExtKeyUsage::ServerAuth => rcgen::ExtendedKeyUsagePurpose::ServerAuth,
            ExtKeyUsage::ClientAuth => rcgen::ExtendedKeyUsagePurpose::ClientAuth,
            ExtKeyUsage::CodeSigning => rcgen::ExtendedKeyUsagePurpose::CodeSigning,
            ExtKeyUsage::EmailProtection => rcgen::ExtendedKeyUsagePurpose::EmailProtection,
            ExtKeyUsage::TimeStamping => rcgen::ExtendedKeyUsagePurpose::TimeStamping,
            ExtKeyUsage::OcspSigning => rcgen::ExtendedKeyUsagePurpose::OcspSigning,
        }
    }
}

impl fmt::Display for ExtKeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Usages {
        key: Vec<KeyUsage>,
        ext: Vec<ExtKeyUsage>,
    }

    #[test]
    fn test_policy_file_names() {
        let parsed: Usages = toml::from_str(
            r#"
key = ["digital signature", "signing", "key encipherment"]
ext = ["server auth", "client auth", "s/mime"]
"#,
        )
        .unwrap();
        assert_eq!(
            parsed.key,
            vec![KeyUsage::DigitalSignature, KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment]
        );
        assert_eq!(
            parsed.ext,
            vec![ExtKeyUsage::ServerAuth, ExtKeyUsage::ClientAuth, ExtKeyUsage::EmailProtection]
        );
    }

    #[test]
    fn test_unknown_usage_rejected() {
        let parsed: Result<Usages, _> = toml::from_str(
            r#"
key = ["world domination"]
ext = []
"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ca_only_usages() {
        assert!(KeyUsage::CertSign.is_ca_only());
        assert!(KeyUsage::CrlSign.is_ca_only());
        assert!(!KeyUsage::DigitalSignature.is_ca_only());
    }

    #[test]
    fn test_display_matches_serde_name() {
        assert_eq!(KeyUsage::KeyAgreement.to_string(), "key agreement");
        assert_eq!(ExtKeyUsage::OcspSigning.to_string(), "ocsp signing");
    }
}
