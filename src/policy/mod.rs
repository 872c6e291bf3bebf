//! Signing policy for a root
//!
//! A policy is loaded once per root and shared by every signing call for that
//! root. Evaluation takes what a request asks for and either grants a subset
//! of it or rejects it. Validity is the only field that is clamped instead of
//! rejected.

pub mod usage;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::types::{CaError, Result};

pub use usage::{ExtKeyUsage, KeyUsage};

/// Default maximum validity when a policy does not declare one (one year)
pub const DEFAULT_MAX_VALIDITY: &str = "8760h";

/// Default not-before backdate, absorbs clock skew between CA and relying parties
pub const DEFAULT_BACKDATE: &str = "5m";

/// Subject alternative name categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanKind {
    Dns,
    Ip,
    Email,
    Uri,
}

impl fmt::Display for SanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanKind::Dns => write!(f, "dns"),
            SanKind::Ip => write!(f, "ip"),
            SanKind::Email => write!(f, "email"),
            SanKind::Uri => write!(f, "uri"),
        }
    }
}

/// One subject alternative name, as requested or as granted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectAltName {
    Dns(String),
    Ip(IpAddr),
    Email(String),
    Uri(String),
}

impl SubjectAltName {
    /// Classify a free-form host entry the way signing overrides do:
    /// IP literal, then e-mail, then URI, otherwise DNS name.
    pub fn from_host(host: &str) -> Self {
        let host = host.trim();
        if let Ok(ip) = host.parse::<IpAddr>() {
            SubjectAltName::Ip(ip)
        } else if host.contains('@') {
            SubjectAltName::Email(host.to_string())
        } else if host.contains("://") {
            SubjectAltName::Uri(host.to_string())
        } else {
            SubjectAltName::Dns(host.to_string())
        }
    }

    pub fn kind(&self) -> SanKind {
        match self {
            SubjectAltName::Dns(_) => SanKind::Dns,
            SubjectAltName::Ip(_) => SanKind::Ip,
            SubjectAltName::Email(_) => SanKind::Email,
            SubjectAltName::Uri(_) => SanKind::Uri,
        }
    }

    /// Value as matched against name patterns
    pub fn value(&self) -> String {
        match self {
            SubjectAltName::Dns(v) | SubjectAltName::Email(v) | SubjectAltName::Uri(v) => v.clone(),
            SubjectAltName::Ip(ip) => ip.to_string(),
        }
    }
}

impl fmt::Display for SubjectAltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}

/// Policy as written in the roots file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Key usages a certificate may carry
    #[serde(default)]
    pub key_usages: Vec<KeyUsage>,

    /// Extended key usages a certificate may carry
    #[serde(default)]
    pub ext_key_usages: Vec<ExtKeyUsage>,

    /// Longest validity ever granted (humantime, e.g. "2160h" or "90days")
    #[serde(default = "default_max_validity")]
    pub max_validity: String,

    /// How far notBefore is moved into the past
    #[serde(default = "default_backdate")]
    pub backdate: String,

    /// SAN categories accepted; absent means any category
    #[serde(default)]
    pub allowed_san_types: Option<Vec<SanKind>>,

    /// Regexes every requested name (CN and SAN values) must match at least one of
    #[serde(default)]
    pub san_patterns: Vec<String>,
}

fn default_max_validity() -> String {
    DEFAULT_MAX_VALIDITY.to_string()
}

fn default_backdate() -> String {
    DEFAULT_BACKDATE.to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            key_usages: vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment],
            ext_key_usages: vec![ExtKeyUsage::ServerAuth, ExtKeyUsage::ClientAuth],
            max_validity: default_max_validity(),
            backdate: default_backdate(),
            allowed_san_types: None,
            san_patterns: Vec::new(),
        }
    }
}

/// Parse a humantime duration, naming the offending field on failure
pub fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| CaError::Config(format!("invalid duration for {}: '{}' ({})", field, value, e)))
}

/// Compiled, immutable signing policy
#[derive(Debug, Clone)]
pub struct Policy {
    key_usages: BTreeSet<KeyUsage>,
    ext_key_usages: BTreeSet<ExtKeyUsage>,
    max_validity: Duration,
    backdate: Duration,
    allowed_san_types: Option<BTreeSet<SanKind>>,
    san_patterns: Vec<Regex>,
}

impl PartialEq for Policy {
    fn eq(&self, other: &Self) -> bool {
        self.key_usages == other.key_usages
            && self.ext_key_usages == other.ext_key_usages
            && self.max_validity == other.max_validity
            && self.backdate == other.backdate
            && self.allowed_san_types == other.allowed_san_types
            && self.san_patterns.len() == other.san_patterns.len()
            && self
                .san_patterns
                .iter()
                .zip(&other.san_patterns)
                .all(|(a, b)| a.as_str() == b.as_str())
    }
}

impl TryFrom<&PolicyConfig> for Policy {
    type Error = CaError;

    fn try_from(config: &PolicyConfig) -> Result<Self> {
        if config.key_usages.is_empty() && config.ext_key_usages.is_empty() {
            return Err(CaError::Config("policy declares no key usages".to_string()));
        }
        if let Some(usage) = config.key_usages.iter().find(|u| u.is_ca_only()) {
            return Err(CaError::Config(format!(
                "policy grants '{}', which only CA certificates may carry",
                usage
            )));
        }

        let max_validity = parse_duration("max_validity", &config.max_validity)?;
        if max_validity.is_zero() {
            return Err(CaError::Config("max_validity must be positive".to_string()));
        }
        let backdate = parse_duration("backdate", &config.backdate)?;

        let san_patterns = config
            .san_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| CaError::Config(format!("invalid san pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            key_usages: config.key_usages.iter().copied().collect(),
            ext_key_usages: config.ext_key_usages.iter().copied().collect(),
            max_validity,
            backdate,
            allowed_san_types: config
                .allowed_san_types
                .as_ref()
                .map(|kinds| kinds.iter().copied().collect()),
            san_patterns,
        })
    }
}

/// What a request asks for, gathered from the CSR and signing overrides
#[derive(Debug, Clone, Default)]
pub struct RequestedProfile {
    pub common_name: Option<String>,
    pub sans: Vec<SubjectAltName>,
    pub key_usages: Vec<KeyUsage>,
    pub ext_key_usages: Vec<ExtKeyUsage>,
    /// Extended key usage OIDs outside the known vocabulary
    pub unknown_ext_key_usages: Vec<String>,
    pub validity: Option<Duration>,
}

/// What the policy grants for one certificate
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub key_usages: Vec<KeyUsage>,
    pub ext_key_usages: Vec<ExtKeyUsage>,
    pub sans: Vec<SubjectAltName>,
    pub validity: Duration,
    pub backdate: Duration,
    /// Whether the requested validity was shortened
    pub clamped: bool,
}

impl Policy {
    pub fn key_usages(&self) -> impl Iterator<Item = KeyUsage> + '_ {
        self.key_usages.iter().copied()
    }

    pub fn ext_key_usages(&self) -> impl Iterator<Item = ExtKeyUsage> + '_ {
        self.ext_key_usages.iter().copied()
    }

    pub fn max_validity(&self) -> Duration {
        self.max_validity
    }

    pub fn backdate(&self) -> Duration {
        self.backdate
    }

    /// Evaluate a request against this policy
    pub fn evaluate(&self, request: &RequestedProfile) -> Result<Grant> {
        let key_usages = if request.key_usages.is_empty() {
            self.key_usages.iter().copied().collect()
        } else {
            let requested: BTreeSet<KeyUsage> = request.key_usages.iter().copied().collect();
            if let Some(denied) = requested.difference(&self.key_usages).next() {
                return Err(CaError::PolicyViolation(format!(
                    "key usage '{}' is not permitted",
                    denied
                )));
            }
            requested.into_iter().collect()
        };

        if let Some(oid) = request.unknown_ext_key_usages.first() {
            return Err(CaError::PolicyViolation(format!(
                "extended key usage {} is not permitted",
                oid
            )));
        }

        let ext_key_usages = if request.ext_key_usages.is_empty() {
            self.ext_key_usages.iter().copied().collect()
        } else {
            let requested: BTreeSet<ExtKeyUsage> =
                request.ext_key_usages.iter().copied().collect();
            if let Some(denied) = requested.difference(&self.ext_key_usages).next() {
                return Err(CaError::PolicyViolation(format!(
                    "extended key usage '{}' is not permitted",
                    denied
                )));
            }
            requested.into_iter().collect()
        };

        if let Some(ref allowed) = self.allowed_san_types {
            if let Some(san) = request.sans.iter().find(|s| !allowed.contains(&s.kind())) {
                return Err(CaError::PolicyViolation(format!(
                    "subject alternative name type '{}' is not permitted ({})",
                    san.kind(),
                    san.value()
                )));
            }
        }

        if !self.san_patterns.is_empty() {
            let names = request
                .common_name
                .iter()
                .cloned()
                .chain(request.sans.iter().map(SubjectAltName::value));
            for name in names {
                if !self.san_patterns.iter().any(|p| p.is_match(&name)) {
                    return Err(CaError::PolicyViolation(format!(
                        "name '{}' does not match any permitted pattern",
                        name
                    )));
                }
            }
        }

        let (validity, clamped) = match request.validity {
            Some(requested) if requested > self.max_validity => (self.max_validity, true),
            Some(requested) => (requested, false),
            None => (self.max_validity, false),
        };

        Ok(Grant {
            key_usages,
            ext_key_usages,
            sans: request.sans.clone(),
            validity,
            backdate: self.backdate,
            clamped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = 24 * 60 * 60;

    fn policy(f: impl FnOnce(&mut PolicyConfig)) -> Policy {
        let mut config = PolicyConfig::default();
        f(&mut config);
        Policy::try_from(&config).unwrap()
    }

    #[test]
    fn test_empty_request_gets_full_allowed_set() {
        let p = policy(|_| {});
        let grant = p.evaluate(&RequestedProfile::default()).unwrap();
        assert_eq!(
            grant.key_usages,
            vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment]
        );
        assert_eq!(
            grant.ext_key_usages,
            vec![ExtKeyUsage::ServerAuth, ExtKeyUsage::ClientAuth]
        );
        assert_eq!(grant.validity, Duration::from_secs(365 * DAY));
        assert!(!grant.clamped);
    }

    #[test]
    fn test_subset_usages_granted() {
        let p = policy(|_| {});
        let grant = p
            .evaluate(&RequestedProfile {
                key_usages: vec![KeyUsage::DigitalSignature],
                ext_key_usages: vec![ExtKeyUsage::ClientAuth],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(grant.key_usages, vec![KeyUsage::DigitalSignature]);
        assert_eq!(grant.ext_key_usages, vec![ExtKeyUsage::ClientAuth]);
    }

    #[test]
    fn test_usage_outside_policy_rejected() {
        let p = policy(|_| {});
        let err = p
            .evaluate(&RequestedProfile {
                ext_key_usages: vec![ExtKeyUsage::CodeSigning],
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CaError::PolicyViolation(_)));

        let err = p
            .evaluate(&RequestedProfile {
                key_usages: vec![KeyUsage::CertSign],
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CaError::PolicyViolation(_)));
    }

    #[test]
    fn test_unknown_ext_usage_rejected() {
        let p = policy(|_| {});
        let err = p
            .evaluate(&RequestedProfile {
                unknown_ext_key_usages: vec!["1.2.3.4".to_string()],
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("1.2.3.4"));
    }

    #[test]
    fn test_validity_clamped_never_extended() {
        let p = policy(|c| c.max_validity = "90days".to_string());

        let grant = p
            .evaluate(&RequestedProfile {
                validity: Some(Duration::from_secs(365 * DAY)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(grant.validity, Duration::from_secs(90 * DAY));
        assert!(grant.clamped);

        let grant = p
            .evaluate(&RequestedProfile {
                validity: Some(Duration::from_secs(30 * DAY)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(grant.validity, Duration::from_secs(30 * DAY));
        assert!(!grant.clamped);
    }

    #[test]
    fn test_san_type_restriction() {
        let p = policy(|c| c.allowed_san_types = Some(vec![SanKind::Dns]));
        assert!(p
            .evaluate(&RequestedProfile {
                sans: vec![SubjectAltName::Dns("a.example.com".into())],
                ..Default::default()
            })
            .is_ok());

        let err = p
            .evaluate(&RequestedProfile {
                sans: vec![SubjectAltName::from_host("10.1.2.3")],
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CaError::PolicyViolation(_)));
    }

    #[test]
    fn test_name_patterns_cover_cn_and_sans() {
        let p = policy(|c| c.san_patterns = vec![r"^[a-z0-9-]+\.example\.com$".to_string()]);
        assert!(p
            .evaluate(&RequestedProfile {
                common_name: Some("web.example.com".into()),
                sans: vec![SubjectAltName::Dns("api.example.com".into())],
                ..Default::default()
            })
            .is_ok());

        let err = p
            .evaluate(&RequestedProfile {
                common_name: Some("web.example.com".into()),
                sans: vec![SubjectAltName::Dns("evil.example.org".into())],
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("evil.example.org"));
    }

    #[test]
    fn test_invalid_policies_rejected() {
        let mut config = PolicyConfig::default();
        config.key_usages.clear();
        config.ext_key_usages.clear();
        assert!(Policy::try_from(&config).is_err());

        let mut config = PolicyConfig::default();
        config.key_usages.push(KeyUsage::CertSign);
        assert!(Policy::try_from(&config).is_err());

        let mut config = PolicyConfig::default();
        config.max_validity = "forever".to_string();
        assert!(Policy::try_from(&config).is_err());

        let mut config = PolicyConfig::default();
        config.san_patterns = vec!["(".to_string()];
        assert!(Policy::try_from(&config).is_err());
    }

    #[test]
    fn test_host_classification() {
        assert_eq!(SubjectAltName::from_host("::1").kind(), SanKind::Ip);
        assert_eq!(SubjectAltName::from_host("ops@example.com").kind(), SanKind::Email);
        assert_eq!(SubjectAltName::from_host("spiffe://example.org/x").kind(), SanKind::Uri);
        assert_eq!(SubjectAltName::from_host("www.example.com").kind(), SanKind::Dns);
    }

    #[test]
    fn test_same_config_same_policy() {
        let config = PolicyConfig {
            san_patterns: vec!["^a$".to_string()],
            ..Default::default()
        };
        assert_eq!(Policy::try_from(&config).unwrap(), Policy::try_from(&config).unwrap());
    }
}
