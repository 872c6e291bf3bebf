//! Shared fixtures: throwaway CAs, CSRs and roots files on disk

#![allow(dead_code)]

use clap::Parser;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose, SignatureAlgorithm,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use multirootca::policy::{Policy, PolicyConfig};
use multirootca::roots::{BuildOptions, Root, RootRegistry, RootsConfig};
use multirootca::signer::{AuditSink, Signer};
use multirootca::{AppState, Args};

/// A CA key and self-signed certificate, PEM
pub struct TestRoot {
    pub key_pem: String,
    pub cert_pem: String,
}

impl TestRoot {
    pub fn generate(common_name: &str, alg: &'static SignatureAlgorithm) -> Self {
        let key = KeyPair::generate_for(alg).unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key).unwrap();
        Self {
            key_pem: key.serialize_pem(),
            cert_pem: cert.pem(),
        }
    }

    pub fn ecdsa(common_name: &str) -> Self {
        Self::generate(common_name, &rcgen::PKCS_ECDSA_P256_SHA256)
    }

    pub fn ed25519(common_name: &str) -> Self {
        Self::generate(common_name, &rcgen::PKCS_ED25519)
    }

    /// `tests/fixtures/<stem>-key.pem` and `<stem>-cert.pem`, made with openssl
    pub fn from_fixture(stem: &str) -> Self {
        Self {
            key_pem: fixture(&format!("{stem}-key.pem")),
            cert_pem: fixture(&format!("{stem}-cert.pem")),
        }
    }
}

/// Contents of a file under `tests/fixtures`
pub fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()))
}

/// PEM CSR for the given names; the first one becomes the CN
pub fn csr(names: &[&str]) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    if let Some(first) = names.first() {
        params.distinguished_name.push(DnType::CommonName, *first);
    }
    params.serialize_request(&key).unwrap().pem().unwrap()
}

/// One `[roots.<label>]` section plus the files it points at
pub struct RootSection<'a> {
    pub label: &'a str,
    pub root: &'a TestRoot,
    /// Extra TOML, appended after the key and certificate lines
    pub extra: &'a str,
}

/// A roots file in a temporary directory
pub struct Fixture {
    pub dir: TempDir,
    pub roots_file: PathBuf,
}

impl Fixture {
    pub fn new(sections: &[RootSection<'_>]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut toml = String::new();
        for section in sections {
            let key_file = format!("{}-key.pem", section.label);
            let cert_file = format!("{}-cert.pem", section.label);
            std::fs::write(dir.path().join(&key_file), &section.root.key_pem).unwrap();
            std::fs::write(dir.path().join(&cert_file), &section.root.cert_pem).unwrap();
            toml.push_str(&format!(
                "[roots.{label}]\nprivate_key = \"{key}\"\ncertificate = \"{cert}\"\n{extra}\n\n",
                label = section.label,
                key = key_file,
                cert = cert_file,
                extra = section.extra,
            ));
        }
        let roots_file = dir.path().join("roots.toml");
        std::fs::write(&roots_file, toml).unwrap();
        Self { dir, roots_file }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn config(&self) -> RootsConfig {
        RootsConfig::load(&self.roots_file).unwrap()
    }

    pub async fn registry(&self) -> RootRegistry {
        RootRegistry::build(&self.config(), &BuildOptions::default())
            .await
            .unwrap()
    }

    /// App state over this fixture, with extra CLI flags
    pub async fn state(&self, flags: &[&str]) -> Arc<AppState> {
        let registry = self.registry().await;
        Arc::new(AppState::new(args(&self.roots_file, flags), registry))
    }
}

/// App state holding one root whose audit sink is supplied by the caller
pub fn state_with_sink(
    label: &str,
    root: &TestRoot,
    sink: AuditSink,
    flags: &[&str],
) -> Arc<AppState> {
    let key = KeyPair::from_pem(&root.key_pem).unwrap();
    let policy = Arc::new(Policy::try_from(&PolicyConfig::default()).unwrap());
    let signer = Signer::new(label, key, &root.cert_pem, policy, Some(sink)).unwrap();
    let registry = RootRegistry::from_roots(vec![Root {
        signer,
        acl: None,
        auth_key: None,
    }])
    .unwrap();
    Arc::new(AppState::new(args(Path::new("unused.toml"), flags), registry))
}

pub fn args(roots_file: &Path, flags: &[&str]) -> Args {
    let roots = roots_file.to_string_lossy().to_string();
    let mut argv = vec!["multirootca".to_string(), "--roots".to_string(), roots];
    argv.extend(flags.iter().map(|f| f.to_string()));
    Args::parse_from(argv)
}

/// Number of lines in a JSONL audit file (0 if it does not exist yet)
pub fn audit_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

/// Parse a PEM certificate into DER bytes
pub fn cert_der(pem: &str) -> Vec<u8> {
    let (_, decoded) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).unwrap();
    decoded.contents
}
