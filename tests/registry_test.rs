//! Root registry construction tests

mod common;

use common::{Fixture, RootSection, TestRoot};
use multirootca::roots::{BuildOptions, RootRegistry};
use multirootca::signer::KeyFamily;
use multirootca::CaError;

#[tokio::test]
async fn test_build_is_idempotent() {
    let primary = TestRoot::ecdsa("Primary Root");
    let secondary = TestRoot::ecdsa("Secondary Root");
    let fixture = Fixture::new(&[
        RootSection {
            label: "primary",
            root: &primary,
            extra: "[roots.primary.policy]\nmax_validity = \"90days\"\n",
        },
        RootSection {
            label: "secondary",
            root: &secondary,
            extra: "acl = [\"10.0.0.0/8\"]\n",
        },
    ]);

    let first = fixture.registry().await;
    let second = fixture.registry().await;

    assert_eq!(first.labels(), vec!["primary", "secondary"]);
    assert_eq!(first.labels(), second.labels());
    assert_eq!(
        first.lookup("primary").unwrap().policy().max_validity(),
        std::time::Duration::from_secs(90 * 24 * 3600)
    );
    for label in first.labels() {
        let a = first.lookup(label).unwrap();
        let b = second.lookup(label).unwrap();
        assert_eq!(a.policy().max_validity(), b.policy().max_validity());
        assert_eq!(
            a.policy().key_usages().collect::<Vec<_>>(),
            b.policy().key_usages().collect::<Vec<_>>()
        );
        assert_eq!(a.acl, b.acl);
        assert_eq!(a.signer.certificate_pem(), b.signer.certificate_pem());
        assert_eq!(a.signer.family(), KeyFamily::Ecdsa);
    }
}

#[tokio::test]
async fn test_labels_are_case_sensitive() {
    let root = TestRoot::ecdsa("Root");
    let fixture = Fixture::new(&[RootSection {
        label: "Primary",
        root: &root,
        extra: "",
    }]);
    let registry = fixture.registry().await;
    assert!(registry.lookup("Primary").is_some());
    assert!(registry.lookup("primary").is_none());
}

#[tokio::test]
async fn test_p521_and_rsa_roots_load() {
    let p521 = TestRoot::from_fixture("p521-ca");
    let rsa = TestRoot::from_fixture("rsa-ca");
    let fixture = Fixture::new(&[
        RootSection {
            label: "p521",
            root: &p521,
            extra: "",
        },
        RootSection {
            label: "rsa",
            root: &rsa,
            extra: "",
        },
    ]);
    let registry = fixture.registry().await;

    assert_eq!(registry.labels(), vec!["p521", "rsa"]);
    let root = registry.lookup("p521").unwrap();
    assert_eq!(root.signer.family(), KeyFamily::Ecdsa);
    assert_eq!(root.signer.certificate_pem(), p521.cert_pem);
    assert_eq!(registry.lookup("rsa").unwrap().signer.family(), KeyFamily::Rsa);
}

#[tokio::test]
async fn test_ed25519_root_is_unsupported() {
    let good = TestRoot::ecdsa("Good Root");
    let ed = TestRoot::ed25519("Edwards Root");
    let fixture = Fixture::new(&[
        RootSection {
            label: "edwards",
            root: &ed,
            extra: "",
        },
        RootSection {
            label: "good",
            root: &good,
            extra: "",
        },
    ]);

    let err = RootRegistry::build(&fixture.config(), &BuildOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, CaError::UnsupportedKeyType { ref label, .. } if label == "edwards"),
        "unexpected error: {err}"
    );
    assert_eq!(err.code(), 2100);

    let options = BuildOptions {
        skip_invalid: true,
        ..Default::default()
    };
    let registry = RootRegistry::build(&fixture.config(), &options).await.unwrap();
    assert_eq!(registry.labels(), vec!["good"]);
}

#[tokio::test]
async fn test_skip_mode_still_needs_one_root() {
    let ed = TestRoot::ed25519("Edwards Root");
    let fixture = Fixture::new(&[RootSection {
        label: "edwards",
        root: &ed,
        extra: "",
    }]);
    let options = BuildOptions {
        skip_invalid: true,
        ..Default::default()
    };
    let err = RootRegistry::build(&fixture.config(), &options).await.unwrap_err();
    assert!(matches!(err, CaError::Config(_)));
}

#[tokio::test]
async fn test_require_acl() {
    let open = TestRoot::ecdsa("Open Root");
    let fixture = Fixture::new(&[RootSection {
        label: "open",
        root: &open,
        extra: "",
    }]);
    let options = BuildOptions {
        require_acl: true,
        ..Default::default()
    };
    let err = RootRegistry::build(&fixture.config(), &options).await.unwrap_err();
    assert!(matches!(err, CaError::Config(_)));
}

#[tokio::test]
async fn test_key_must_match_certificate() {
    let a = TestRoot::ecdsa("Root A");
    let b = TestRoot::ecdsa("Root B");
    let crossed = TestRoot {
        key_pem: a.key_pem.clone(),
        cert_pem: b.cert_pem.clone(),
    };
    let fixture = Fixture::new(&[RootSection {
        label: "crossed",
        root: &crossed,
        extra: "",
    }]);
    let err = RootRegistry::build(&fixture.config(), &BuildOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::Config(_)));
}

#[tokio::test]
async fn test_missing_key_file() {
    let root = TestRoot::ecdsa("Root");
    let fixture = Fixture::new(&[RootSection {
        label: "primary",
        root: &root,
        extra: "",
    }]);
    std::fs::remove_file(fixture.path("primary-key.pem")).unwrap();
    let err = RootRegistry::build(&fixture.config(), &BuildOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CaError::Config(_)));
}

#[tokio::test]
async fn test_invalid_acl_and_policy_rejected() {
    let root = TestRoot::ecdsa("Root");
    let bad_acl = Fixture::new(&[RootSection {
        label: "primary",
        root: &root,
        extra: "acl = [\"10.0.0.0/99\"]\n",
    }]);
    assert!(RootRegistry::build(&bad_acl.config(), &BuildOptions::default())
        .await
        .is_err());

    let ca_usage = Fixture::new(&[RootSection {
        label: "primary",
        root: &root,
        extra: "[roots.primary.policy]\nkey_usages = [\"cert sign\"]\n",
    }]);
    assert!(RootRegistry::build(&ca_usage.config(), &BuildOptions::default())
        .await
        .is_err());
}

#[tokio::test]
async fn test_file_audit_target_opened() {
    let root = TestRoot::ecdsa("Root");
    let fixture = Fixture::new(&[RootSection {
        label: "primary",
        root: &root,
        extra: "[roots.primary.audit]\nkind = \"file\"\npath = \"audit/primary.jsonl\"\n",
    }]);
    let registry = fixture.registry().await;
    let target = registry.lookup("primary").unwrap().signer.audit_target().unwrap();
    assert!(target.starts_with("file:"));
    assert!(fixture.path("audit/primary.jsonl").exists());
}

#[tokio::test]
async fn test_from_roots_rejects_duplicates() {
    let fixture_root = TestRoot::ecdsa("Root");
    let fixture = Fixture::new(&[RootSection {
        label: "primary",
        root: &fixture_root,
        extra: "",
    }]);
    let registry = fixture.registry().await;
    let root = registry.lookup("primary").unwrap().clone();

    let err = RootRegistry::from_roots(vec![root.clone(), root]).unwrap_err();
    assert!(matches!(err, CaError::Config(_)));
}
