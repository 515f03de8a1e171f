//! End-to-end scenarios exercising the public API across components (§8)

use cda_core::background_reconciler::BackgroundReconciler;
use cda_core::ca_store::CaStore;
use cda_core::certificate_registry::CertificateRegistry;
use cda_core::cloud_verifier::FakeCloudVerifier;
use cda_core::event_bus::DomainEventBus;
use cda_core::policy::{Effect, GroupDefinition, PolicyCompiler, PolicyStatement};
use cda_core::prelude::*;
use cda_core::runtime_store::MemoryRuntimeStore;
use cda_core::session_manager::{CredentialMap, SessionManager};
use cda_core::thing_registry::ThingRegistry;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

const SAMPLE_PEM: &str = include_str!("fixtures/sample_cert.pem");

fn flip_one_body_char(pem_text: &str) -> String {
    let mut lines: Vec<&str> = pem_text.lines().collect();
    let body_index = lines
        .iter()
        .position(|l| !l.starts_with("-----"))
        .expect("fixture has a base64 body line");
    let flipped = {
        let mut chars: Vec<char> = lines[body_index].chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect::<String>()
    };
    lines[body_index] = &flipped;
    let mut result = lines.join("\n");
    result.push('\n');
    result
}

async fn camera_session(cloud: &Arc<FakeCloudVerifier>, things: Arc<ThingRegistry>, certs: Arc<CertificateRegistry>) -> (Arc<SessionManager>, String) {
    cloud.mark_active(SAMPLE_PEM);
    let record = certs.get_or_create(SAMPLE_PEM).await.unwrap();
    cloud.associate("alpha", &Fingerprint(record.id.0.clone()));

    let manager = Arc::new(SessionManager::new(10, 24, certs, things, cloud.clone()));
    let creds = CredentialMap {
        certificate_pem: SAMPLE_PEM.to_string(),
        client_id: Some("alpha".to_string()),
        ..Default::default()
    };
    let session_id = manager.create("mqtt", &creds).await.unwrap();
    (manager, session_id)
}

/// Scenario 1: policy compile then authorize.
#[tokio::test]
async fn scenario_1_policy_compile_then_authorize() {
    let mut definitions = BTreeMap::new();
    definitions.insert(
        "g1".to_string(),
        GroupDefinition {
            selection_rule: r#"thingName: "alpha""#.to_string(),
            policy_name: "p1".to_string(),
        },
    );
    let mut policies = BTreeMap::new();
    policies.insert(
        "p1".to_string(),
        vec![PolicyStatement {
            effect: Effect::Allow,
            operations: vec!["mqtt:publish".to_string()],
            resources: vec!["mqtt:topic:foo".to_string()],
        }],
    );
    let groups = PolicyCompiler::compile(&definitions, &policies).unwrap();

    let store: Arc<dyn cda_core::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
    let certs = Arc::new(CertificateRegistry::new(store.clone()));
    let things = Arc::new(ThingRegistry::new(store));
    let cloud = Arc::new(FakeCloudVerifier::new());
    let (manager, session_id) = camera_session(&cloud, things, certs).await;

    let engine = AuthorizationEngine::new(manager, groups);
    assert_eq!(
        engine.authorize(&session_id, "mqtt:publish", "mqtt:topic:foo").unwrap(),
        AuthorizationDecision::Permit
    );
    assert_eq!(
        engine.authorize(&session_id, "mqtt:publish", "mqtt:topic:bar").unwrap(),
        AuthorizationDecision::Deny
    );
}

/// Scenario 2: missing policy reference fails compilation.
#[test]
fn scenario_2_missing_policy_reference() {
    let mut definitions = BTreeMap::new();
    definitions.insert(
        "g1".to_string(),
        GroupDefinition {
            selection_rule: r#"thingName: "alpha""#.to_string(),
            policy_name: "p2".to_string(),
        },
    );
    let mut policies = BTreeMap::new();
    policies.insert("p1".to_string(), vec![]);

    let err = PolicyCompiler::compile(&definitions, &policies).unwrap_err();
    assert_eq!(err.external_code(), "PolicyException");
    assert!(err
        .to_string()
        .contains("Policy definition p2 does not have a corresponding policy"));
}

/// Scenario 3: trust window expiry.
#[tokio::test]
async fn scenario_3_trust_window_expiry() {
    let store: Arc<dyn cda_core::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
    let registry = CertificateRegistry::new(store);

    let t0 = Utc::now();
    let mut record = registry.get_or_create(SAMPLE_PEM).await.unwrap();
    assert_eq!(record.status, CertificateStatus::Unknown);

    record.status = CertificateStatus::Active;
    record.last_updated = t0;
    registry.update(&record).await.unwrap();

    let just_inside = t0 + chrono::Duration::hours(23) + chrono::Duration::minutes(59);
    assert_eq!(record.status(just_inside, 24), CertificateStatus::Active);

    let just_outside = t0 + chrono::Duration::hours(24) + chrono::Duration::minutes(1);
    assert_eq!(record.status(just_outside, 24), CertificateStatus::Unknown);
}

/// Scenario 4: reconciler orphan cleanup.
#[tokio::test]
async fn scenario_4_reconciler_orphan_cleanup() {
    let store: Arc<dyn cda_core::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
    let things = Arc::new(ThingRegistry::new(store.clone()));
    let certs = Arc::new(CertificateRegistry::new(store));
    let cloud = Arc::new(FakeCloudVerifier::new());

    let cert_a = certs.get_or_create(SAMPLE_PEM).await.unwrap();
    let mut thing_a = Thing::new("thingA").unwrap();
    thing_a.attach_certificate(&cert_a.id.0, Utc::now());
    things.update(&thing_a).await.unwrap();
    cloud.associate("thingA", &Fingerprint(cert_a.id.0.clone()));

    // Derive a second, distinct PEM by flipping one base64 character in the
    // body (never the BEGIN/END markers), giving certB a different fingerprint.
    let cert_b_pem = flip_one_body_char(SAMPLE_PEM);
    let cert_b = certs.get_or_create(&cert_b_pem).await.unwrap();
    let mut thing_b = Thing::new("thingB").unwrap();
    thing_b.attach_certificate(&cert_b.id.0, Utc::now());
    things.update(&thing_b).await.unwrap();
    // Cloud has no association for thingB: it is no longer known.

    let bus = Arc::new(DomainEventBus::new());
    let reconciler = BackgroundReconciler::new(things.clone(), certs.clone(), cloud.clone(), bus);
    reconciler.run().await;

    assert!(things.get("thingB").await.unwrap().is_none());
    assert!(certs.get_by_id(&cert_b.id).await.unwrap().is_none());
    assert!(things.get("thingA").await.unwrap().is_some());
    assert!(certs.get_by_id(&cert_a.id).await.unwrap().is_some());
}

/// Scenario 5: capacity-bounded session eviction.
#[tokio::test]
async fn scenario_5_capacity_bounded_session_eviction() {
    let store: Arc<dyn cda_core::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
    let certs = Arc::new(CertificateRegistry::new(store.clone()));
    let things = Arc::new(ThingRegistry::new(store));
    let cloud = Arc::new(FakeCloudVerifier::new());
    cloud.mark_active(SAMPLE_PEM);

    let manager = SessionManager::new(2, 24, certs, things, cloud);
    let creds = CredentialMap {
        certificate_pem: SAMPLE_PEM.to_string(),
        ..Default::default()
    };

    let s1 = manager.create("mqtt", &creds).await.unwrap();
    let s2 = manager.create("mqtt", &creds).await.unwrap();
    let s3 = manager.create("mqtt", &creds).await.unwrap();

    assert!(manager.resolve(&s1).is_none());
    assert!(manager.resolve(&s2).is_some());
    assert!(manager.resolve(&s3).is_some());
}

/// Scenario 6: CA type rotation.
#[tokio::test]
async fn scenario_6_ca_type_rotation() {
    let store: Arc<dyn cda_core::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
    let ca_store = CaStore::open(store.clone(), CaType::Rsa2048).await.unwrap();

    let passphrase_before = store.get("ca_passphrase").await.unwrap();
    let pem_before = ca_store.current().await.certificate_pem.clone();

    let (after, rotated) = ca_store.ensure(CaType::EcdsaP256).await.unwrap();
    assert!(rotated);
    assert_eq!(after.ca_type, CaType::EcdsaP256);
    assert_ne!(after.certificate_pem, pem_before);

    let authorities_bytes = store.get("certificates/authorities").await.unwrap().unwrap();
    let authorities: Vec<String> = serde_json::from_slice(&authorities_bytes).unwrap();
    assert_eq!(authorities[0], after.certificate_pem);

    let passphrase_after = store.get("ca_passphrase").await.unwrap();
    assert_eq!(passphrase_before, passphrase_after);
}
