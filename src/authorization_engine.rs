//! Per-request Permit/Deny decisions over compiled group permissions (§4.8)

use crate::error::{CdaError, Result};
use crate::policy::{variables, GroupConfiguration};
use crate::session_manager::{Session, SessionManager};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// The outcome of an authorization check. DENY-effect statements are
/// reserved and never contribute to a match (§3); absence of a matching
/// permission is `Deny`, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationDecision {
    /// At least one applicable permission matched.
    Permit,
    /// No applicable permission matched.
    Deny,
}

/// Decides `(session, operation, resource)` against a compiled
/// [`GroupConfiguration`].
pub struct AuthorizationEngine {
    sessions: Arc<SessionManager>,
    groups: RwLock<Arc<GroupConfiguration>>,
}

impl AuthorizationEngine {
    /// Build an engine over `sessions`, starting with `groups` compiled.
    pub fn new(sessions: Arc<SessionManager>, groups: GroupConfiguration) -> Self {
        Self {
            sessions,
            groups: RwLock::new(Arc::new(groups)),
        }
    }

    /// Swap in newly compiled group configuration (e.g. after a
    /// configuration change).
    pub fn update_groups(&self, groups: GroupConfiguration) {
        *self.groups.write().unwrap() = Arc::new(groups);
    }

    /// Decide `(session_id, operation, resource)`.
    pub fn authorize(&self, session_id: &str, operation: &str, resource: &str) -> Result<AuthorizationDecision> {
        let session = self
            .sessions
            .resolve(session_id)
            .ok_or(CdaError::InvalidSessionToken)?;

        let groups = self.groups.read().unwrap().clone();
        let matching_groups = groups.matching_groups(session.thing_name());

        for group_name in matching_groups {
            let Some(permissions) = groups.group_to_permissions.get(group_name) else {
                continue;
            };
            for permission in permissions {
                if !operation_matches(&permission.operation, operation) {
                    continue;
                }
                if permission_resource_matches(&permission.resource, resource, &session) {
                    debug!(group = group_name, operation, resource, "authorization permitted");
                    return Ok(AuthorizationDecision::Permit);
                }
            }
        }

        Ok(AuthorizationDecision::Deny)
    }
}

fn operation_matches(permitted: &str, requested: &str) -> bool {
    permitted == "*" || permitted == requested
}

fn permission_resource_matches(pattern: &str, requested: &str, session: &Session) -> bool {
    let thing_name = session.thing_name();
    let attribute = |key: &str| {
        session
            .attribute_providers
            .get("Thing")
            .and_then(|attrs| attrs.get(key))
            .cloned()
    };

    let Some(substituted) = variables::substitute(pattern, thing_name, attribute) else {
        debug!(pattern, "resource pattern has an unresolved variable, skipping permission");
        return false;
    };

    if let Some(prefix) = substituted.strip_suffix('*') {
        requested.starts_with(prefix)
    } else {
        substituted == requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate_registry::CertificateRegistry;
    use crate::cloud_verifier::FakeCloudVerifier;
    use crate::policy::{Effect, GroupDefinition, PolicyCompiler, PolicyStatement};
    use crate::runtime_store::MemoryRuntimeStore;
    use crate::session_manager::CredentialMap;
    use crate::thing_registry::ThingRegistry;
    use crate::types::Fingerprint;
    use std::collections::BTreeMap;

    const SAMPLE_PEM: &str = include_str!("../tests/fixtures/sample_cert.pem");

    async fn session_manager_with_camera() -> (Arc<SessionManager>, String) {
        let store: Arc<dyn crate::traits::RuntimeStore> = Arc::new(MemoryRuntimeStore::new());
        let certs = Arc::new(CertificateRegistry::new(store.clone()));
        let things = Arc::new(ThingRegistry::new(store));
        let cloud = Arc::new(FakeCloudVerifier::new());
        cloud.mark_active(SAMPLE_PEM);

        let record = certs.get_or_create(SAMPLE_PEM).await.unwrap();
        cloud.associate("camera-01", &Fingerprint(record.id.0.clone()));

        let manager = Arc::new(SessionManager::new(10, 24, certs, things, cloud));
        let creds = CredentialMap {
            certificate_pem: SAMPLE_PEM.to_string(),
            client_id: Some("camera-01".to_string()),
            ..Default::default()
        };
        let session_id = manager.create("mqtt", &creds).await.unwrap();
        (manager, session_id)
    }

    fn camera_group_configuration() -> GroupConfiguration {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "cameras".to_string(),
            GroupDefinition {
                selection_rule: r#"thingName:"camera-*""#.to_string(),
                policy_name: "camera-policy".to_string(),
            },
        );
        let mut policies = BTreeMap::new();
        policies.insert(
            "camera-policy".to_string(),
            vec![PolicyStatement {
                effect: Effect::Allow,
                operations: vec!["mqtt:Publish".to_string()],
                resources: vec![
                    "mqtt:topic:clients/${iot:Connection.Thing.ThingName}/data".to_string(),
                ],
            }],
        );
        PolicyCompiler::compile(&definitions, &policies).unwrap()
    }

    #[tokio::test]
    async fn permits_matching_operation_and_resource() {
        let (manager, session_id) = session_manager_with_camera().await;
        let engine = AuthorizationEngine::new(manager, camera_group_configuration());
        let decision = engine
            .authorize(&session_id, "mqtt:Publish", "mqtt:topic:clients/camera-01/data")
            .unwrap();
        assert_eq!(decision, AuthorizationDecision::Permit);
    }

    #[tokio::test]
    async fn denies_mismatched_resource() {
        let (manager, session_id) = session_manager_with_camera().await;
        let engine = AuthorizationEngine::new(manager, camera_group_configuration());
        let decision = engine
            .authorize(&session_id, "mqtt:Publish", "mqtt:topic:clients/other-thing/data")
            .unwrap();
        assert_eq!(decision, AuthorizationDecision::Deny);
    }

    #[tokio::test]
    async fn unknown_session_is_invalid_session_token() {
        let (manager, _session_id) = session_manager_with_camera().await;
        let engine = AuthorizationEngine::new(manager, camera_group_configuration());
        let err = engine.authorize("bogus-token", "mqtt:Publish", "x").unwrap_err();
        assert_eq!(err.external_code(), "InvalidSessionToken");
    }
}
