use std::{collections::BTreeMap, fmt, time::Duration};

use breakglass_types::{BreakglassRequest, PolicySpec};
use k8s_openapi::api::authorization::v1::{ResourceRule, SelfSubjectRulesReview, SelfSubjectRulesReviewSpec};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule as K8sPolicyRule, Role, RoleBinding, RoleRef,
    Subject as K8sSubject,
};
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, ListParams, ObjectMeta, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::fmt::Debug;

const RBAC_DEADLINE: Duration = Duration::from_secs(30);

const OWNER_NAME_LABEL: &str = "breakglass.dev/owner-name";
const OWNER_NAMESPACE_LABEL: &str = "breakglass.dev/owner-namespace";
const OWNER_UID_LABEL: &str = "breakglass.dev/owner-uid";
const OWNED_BY_LABEL: &str = "breakglass.dev/owned-by";
const OWNED_BY_VALUE: &str = "true";

/// The classification of a failed cluster-API call, per spec.md §4.3.2.
#[derive(Debug, Clone)]
pub struct RbacError {
    pub operation: String,
    pub resource: String,
    pub retryable: bool,
    pub reason: String,
    pub cause: String,
}

impl fmt::Display for RbacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed ({}{}): {}",
            self.operation,
            self.resource,
            self.reason,
            if self.retryable { ", retryable" } else { "" },
            self.cause
        )
    }
}

impl std::error::Error for RbacError {}

/// Maps a cluster-API error to `(retryable, reason)` per the table in
/// spec.md §4.3.2. `None` means the error should be swallowed (`NotFound`).
fn classify_reason(reason: &str) -> Option<(bool, &'static str)> {
    match reason {
        "NotFound" => None,
        "Forbidden" | "Unauthorized" => Some((false, "Forbidden")),
        "Timeout" | "ServerTimeout" | "TooManyRequests" | "Conflict" | "InternalError"
        | "ServiceUnavailable" => Some((true, "Timeout")),
        "BadRequest" | "Invalid" | "MethodNotAllowed" | "AlreadyExists" | "Gone"
        | "RequestEntityTooLarge" | "UnsupportedMediaType" => Some((false, "InvalidRequest")),
        _ => Some((false, "InvalidRequest")),
    }
}

fn classify(operation: &str, resource: &str, err: kube::Error) -> Option<RbacError> {
    match &err {
        kube::Error::Api(ae) => classify_reason(&ae.reason).map(|(retryable, reason)| RbacError {
            operation: operation.to_string(),
            resource: resource.to_string(),
            retryable,
            reason: reason.to_string(),
            cause: ae.message.clone(),
        }),
        // Anything that isn't a structured API error (transport failure,
        // deserialization hiccup, ...) is presumed transient.
        _ => Some(RbacError {
            operation: operation.to_string(),
            resource: resource.to_string(),
            retryable: true,
            reason: "Timeout".to_string(),
            cause: err.to_string(),
        }),
    }
}

/// `AlreadyExists` on create means ownership of the existing object is
/// reclaimed, not an error (spec.md §4.3.2, footnote 1).
fn classify_create(resource: &str, err: kube::Error) -> Result<(), RbacError> {
    if let kube::Error::Api(ae) = &err
        && ae.reason == "AlreadyExists"
    {
        return Ok(());
    }
    match classify("create", resource, err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn stable_suffix(instance: &BreakglassRequest) -> String {
    let uid = instance.uid().unwrap_or_default();
    let digest = Sha256::digest(uid.as_bytes());
    hex::encode(digest)[..8].to_string()
}

fn owner_labels(instance: &BreakglassRequest) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(OWNER_NAME_LABEL.to_string(), instance.name_any());
    labels.insert(
        OWNER_NAMESPACE_LABEL.to_string(),
        instance.namespace().unwrap_or_default(),
    );
    labels.insert(OWNER_UID_LABEL.to_string(), instance.uid().unwrap_or_default());
    labels.insert(OWNED_BY_LABEL.to_string(), OWNED_BY_VALUE.to_string());
    labels
}

fn to_k8s_subjects(instance: &BreakglassRequest) -> Vec<K8sSubject> {
    use breakglass_types::SubjectKind;

    instance
        .spec
        .subjects
        .iter()
        .map(|s| K8sSubject {
            kind: s.kind.to_string(),
            name: s.name.clone(),
            namespace: s.namespace.clone(),
            api_group: match s.kind {
                SubjectKind::ServiceAccount => None,
                SubjectKind::User | SubjectKind::Group => Some("rbac.authorization.k8s.io".to_string()),
            },
        })
        .collect()
}

fn to_k8s_rules(policy: &PolicySpec) -> Vec<K8sPolicyRule> {
    policy
        .rules
        .iter()
        .map(|r| K8sPolicyRule {
            verbs: r.verbs.clone(),
            api_groups: Some(r.api_groups.clone()),
            resources: Some(r.resources.clone()),
            resource_names: (!r.resource_names.is_empty()).then(|| r.resource_names.clone()),
            non_resource_ur_ls: (!r.non_resource_urls.is_empty()).then(|| r.non_resource_urls.clone()),
        })
        .collect()
}

async fn create_with_deadline<T>(api: &Api<T>, object: &T, name: &str) -> Result<(), RbacError>
where
    T: kube::Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    match tokio::time::timeout(RBAC_DEADLINE, api.create(&PostParams::default(), object)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => classify_create(name, e),
        Err(_) => Err(RbacError {
            operation: "create".to_string(),
            resource: name.to_string(),
            retryable: true,
            reason: "Timeout".to_string(),
            cause: "deadline exceeded".to_string(),
        }),
    }
}

fn forbidden(resource: &str, cause: String) -> RbacError {
    RbacError {
        operation: "privilege-check".to_string(),
        resource: resource.to_string(),
        retryable: false,
        reason: "Forbidden".to_string(),
        cause,
    }
}

/// The operator's own rules in `namespace` (empty string for cluster
/// scope), per a `SelfSubjectRulesReview`.
async fn operator_rules(client: &Client, namespace: &str) -> Result<Vec<ResourceRule>, RbacError> {
    let review = SelfSubjectRulesReview {
        spec: SelfSubjectRulesReviewSpec {
            namespace: namespace.to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let api: Api<SelfSubjectRulesReview> = Api::all(client.clone());
    let reviewed = api
        .create(&PostParams::default(), &review)
        .await
        .map_err(|e| RbacError {
            operation: "selfsubjectrulesreview".to_string(),
            resource: namespace.to_string(),
            retryable: true,
            reason: "Timeout".to_string(),
            cause: e.to_string(),
        })?;
    Ok(reviewed.status.map(|s| s.resource_rules).unwrap_or_default())
}

/// True iff every verb/apiGroup/resource combination `requested` covers is
/// also covered by at least one of `granted`'s rules. Conservative: an
/// empty `granted` set never covers anything.
fn rule_is_covered(requested: &K8sPolicyRule, granted: &[ResourceRule]) -> bool {
    let groups = requested.api_groups.clone().unwrap_or_default();
    let resources = requested.resources.clone().unwrap_or_default();
    requested.verbs.iter().all(|verb| {
        groups.iter().all(|group| {
            resources.iter().all(|resource| {
                granted.iter().any(|g| {
                    g.verbs.iter().any(|v| v == "*" || v == verb)
                        && g.api_groups
                            .as_ref()
                            .is_none_or(|gs| gs.iter().any(|gg| gg == "*" || gg == group))
                        && g.resources
                            .as_ref()
                            .is_none_or(|rs| rs.iter().any(|rr| rr == "*" || rr == resource))
                })
            })
        })
    })
}

/// Enforces `controller.privilegeEscalation`: a request may not grant a
/// `ClusterRole` or inline policy rule the operator doesn't itself hold.
async fn check_privilege_escalation(client: Client, instance: &BreakglassRequest) -> Result<(), RbacError> {
    if !instance.spec.cluster_roles.is_empty() {
        let granted = operator_rules(&client, "").await?;
        let api: Api<ClusterRole> = Api::all(client.clone());
        for role_name in &instance.spec.cluster_roles {
            let role = api.get(role_name).await.map_err(|e| {
                classify("get", role_name, e).unwrap_or_else(|| forbidden(role_name, "ClusterRole lookup failed".to_string()))
            })?;
            for rule in role.rules.unwrap_or_default() {
                if !rule_is_covered(&rule, &granted) {
                    return Err(forbidden(
                        role_name,
                        format!("ClusterRole {role_name} grants permissions the operator does not hold"),
                    ));
                }
            }
        }
    }

    for policy in &instance.spec.policy {
        let namespace = policy
            .namespace
            .clone()
            .unwrap_or_else(|| instance.namespace().unwrap_or_default());
        let granted = operator_rules(&client, &namespace).await?;
        for rule in to_k8s_rules(policy) {
            if !rule_is_covered(&rule, &granted) {
                return Err(forbidden(
                    &namespace,
                    format!("inline policy in namespace {namespace} grants permissions the operator does not hold"),
                ));
            }
        }
    }

    Ok(())
}

/// Idempotently creates the `ClusterRoleBinding`/`Role`/`RoleBinding`
/// objects a request calls for, skipping anything already present in
/// `status.createdResources`. Returns the updated list of created names.
pub async fn grant(
    client: Client,
    instance: &BreakglassRequest,
    allow_privilege_escalation: bool,
) -> Result<Vec<String>, RbacError> {
    if !allow_privilege_escalation {
        check_privilege_escalation(client.clone(), instance).await?;
    }

    let suffix = stable_suffix(instance);
    let mut created = instance
        .status
        .as_ref()
        .map(|s| s.created_resources.clone())
        .unwrap_or_default();
    let owner_ref = instance
        .controller_owner_ref(&())
        .expect("a namespaced BreakglassRequest always has a controller owner ref");
    let labels = owner_labels(instance);
    let subjects = to_k8s_subjects(instance);

    for role in &instance.spec.cluster_roles {
        let name = format!("breakglass-{suffix}-crb-{role}");
        if created.iter().any(|n| n == &name) {
            continue;
        }
        let crb = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(labels.clone()),
                owner_references: Some(vec![owner_ref.clone()]),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: role.clone(),
            },
            subjects: Some(subjects.clone()),
        };
        let api: Api<ClusterRoleBinding> = Api::all(client.clone());
        create_with_deadline(&api, &crb, &name).await?;
        created.push(name);
    }

    for (i, policy) in instance.spec.policy.iter().enumerate() {
        let namespace = policy
            .namespace
            .clone()
            .unwrap_or_else(|| instance.namespace().unwrap_or_default());

        let role_name = format!("breakglass-{suffix}-role-{i}");
        if !created.iter().any(|n| n == &role_name) {
            let role = Role {
                metadata: ObjectMeta {
                    name: Some(role_name.clone()),
                    namespace: Some(namespace.clone()),
                    labels: Some(labels.clone()),
                    owner_references: Some(vec![owner_ref.clone()]),
                    ..Default::default()
                },
                rules: Some(to_k8s_rules(policy)),
            };
            let api: Api<Role> = Api::namespaced(client.clone(), &namespace);
            create_with_deadline(&api, &role, &role_name).await?;
            created.push(role_name.clone());
        }

        let binding_name = format!("breakglass-{suffix}-rb-{i}");
        if !created.iter().any(|n| n == &binding_name) {
            let rb = RoleBinding {
                metadata: ObjectMeta {
                    name: Some(binding_name.clone()),
                    namespace: Some(namespace.clone()),
                    labels: Some(labels.clone()),
                    owner_references: Some(vec![owner_ref.clone()]),
                    ..Default::default()
                },
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "Role".to_string(),
                    name: role_name.clone(),
                },
                subjects: Some(subjects.clone()),
            };
            let api: Api<RoleBinding> = Api::namespaced(client.clone(), &namespace);
            create_with_deadline(&api, &rb, &binding_name).await?;
            created.push(binding_name);
        }
    }

    Ok(created)
}

async fn delete_all<T>(client: Client, selector: &str) -> Result<(), RbacError>
where
    T: kube::Resource + Clone + Serialize + DeserializeOwned + Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::all(client);
    let list = api
        .list(&ListParams::default().labels(selector))
        .await
        .map_err(|e| RbacError {
            operation: "list".to_string(),
            resource: selector.to_string(),
            retryable: true,
            reason: "Timeout".to_string(),
            cause: e.to_string(),
        })?;
    for obj in list.items {
        let name = obj.meta().name.clone().unwrap_or_default();
        match tokio::time::timeout(RBAC_DEADLINE, api.delete(&name, &DeleteParams::default())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                if let Some(err) = classify("delete", &name, e) {
                    return Err(err);
                }
            }
            Err(_) => {
                return Err(RbacError {
                    operation: "delete".to_string(),
                    resource: name,
                    retryable: true,
                    reason: "Timeout".to_string(),
                    cause: "deadline exceeded".to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Deletes every object carrying this request's owned-by label, in the
/// order `RoleBinding -> Role -> ClusterRoleBinding`. Used both for the
/// revoke protocol and for deletion-time cleanup (identical per spec.md
/// §4.3).
pub async fn revoke(client: Client, instance: &BreakglassRequest) -> Result<(), RbacError> {
    let selector = format!(
        "{OWNED_BY_LABEL}={OWNED_BY_VALUE},{OWNER_UID_LABEL}={}",
        instance.uid().unwrap_or_default()
    );
    delete_all::<RoleBinding>(client.clone(), &selector).await?;
    delete_all::<Role>(client.clone(), &selector).await?;
    delete_all::<ClusterRoleBinding>(client, &selector).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_swallowed() {
        assert!(classify_reason("NotFound").is_none());
    }

    #[test]
    fn forbidden_is_not_retryable() {
        assert_eq!(classify_reason("Forbidden"), Some((false, "Forbidden")));
        assert_eq!(classify_reason("Unauthorized"), Some((false, "Forbidden")));
    }

    #[test]
    fn conflict_and_timeout_are_retryable() {
        for reason in ["Timeout", "ServerTimeout", "TooManyRequests", "Conflict", "InternalError", "ServiceUnavailable"] {
            assert_eq!(classify_reason(reason), Some((true, "Timeout")), "reason={reason}");
        }
    }

    #[test]
    fn already_exists_is_invalid_request_when_not_on_create_path() {
        assert_eq!(classify_reason("AlreadyExists"), Some((false, "InvalidRequest")));
    }

    #[test]
    fn unknown_reason_defaults_to_invalid_request() {
        assert_eq!(classify_reason("SomethingNew"), Some((false, "InvalidRequest")));
    }

    fn rule(verbs: &[&str], groups: &[&str], resources: &[&str]) -> K8sPolicyRule {
        K8sPolicyRule {
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            api_groups: Some(groups.iter().map(|s| s.to_string()).collect()),
            resources: Some(resources.iter().map(|s| s.to_string()).collect()),
            resource_names: None,
            non_resource_ur_ls: None,
        }
    }

    fn granted_rule(verbs: &[&str], groups: &[&str], resources: &[&str]) -> ResourceRule {
        ResourceRule {
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            api_groups: Some(groups.iter().map(|s| s.to_string()).collect()),
            resources: Some(resources.iter().map(|s| s.to_string()).collect()),
            resource_names: None,
            non_resource_ur_ls: None,
        }
    }

    #[test]
    fn rule_is_covered_by_exact_match() {
        let requested = rule(&["get", "list"], &[""], &["pods"]);
        let granted = vec![granted_rule(&["get", "list"], &[""], &["pods"])];
        assert!(rule_is_covered(&requested, &granted));
    }

    #[test]
    fn rule_is_covered_by_wildcard_verb() {
        let requested = rule(&["get"], &[""], &["secrets"]);
        let granted = vec![granted_rule(&["*"], &[""], &["secrets"])];
        assert!(rule_is_covered(&requested, &granted));
    }

    #[test]
    fn rule_is_not_covered_when_granted_set_is_narrower() {
        let requested = rule(&["get", "delete"], &[""], &["secrets"]);
        let granted = vec![granted_rule(&["get"], &[""], &["secrets"])];
        assert!(!rule_is_covered(&requested, &granted));
    }

    #[test]
    fn rule_is_never_covered_by_empty_granted_set() {
        let requested = rule(&["get"], &[""], &["pods"]);
        assert!(!rule_is_covered(&requested, &[]));
    }
}
