use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The kind of principal a [`Subject`] refers to.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum SubjectKind {
    #[default]
    User,
    Group,
    ServiceAccount,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKind::User => write!(f, "User"),
            SubjectKind::Group => write!(f, "Group"),
            SubjectKind::ServiceAccount => write!(f, "ServiceAccount"),
        }
    }
}

/// A principal that a [`BreakglassRequest`] grants access to.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Subject {
    pub kind: SubjectKind,

    pub name: String,

    /// Required iff `kind == ServiceAccount`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// One RBAC rule, optionally scoped to a namespace.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PolicyRule {
    pub verbs: Vec<String>,

    #[serde(default, rename = "apiGroups")]
    pub api_groups: Vec<String>,

    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default, rename = "resourceNames", skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,

    #[serde(
        default,
        rename = "nonResourceURLs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub non_resource_urls: Vec<String>,
}

/// An inline RBAC policy. Empty `namespace` means cluster-scoped.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub rules: Vec<PolicyRule>,
}

/// Approval requirements for a request.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ApprovalSpec {
    #[serde(default = "default_true")]
    pub required: bool,
}

impl Default for ApprovalSpec {
    fn default() -> Self {
        ApprovalSpec { required: true }
    }
}

fn default_true() -> bool {
    true
}

fn default_location() -> String {
    "UTC".to_string()
}

fn default_duration() -> String {
    "0s".to_string()
}

/// Activation schedule: either a one-shot window (`cron` empty) or a
/// recurring one driven by a 5-field cron expression.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ScheduleSpec {
    /// RFC3339 timestamp. Required for a one-shot schedule when unset
    /// elsewhere; optional for recurring schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// Window length, parsed with `parse_duration` (e.g. "1h", "30m").
    /// May be "0s" only when `cron` is empty.
    #[serde(default = "default_duration")]
    pub duration: String,

    /// 5-field cron expression. Empty means one-shot.
    #[serde(default)]
    pub cron: String,

    /// IANA time zone name.
    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default, rename = "maxActivations", skip_serializing_if = "Option::is_none")]
    pub max_activations: Option<u32>,
}

/// Desired state of a breakglass access grant.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "breakglass.dev",
    version = "v1",
    kind = "BreakglassRequest",
    plural = "breakglassrequests",
    shortname = "bgr",
    derive = "PartialEq",
    status = "BreakglassRequestStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.conditions[-1:].type\", \"name\": \"STATE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.expiresAt\", \"name\": \"EXPIRES\", \"type\": \"date\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.activationCount\", \"name\": \"ACTIVATIONS\", \"type\": \"integer\" }"
)]
pub struct BreakglassRequestSpec {
    pub subjects: Vec<Subject>,

    /// Exactly one of `cluster_roles`/`policy` must be non-empty.
    #[serde(default, rename = "clusterRoles", skip_serializing_if = "Vec::is_empty")]
    pub cluster_roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<PolicySpec>,

    #[serde(default)]
    pub approval: ApprovalSpec,

    pub schedule: ScheduleSpec,

    pub justification: String,

    #[serde(default, rename = "ticketID", skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
}

/// The finite tag set driving the reconciler's state machine (spec.md §3.3).
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    Pending,
    Approved,
    Denied,
    RecurringPending,
    RecurringActive,
    Active,
    Expired,
    Revoked,
    Failed,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionType::Pending => write!(f, "Pending"),
            ConditionType::Approved => write!(f, "Approved"),
            ConditionType::Denied => write!(f, "Denied"),
            ConditionType::RecurringPending => write!(f, "RecurringPending"),
            ConditionType::RecurringActive => write!(f, "RecurringActive"),
            ConditionType::Active => write!(f, "Active"),
            ConditionType::Expired => write!(f, "Expired"),
            ConditionType::Revoked => write!(f, "Revoked"),
            ConditionType::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for ConditionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ConditionType::Pending),
            "Approved" => Ok(ConditionType::Approved),
            "Denied" => Ok(ConditionType::Denied),
            "RecurringPending" => Ok(ConditionType::RecurringPending),
            "RecurringActive" => Ok(ConditionType::RecurringActive),
            "Active" => Ok(ConditionType::Active),
            "Expired" => Ok(ConditionType::Expired),
            "Revoked" => Ok(ConditionType::Revoked),
            "Failed" => Ok(ConditionType::Failed),
            _ => Err(()),
        }
    }
}

/// One entry of the status condition list (spec.md §3.3).
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// "True", "False" or "Unknown", following Kubernetes convention.
    pub status: String,

    pub reason: String,

    pub message: String,

    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: String,

    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Controller-owned status for a [`BreakglassRequest`].
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct BreakglassRequestStatus {
    #[serde(
        default,
        rename = "observedGeneration",
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, rename = "grantedAt", skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<String>,

    #[serde(default, rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,

    #[serde(
        default,
        rename = "nextActivationAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_activation_at: Option<String>,

    #[serde(default, rename = "activationCount")]
    pub activation_count: u32,

    #[serde(default, rename = "approvedBy")]
    pub approved_by: String,

    #[serde(default, rename = "createdResources")]
    pub created_resources: Vec<String>,
}

impl BreakglassRequestStatus {
    /// The most recently transitioned condition, i.e. the resource's
    /// current state.
    pub fn latest_condition(&self) -> Option<ConditionType> {
        self.conditions
            .iter()
            .max_by_key(|c| c.last_transition_time.clone())
            .map(|c| c.type_)
    }

    pub fn find_condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
