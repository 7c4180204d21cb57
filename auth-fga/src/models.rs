use crate::{duration, error::FgaError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Relation linking a child resource to its parent
pub const PARENT_RELATION: &str = "parent";

/// Condition attached to time-boxed grants
pub const TEMPORARY_GRANT_CONDITION: &str = "temporary_user_grant";

pub const GRANT_TIME_KEY: &str = "grant_time";
pub const GRANT_DURATION_KEY: &str = "grant_duration";
pub const CURRENT_TIME_KEY: &str = "current_time";

/// Request context passed to the engine for condition evaluation
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Formats a timestamp the way the engine's `timestamp` parameter type expects
pub fn engine_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds the evaluation context stamped with `now`
pub fn current_time_context(now: DateTime<Utc>) -> Context {
    let mut context = Context::new();
    context.insert(CURRENT_TIME_KEY.to_string(), engine_timestamp(now).into());
    context
}

/// Object type tags known to the authorization model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    User,
    Account,
    Workspace,
    PpgPolicy,
    CmpConfiguration,
}

impl ObjectType {
    /// Resource types in enumeration order
    pub const RESOURCES: [ObjectType; 4] = [
        ObjectType::Account,
        ObjectType::Workspace,
        ObjectType::PpgPolicy,
        ObjectType::CmpConfiguration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Account => "Account",
            Self::Workspace => "Workspace",
            Self::PpgPolicy => "PpgPolicy",
            Self::CmpConfiguration => "CmpConfiguration",
        }
    }

    /// The only type allowed as `parent` of this type, if any
    pub fn parent_type(self) -> Option<ObjectType> {
        match self {
            Self::Workspace => Some(Self::Account),
            Self::PpgPolicy | Self::CmpConfiguration => Some(Self::Workspace),
            Self::User | Self::Account => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = FgaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Account" => Ok(Self::Account),
            "Workspace" => Ok(Self::Workspace),
            "PpgPolicy" => Ok(Self::PpgPolicy),
            "CmpConfiguration" => Ok(Self::CmpConfiguration),
            other => Err(FgaError::UnknownResourceType(other.to_string())),
        }
    }
}

/// A typed engine object, rendered as `Type:Id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: ObjectType,
    pub id: String,
}

impl ObjectRef {
    pub fn new(object_type: ObjectType, id: &str) -> Self {
        Self {
            object_type,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.id)
    }
}

impl FromStr for ObjectRef {
    type Err = FgaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_type, id) = s
            .split_once(':')
            .ok_or_else(|| FgaError::InvalidObjectRef(s.to_string()))?;
        if id.is_empty() {
            return Err(FgaError::InvalidObjectRef(s.to_string()));
        }
        Ok(Self::new(object_type.parse()?, id))
    }
}

/// Maps a domain entity to its engine object
pub trait FgaObject {
    fn object_type(&self) -> ObjectType;

    fn object_id(&self) -> &str;

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.object_type(), self.object_id())
    }
}

/// A human or service actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    id: String,
}

impl Principal {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FgaObject for Principal {
    fn object_type(&self) -> ObjectType {
        ObjectType::User
    }

    fn object_id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_ref())
    }
}

/// Protected resource in the account hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    Account(String),
    Workspace(String),
    Policy(String),
    Configuration(String),
}

impl Resource {
    pub fn account(id: &str) -> Self {
        Self::Account(id.to_string())
    }

    pub fn workspace(id: &str) -> Self {
        Self::Workspace(id.to_string())
    }

    pub fn policy(id: &str) -> Self {
        Self::Policy(id.to_string())
    }

    pub fn configuration(id: &str) -> Self {
        Self::Configuration(id.to_string())
    }
}

impl FgaObject for Resource {
    fn object_type(&self) -> ObjectType {
        match self {
            Self::Account(_) => ObjectType::Account,
            Self::Workspace(_) => ObjectType::Workspace,
            Self::Policy(_) => ObjectType::PpgPolicy,
            Self::Configuration(_) => ObjectType::CmpConfiguration,
        }
    }

    fn object_id(&self) -> &str {
        match self {
            Self::Account(id)
            | Self::Workspace(id)
            | Self::Policy(id)
            | Self::Configuration(id) => id,
        }
    }
}

impl TryFrom<ObjectRef> for Resource {
    type Error = FgaError;

    fn try_from(object: ObjectRef) -> Result<Self, Self::Error> {
        match object.object_type {
            ObjectType::Account => Ok(Self::Account(object.id)),
            ObjectType::Workspace => Ok(Self::Workspace(object.id)),
            ObjectType::PpgPolicy => Ok(Self::Policy(object.id)),
            ObjectType::CmpConfiguration => Ok(Self::Configuration(object.id)),
            ObjectType::User => Err(FgaError::UnknownResourceType(format!(
                "{} is a principal, not a resource",
                object
            ))),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_ref())
    }
}

/// Roles a principal can hold on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Editor,
    Reader,
    Reviewer,
}

impl Role {
    /// Roles in descending privilege order
    pub const ALL: [Role; 4] = [Role::Admin, Role::Editor, Role::Reader, Role::Reviewer];

    /// Engine relation name for this role
    pub fn relation(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Reader => "reader",
            Self::Reviewer => "reviewer",
        }
    }

    pub fn from_relation(relation: &str) -> Result<Self, FgaError> {
        Self::ALL
            .into_iter()
            .find(|role| role.relation() == relation)
            .ok_or_else(|| FgaError::InvalidRole(relation.to_string()))
    }
}

impl TryFrom<u8> for Role {
    type Error = FgaError;

    fn try_from(discriminant: u8) -> Result<Self, Self::Error> {
        match discriminant {
            0 => Ok(Self::Admin),
            1 => Ok(Self::Editor),
            2 => Ok(Self::Reader),
            3 => Ok(Self::Reviewer),
            other => Err(FgaError::InvalidRole(other.to_string())),
        }
    }
}

impl FromStr for Role {
    type Err = FgaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_relation(&s.to_ascii_lowercase())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.relation())
    }
}

/// Identity of a stored tuple, conditions excluded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    pub user: String,
    pub relation: String,
    pub object: String,
}

impl TupleKey {
    pub fn new(user: &ObjectRef, relation: &str, object: &ObjectRef) -> Self {
        Self {
            user: user.to_string(),
            relation: relation.to_string(),
            object: object.to_string(),
        }
    }

    pub fn grant(principal: &Principal, role: Role, resource: &Resource) -> Self {
        Self::new(&principal.object_ref(), role.relation(), &resource.object_ref())
    }

    pub fn parent(child: &Resource, parent: &Resource) -> Self {
        Self::new(&parent.object_ref(), PARENT_RELATION, &child.object_ref())
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.user, self.relation, self.object)
    }
}

/// Named condition with its stored parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    #[serde(default)]
    pub context: Context,
}

impl Condition {
    /// Time-boxed grant window starting at `grant_time`
    pub fn temporary_grant(grant_time: DateTime<Utc>, window: Duration) -> Self {
        let mut context = Context::new();
        context.insert(GRANT_TIME_KEY.to_string(), engine_timestamp(grant_time).into());
        context.insert(GRANT_DURATION_KEY.to_string(), duration::encode(window).into());
        Self {
            name: TEMPORARY_GRANT_CONDITION.to_string(),
            context,
        }
    }
}

/// A tuple to write, with its optional condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleWrite {
    pub key: TupleKey,
    pub condition: Option<Condition>,
}

impl TupleWrite {
    pub fn permanent(key: TupleKey) -> Self {
        Self { key, condition: None }
    }

    pub fn conditioned(key: TupleKey, condition: Condition) -> Self {
        Self {
            key,
            condition: Some(condition),
        }
    }
}

/// A tuple as returned by `Read`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTuple {
    pub key: TupleKey,
    pub condition: Option<Condition>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Filter for `Read`; unset fields act as wildcards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadFilter {
    pub user: Option<String>,
    pub relation: Option<String>,
    pub object: Option<String>,
}

impl ReadFilter {
    pub fn exact(key: &TupleKey) -> Self {
        Self {
            user: Some(key.user.clone()),
            relation: Some(key.relation.clone()),
            object: Some(key.object.clone()),
        }
    }

    pub fn object(object: &ObjectRef) -> Self {
        Self {
            object: Some(object.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, key: &TupleKey) -> bool {
        self.user.as_ref().map_or(true, |u| *u == key.user)
            && self.relation.as_ref().map_or(true, |r| *r == key.relation)
            && self.object.as_ref().map_or(true, |o| *o == key.object)
    }
}

/// Outcome of a bounded access check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessDecision {
    Granted,
    Denied,
    /// No answer within the deadline, or the engine failed
    Unknown,
}

impl AccessDecision {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }

    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Granted => Some(true),
            Self::Denied => Some(false),
            Self::Unknown => None,
        }
    }
}

impl From<bool> for AccessDecision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => f.write_str("granted"),
            Self::Denied => f.write_str("denied"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// A resource reachable by a principal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAccess {
    pub resource: ObjectRef,
    pub role: Role,
    pub is_direct: bool,
}

/// A principal with access to a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserAccess {
    pub principal: Principal,
    pub relation: String,
    pub is_direct: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_relation_bijection() {
        for role in Role::ALL {
            assert_eq!(Role::from_relation(role.relation()).unwrap(), role);
        }
        let relations: std::collections::HashSet<_> =
            Role::ALL.iter().map(|r| r.relation()).collect();
        assert_eq!(relations.len(), Role::ALL.len());
    }

    #[test]
    fn test_fifth_discriminant_is_invalid_role() {
        assert_eq!(Role::try_from(1).unwrap(), Role::Editor);
        assert!(matches!(Role::try_from(4), Err(FgaError::InvalidRole(_))));
        assert!(matches!("owner".parse::<Role>(), Err(FgaError::InvalidRole(_))));
        assert_eq!("Reviewer".parse::<Role>().unwrap(), Role::Reviewer);
    }

    #[test]
    fn test_resource_type_tags() {
        assert_eq!(Resource::policy("1a").object_ref().to_string(), "PpgPolicy:1a");
        assert_eq!(
            Resource::configuration("2b").object_ref().to_string(),
            "CmpConfiguration:2b"
        );
        assert_eq!(Principal::new("Bob").to_string(), "User:Bob");
        assert_eq!(Resource::workspace("1").object_type().parent_type(), Some(ObjectType::Account));
    }

    #[test]
    fn test_object_ref_parsing() {
        let object: ObjectRef = "Workspace:1".parse().unwrap();
        assert_eq!(object, Resource::workspace("1").object_ref());

        assert!(matches!(
            "Folder:1".parse::<ObjectRef>(),
            Err(FgaError::UnknownResourceType(_))
        ));
        assert!(matches!("Account".parse::<ObjectRef>(), Err(FgaError::InvalidObjectRef(_))));
        assert!(Resource::try_from(Principal::new("Bob").object_ref()).is_err());
    }

    #[test]
    fn test_parent_key_points_from_parent_to_child() {
        let key = TupleKey::parent(&Resource::workspace("1"), &Resource::account("1"));
        assert_eq!(key.to_string(), "Account:1 parent Workspace:1");
    }

    #[test]
    fn test_temporary_grant_condition() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let condition = Condition::temporary_grant(at, Duration::from_secs(90 * 60));
        assert_eq!(condition.name, TEMPORARY_GRANT_CONDITION);
        assert_eq!(condition.context[GRANT_DURATION_KEY], "1h");
        assert_eq!(condition.context[GRANT_TIME_KEY], "2024-05-01T10:00:00.000Z");
    }

    #[test]
    fn test_access_decision_tri_state() {
        assert_eq!(AccessDecision::from(true), AccessDecision::Granted);
        assert_eq!(AccessDecision::Unknown.as_option(), None);
        assert!(!AccessDecision::Unknown.is_granted());
    }
}
