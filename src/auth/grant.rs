//! Grants: a permission key plus the minimum access level an action needs.

use crate::config::{Operation, ResourceAction};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Ordered: a grant at one level implies every level below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    View = 1,
    Add = 2,
    Edit = 3,
    Delete = 4,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::View => "view",
            AccessLevel::Add => "add",
            AccessLevel::Edit => "edit",
            AccessLevel::Delete => "delete",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "view" => Ok(AccessLevel::View),
            "add" => Ok(AccessLevel::Add),
            "edit" => Ok(AccessLevel::Edit),
            "delete" => Ok(AccessLevel::Delete),
            other => Err(format!("unknown access level: {}", other)),
        }
    }
}

pub fn required_level(op: Operation) -> AccessLevel {
    match op {
        Operation::Grid | Operation::List | Operation::Read | Operation::RelatedInfo => AccessLevel::View,
        Operation::Create => AccessLevel::Add,
        Operation::Update | Operation::Reorder => AccessLevel::Edit,
        Operation::Delete | Operation::DeleteBulk => AccessLevel::Delete,
    }
}

pub fn action_level(action: ResourceAction) -> AccessLevel {
    match action {
        ResourceAction::Restore => AccessLevel::Delete,
        ResourceAction::Move | ResourceAction::Recalculate => AccessLevel::Edit,
    }
}

/// Who is calling.
#[derive(Clone, Debug)]
pub enum Principal {
    /// Authentication disabled: every grant is held.
    System,
    User {
        user_id: i64,
        username: String,
        is_admin: bool,
        grants: HashMap<String, AccessLevel>,
    },
}

impl Principal {
    pub fn allows(&self, key: &str, level: AccessLevel) -> bool {
        match self {
            Principal::System => true,
            Principal::User { is_admin: true, .. } => true,
            Principal::User { grants, .. } => grants.get(key).map(|held| *held >= level).unwrap_or(false),
        }
    }

    pub fn require(&self, key: &str, level: AccessLevel) -> Result<(), AppError> {
        if self.allows(key, level) {
            return Ok(());
        }
        if let Principal::User { username, .. } = self {
            tracing::warn!(user = %username, grant = %key, level = level.as_str(), "grant denied");
        }
        Err(AppError::Forbidden(format!("{} access to {} required", level.as_str(), key)))
    }
}

/// Role `grants` column: `{"<key>": "<level>"}`. Unknown levels are skipped.
pub fn parse_grants(v: &Value) -> HashMap<String, AccessLevel> {
    v.as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, lvl)| lvl.as_str()?.parse::<AccessLevel>().ok().map(|l| (k.clone(), l)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(grants: Value, is_admin: bool) -> Principal {
        Principal::User {
            user_id: 1,
            username: "nurse".into(),
            is_admin,
            grants: parse_grants(&grants),
        }
    }

    #[test]
    fn levels_are_ordered() {
        assert!(AccessLevel::View < AccessLevel::Add);
        assert!(AccessLevel::Add < AccessLevel::Edit);
        assert!(AccessLevel::Edit < AccessLevel::Delete);
    }

    #[test]
    fn higher_grant_implies_lower() {
        let p = user(json!({"persistence-resident-resident": "edit", "junk": "superuser"}), false);
        assert!(p.allows("persistence-resident-resident", AccessLevel::View));
        assert!(p.allows("persistence-resident-resident", AccessLevel::Edit));
        assert!(!p.allows("persistence-resident-resident", AccessLevel::Delete));
        assert!(!p.allows("persistence-facility", AccessLevel::View));
        assert!(!p.allows("junk", AccessLevel::View));
    }

    #[test]
    fn admins_and_system_hold_everything() {
        assert!(user(json!({}), true).allows("anything", AccessLevel::Delete));
        assert!(Principal::System.require("anything", AccessLevel::Delete).is_ok());
    }

    #[test]
    fn operations_map_to_levels() {
        assert_eq!(required_level(Operation::Grid), AccessLevel::View);
        assert_eq!(required_level(Operation::RelatedInfo), AccessLevel::View);
        assert_eq!(required_level(Operation::Create), AccessLevel::Add);
        assert_eq!(required_level(Operation::Reorder), AccessLevel::Edit);
        assert_eq!(required_level(Operation::DeleteBulk), AccessLevel::Delete);
        assert_eq!(action_level(ResourceAction::Restore), AccessLevel::Delete);
        assert_eq!(action_level(ResourceAction::Move), AccessLevel::Edit);
    }

    #[test]
    fn denial_is_forbidden() {
        let err = user(json!({}), false).require("k", AccessLevel::View).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
