//! # Action Descriptors
//!
//! Action names in the catalog follow strict naming patterns. They are parsed
//! once at load time into a closed set of dispatch strategies, so an unknown
//! shape is rejected before a scan starts rather than when the call is made.

use crate::error::DispatchError;
use std::fmt;
use std::str::FromStr;

const EVAL: &str = "eval";
const LIST_PREFIX: &str = "list_";
const AGGREGATED_LIST_PREFIX: &str = "aggregatedList_";
const GET_PREFIX: &str = "get_";
const IAM_POLICY_SUFFIX: &str = "_iam_policy";

/// Typed dispatch strategy for a catalog action
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionDescriptor {
    /// `list_<resource>`: collection listing scoped to the account/region
    List { resource: String },
    /// `aggregatedList_<resource>`: collection listing across all regions
    AggregatedList { resource: String },
    /// `get_<resource>`: fetch one resource by reference
    Get { resource: String },
    /// `get_<resource>_iam_policy`: fetch the IAM policy of one resource
    IamPolicy { resource: String },
    /// `eval`: no vendor call; evaluates params against already-fetched data
    Eval,
}

impl ActionDescriptor {
    /// Parse an action name into a descriptor
    pub fn parse(action: &str) -> Result<Self, DispatchError> {
        let action = action.trim();

        if action == EVAL {
            return Ok(ActionDescriptor::Eval);
        }

        if let Some(resource) = action.strip_prefix(AGGREGATED_LIST_PREFIX) {
            let resource = validate_resource(action, resource)?;
            return Ok(ActionDescriptor::AggregatedList { resource });
        }

        if let Some(resource) = action.strip_prefix(LIST_PREFIX) {
            let resource = validate_resource(action, resource)?;
            return Ok(ActionDescriptor::List { resource });
        }

        if let Some(rest) = action.strip_prefix(GET_PREFIX) {
            if let Some(resource) = rest.strip_suffix(IAM_POLICY_SUFFIX) {
                let resource = validate_resource(action, resource)?;
                return Ok(ActionDescriptor::IamPolicy { resource });
            }
            let resource = validate_resource(action, rest)?;
            return Ok(ActionDescriptor::Get { resource });
        }

        Err(DispatchError::UnrecognizedAction {
            action: action.to_string(),
        })
    }

    /// Resource name the action operates on, if any
    pub fn resource(&self) -> Option<&str> {
        match self {
            ActionDescriptor::List { resource }
            | ActionDescriptor::AggregatedList { resource }
            | ActionDescriptor::Get { resource }
            | ActionDescriptor::IamPolicy { resource } => Some(resource),
            ActionDescriptor::Eval => None,
        }
    }

    /// Short strategy name used in logs and fixture lookups
    pub fn kind(&self) -> &'static str {
        match self {
            ActionDescriptor::List { .. } => "list",
            ActionDescriptor::AggregatedList { .. } => "aggregatedList",
            ActionDescriptor::Get { .. } => "get",
            ActionDescriptor::IamPolicy { .. } => "iam_policy",
            ActionDescriptor::Eval => "eval",
        }
    }

    /// Whether the action reaches out to the vendor API
    pub fn is_remote(&self) -> bool {
        !matches!(self, ActionDescriptor::Eval)
    }
}

impl FromStr for ActionDescriptor {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionDescriptor::parse(s)
    }
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionDescriptor::List { resource } => write!(f, "{}{}", LIST_PREFIX, resource),
            ActionDescriptor::AggregatedList { resource } => {
                write!(f, "{}{}", AGGREGATED_LIST_PREFIX, resource)
            }
            ActionDescriptor::Get { resource } => write!(f, "{}{}", GET_PREFIX, resource),
            ActionDescriptor::IamPolicy { resource } => {
                write!(f, "{}{}{}", GET_PREFIX, resource, IAM_POLICY_SUFFIX)
            }
            ActionDescriptor::Eval => write!(f, "{}", EVAL),
        }
    }
}

fn validate_resource(action: &str, resource: &str) -> Result<String, DispatchError> {
    let valid = !resource.is_empty()
        && !resource.starts_with('_')
        && !resource.ends_with('_')
        && resource
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(resource.to_string())
    } else {
        Err(DispatchError::InvalidResource {
            action: action.to_string(),
            resource: resource.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_list_actions() {
        assert_eq!(
            ActionDescriptor::parse("list_firewalls").unwrap(),
            ActionDescriptor::List {
                resource: "firewalls".to_string()
            }
        );
        assert_eq!(
            ActionDescriptor::parse("aggregatedList_instances").unwrap(),
            ActionDescriptor::AggregatedList {
                resource: "instances".to_string()
            }
        );
    }

    #[test]
    fn test_get_and_iam_policy() {
        assert_eq!(
            ActionDescriptor::parse("get_buckets_iam_policy").unwrap(),
            ActionDescriptor::IamPolicy {
                resource: "buckets".to_string()
            }
        );
        assert_eq!(
            ActionDescriptor::parse("get_ssl_policies").unwrap(),
            ActionDescriptor::Get {
                resource: "ssl_policies".to_string()
            }
        );
    }

    #[test]
    fn test_eval() {
        let action = ActionDescriptor::parse("eval").unwrap();
        assert_eq!(action, ActionDescriptor::Eval);
        assert!(!action.is_remote());
        assert_eq!(action.kind(), "eval");
        assert_eq!(action.resource(), None);
    }

    #[test]
    fn test_unrecognized_actions() {
        assert_matches!(
            ActionDescriptor::parse("describe_instances"),
            Err(DispatchError::UnrecognizedAction { .. })
        );
        assert_matches!(
            ActionDescriptor::parse("list_"),
            Err(DispatchError::InvalidResource { .. })
        );
        assert_matches!(
            ActionDescriptor::parse("get__iam_policy"),
            Err(DispatchError::InvalidResource { .. })
        );
        assert_matches!(
            ActionDescriptor::parse("list_bad-name"),
            Err(DispatchError::InvalidResource { .. })
        );
    }

    #[test]
    fn test_display_roundtrips_name() {
        for name in [
            "list_networks",
            "aggregatedList_disks",
            "get_buckets_iam_policy",
            "get_projects",
            "eval",
        ] {
            assert_eq!(ActionDescriptor::parse(name).unwrap().to_string(), name);
        }
    }
}
