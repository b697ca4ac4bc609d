//! # Action Dispatcher
//!
//! Routes a compiled [`ActionDescriptor`] to the matching [`VendorClient`]
//! method. `eval` performs no network call and returns its resolved params,
//! which lets a catalog re-shape data that earlier discoveries fetched.

use crate::client::{VendorClient, VendorRequest};
use crate::error::VendorError;
use crate::retry::{with_retry, RetryConfig};
use posture_catalog::ActionDescriptor;
use serde_json::{Map, Value};

/// Parameter naming the single resource of `get` style actions
pub const RESOURCE_PARAM: &str = "resource";

/// Scan unit coordinates shared by every request of one unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitContext {
    pub provider: String,
    pub service: String,
    pub account: String,
    pub region: String,
}

/// Dispatches actions through a client with retry
pub struct Dispatcher<'c> {
    client: &'c dyn VendorClient,
    retry: RetryConfig,
}

impl<'c> Dispatcher<'c> {
    pub fn new(client: &'c dyn VendorClient, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Build the request for one call
    ///
    /// The resource reference is the `resource` param when present, otherwise
    /// the parent item's resource id.
    pub fn request(
        &self,
        context: &UnitContext,
        action: &ActionDescriptor,
        params: Map<String, Value>,
        parent_resource_id: Option<&str>,
    ) -> VendorRequest {
        let resource_ref = match params.get(RESOURCE_PARAM) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => parent_resource_id.map(str::to_string),
        };

        VendorRequest {
            provider: context.provider.clone(),
            service: context.service.clone(),
            account: context.account.clone(),
            region: context.region.clone(),
            action: action.to_string(),
            resource: action.resource().unwrap_or_default().to_string(),
            params,
            resource_ref,
        }
    }

    /// Execute one action
    pub fn dispatch(
        &self,
        action: &ActionDescriptor,
        request: &VendorRequest,
    ) -> Result<Value, VendorError> {
        if action.is_remote() {
            log::debug!(
                "Dispatching {} ({}) via {} for {}/{}",
                request.action,
                action.kind(),
                self.client.client_id(),
                request.account,
                request.region
            );
        } else {
            log::trace!("Evaluating {} locally", request.action);
        }

        match action {
            ActionDescriptor::Eval => Ok(Value::Object(request.params.clone())),
            ActionDescriptor::List { .. } => {
                with_retry(&self.retry, &request.action, || self.client.list(request))
            }
            ActionDescriptor::AggregatedList { .. } => with_retry(&self.retry, &request.action, || {
                self.client.aggregated_list(request)
            }),
            ActionDescriptor::Get { .. } => {
                self.require_ref(request)?;
                with_retry(&self.retry, &request.action, || self.client.get(request))
            }
            ActionDescriptor::IamPolicy { .. } => {
                self.require_ref(request)?;
                with_retry(&self.retry, &request.action, || {
                    self.client.get_iam_policy(request)
                })
            }
        }
    }

    fn require_ref(&self, request: &VendorRequest) -> Result<(), VendorError> {
        if request.resource_ref.is_some() {
            Ok(())
        } else {
            Err(VendorError::fatal(
                &request.action,
                "no resource reference: set the 'resource' param or iterate with for_each",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::MockClient;
    use serde_json::json;

    fn context() -> UnitContext {
        UnitContext {
            provider: "gcp".to_string(),
            service: "storage".to_string(),
            account: "proj-1".to_string(),
            region: "global".to_string(),
        }
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_list_routes_to_client() {
        let client = MockClient::new().respond("list_buckets", json!({"items": []}));
        let dispatcher = Dispatcher::new(&client, RetryConfig::immediate(1));
        let action = ActionDescriptor::parse("list_buckets").unwrap();
        let request = dispatcher.request(&context(), &action, Map::new(), None);

        assert_eq!(request.resource, "buckets");
        assert_eq!(dispatcher.dispatch(&action, &request).unwrap(), json!({"items": []}));
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn test_iam_policy_uses_parent_resource() {
        let client = MockClient::new().respond("get_buckets_iam_policy/b1", json!({"bindings": []}));
        let dispatcher = Dispatcher::new(&client, RetryConfig::immediate(1));
        let action = ActionDescriptor::parse("get_buckets_iam_policy").unwrap();

        let request = dispatcher.request(&context(), &action, Map::new(), Some("b1"));
        assert_eq!(request.resource_ref.as_deref(), Some("b1"));
        assert!(dispatcher.dispatch(&action, &request).is_ok());

        let explicit = dispatcher.request(&context(), &action, params(json!({"resource": "b9"})), Some("b1"));
        assert_eq!(explicit.resource_ref.as_deref(), Some("b9"));
    }

    #[test]
    fn test_get_without_reference_is_fatal() {
        let client = MockClient::new();
        let dispatcher = Dispatcher::new(&client, RetryConfig::immediate(3));
        let action = ActionDescriptor::parse("get_buckets").unwrap();
        let request = dispatcher.request(&context(), &action, Map::new(), None);
        let err = dispatcher.dispatch(&action, &request).unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn test_eval_makes_no_call() {
        let client = MockClient::new();
        let dispatcher = Dispatcher::new(&client, RetryConfig::immediate(1));
        let action = ActionDescriptor::Eval;
        let request = dispatcher.request(&context(), &action, params(json!({"count": 3})), None);
        assert_eq!(dispatcher.dispatch(&action, &request).unwrap(), json!({"count": 3}));
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let client = MockClient::new().respond_seq(
            "list_buckets",
            vec![
                Err(VendorError::transient("list_buckets", "429")),
                Ok(json!([])),
            ],
        );
        let dispatcher = Dispatcher::new(&client, RetryConfig::immediate(3));
        let action = ActionDescriptor::parse("list_buckets").unwrap();
        let request = dispatcher.request(&context(), &action, Map::new(), None);
        assert_eq!(dispatcher.dispatch(&action, &request).unwrap(), json!([]));
        assert_eq!(client.call_count(), 2);
    }
}
