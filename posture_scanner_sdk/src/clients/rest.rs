//! HTTP vendor client for JSON REST APIs.
//!
//! Each service maps to a base URL. Requests are plain `GET`s:
//!
//! | strategy | path |
//! |---|---|
//! | list | `{base}/{account}/{region}/{resource}` |
//! | aggregated list | `{base}/{account}/aggregated/{resource}` |
//! | get | `{base}/{account}/{region}/{resource}/{ref}` |
//! | IAM policy | `{base}/{account}/{region}/{resource}/{ref}/iamPolicy` |
//!
//! A reference that already is an absolute URL is fetched as is. Call
//! parameters become query parameters. 429, 5xx, timeouts and connection
//! failures are transient; every other failure is fatal.

use posture_scanner_base::client::{VendorClient, VendorRequest};
use posture_scanner_base::error::VendorError;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Longest response body excerpt carried in an error message
const BODY_EXCERPT: usize = 512;

/// Request flavour, selects the URL shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    List,
    AggregatedList,
    Get,
    IamPolicy,
}

pub struct RestClient {
    http: Client,
    endpoints: BTreeMap<String, String>,
    token: Option<String>,
    id: String,
}

impl RestClient {
    pub fn new(
        endpoints: BTreeMap<String, String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("posture-scanner/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            id: format!("rest:{}", endpoints.keys().cloned().collect::<Vec<_>>().join(",")),
            endpoints,
            token,
        })
    }

    fn url(&self, route: Route, request: &VendorRequest) -> Result<Url, VendorError> {
        if let Some(reference) = &request.resource_ref {
            if is_absolute(reference) {
                if let Some(url) = absolute_url(route, reference, request)? {
                    return Ok(url);
                }
            }
        }

        let base = self.endpoints.get(&request.service).ok_or_else(|| {
            VendorError::fatal(
                &request.action,
                format!("no endpoint configured for service '{}'", request.service),
            )
        })?;
        build_url(base, route, request)
    }

    fn fetch(&self, route: Route, request: &VendorRequest) -> Result<Value, VendorError> {
        let url = self.url(route, request)?;
        log::debug!("GET {}", url);

        let mut builder = self.http.get(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                VendorError::transient(&request.action, e.to_string())
            } else {
                VendorError::fatal(&request.action, e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(&request.action, status, &body));
        }

        response
            .json::<Value>()
            .map_err(|e| VendorError::fatal(&request.action, format!("invalid JSON response: {}", e)))
    }
}

fn is_absolute(reference: &str) -> bool {
    reference.starts_with("https://") || reference.starts_with("http://")
}

/// URL for a reference that already is a resource URL, e.g. a `selfLink`
fn absolute_url(
    route: Route,
    reference: &str,
    request: &VendorRequest,
) -> Result<Option<Url>, VendorError> {
    let mut url =
        Url::parse(reference).map_err(|e| VendorError::fatal(&request.action, e.to_string()))?;
    match route {
        Route::Get => Ok(Some(url)),
        Route::IamPolicy => {
            url.path_segments_mut()
                .map_err(|_| {
                    VendorError::fatal(
                        &request.action,
                        format!("reference '{}' cannot be a base URL", reference),
                    )
                })?
                .pop_if_empty()
                .push("iamPolicy");
            Ok(Some(url))
        }
        Route::List | Route::AggregatedList => Ok(None),
    }
}

fn build_url(base: &str, route: Route, request: &VendorRequest) -> Result<Url, VendorError> {
    let mut url = Url::parse(base).map_err(|e| {
        VendorError::fatal(&request.action, format!("invalid endpoint '{}': {}", base, e))
    })?;
    let reference = || {
        request.resource_ref.as_deref().ok_or_else(|| {
            VendorError::fatal(&request.action, "request has no resource reference")
        })
    };

    let mut segments: Vec<&str> = vec![request.account.as_str()];
    match route {
        Route::List => segments.extend([request.region.as_str(), request.resource.as_str()]),
        Route::AggregatedList => segments.extend(["aggregated", request.resource.as_str()]),
        Route::Get => {
            segments.extend([request.region.as_str(), request.resource.as_str(), reference()?])
        }
        Route::IamPolicy => segments.extend([
            request.region.as_str(),
            request.resource.as_str(),
            reference()?,
            "iamPolicy",
        ]),
    }

    url.path_segments_mut()
        .map_err(|_| VendorError::fatal(&request.action, format!("endpoint '{}' cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);

    let query: Vec<(String, String)> = request
        .params
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| match value {
            Value::String(s) => (name.clone(), s.clone()),
            other => (name.clone(), other.to_string()),
        })
        .collect();
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

fn classify_status(operation: &str, status: StatusCode, body: &str) -> VendorError {
    let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
    let message = if excerpt.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, excerpt)
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        VendorError::transient(operation, message)
    } else {
        VendorError::fatal(operation, message)
    }
}

impl VendorClient for RestClient {
    fn list(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        self.fetch(Route::List, request)
    }

    fn aggregated_list(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        self.fetch(Route::AggregatedList, request)
    }

    fn get(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        self.fetch(Route::Get, request)
    }

    fn get_iam_policy(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        self.fetch(Route::IamPolicy, request)
    }

    fn client_id(&self) -> &str {
        &self.id
    }
}
