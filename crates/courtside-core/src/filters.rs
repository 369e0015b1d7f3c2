//! Network request/response filters installed on every load
//!
//! Handles:
//! - Routing prefix capture from manifest responses (`x-uplynk-prefix`)
//! - License URI rewriting with the captured prefix
//! - Caller-supplied header injection for license and manifest/segment requests

use crate::engine::PlaybackEngine;
use crate::types::{HeaderSet, MediaSource};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Manifest response header carrying the routing prefix
pub const ROUTING_PREFIX_HEADER: &str = "x-uplynk-prefix";

/// License URI suffixes rewritten with the routing prefix, in match order
pub const LICENSE_SCHEME_SUFFIXES: [&str; 3] = ["wv", "ck", "pr"];

/// Kind of network operation the engine is performing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Manifest,
    Segment,
    License,
    App,
    Timing,
    ServerCertificate,
}

/// Outgoing request as seen by filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkRequest {
    pub uris: Vec<String>,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
}

impl NetworkRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            uris: vec![uri.into()],
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    pub fn post(uri: impl Into<String>, body: Bytes) -> Self {
        Self {
            uris: vec![uri.into()],
            method: "POST".to_string(),
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Incoming response as seen by filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkResponse {
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub data: Bytes,
}

impl NetworkResponse {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Filter applied to outgoing requests
pub trait RequestFilter: Send + Sync {
    fn filter(&self, request_type: RequestType, request: &mut NetworkRequest);

    fn name(&self) -> &'static str;
}

/// Filter applied to incoming responses
pub trait ResponseFilter: Send + Sync {
    fn filter(&self, request_type: RequestType, response: &mut NetworkResponse);

    fn name(&self) -> &'static str;
}

// =============================================================================
// Routing prefix
// =============================================================================

/// Routing prefix shared between the response capture and the license rewrite.
/// Empty means no prefix is held.
#[derive(Debug, Clone, Default)]
pub struct RoutingPrefix(Arc<RwLock<String>>);

impl RoutingPrefix {
    pub fn get(&self) -> String {
        match self.0.read() {
            Ok(prefix) => prefix.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, value: &str) {
        let mut prefix = match self.0.write() {
            Ok(prefix) => prefix,
            Err(poisoned) => poisoned.into_inner(),
        };
        prefix.clear();
        prefix.push_str(value);
    }

    pub fn reset(&self) {
        self.set("");
    }
}

/// Captures the routing prefix from manifest responses
pub struct RoutingPrefixCapture {
    prefix: RoutingPrefix,
}

impl RoutingPrefixCapture {
    pub fn new(prefix: RoutingPrefix) -> Self {
        Self { prefix }
    }
}

impl ResponseFilter for RoutingPrefixCapture {
    fn filter(&self, request_type: RequestType, response: &mut NetworkResponse) {
        if request_type != RequestType::Manifest {
            return;
        }

        // A manifest without the header clears any previous prefix.
        match response.header(ROUTING_PREFIX_HEADER) {
            Some(value) => {
                debug!(prefix = value, "Routing prefix captured");
                self.prefix.set(value);
            }
            None => self.prefix.reset(),
        }
    }

    fn name(&self) -> &'static str {
        "routing-prefix-capture"
    }
}

/// Rewrites license URIs ending in a scheme suffix to `{prefix}/{suffix}`
pub struct LicenseUriRewrite {
    prefix: RoutingPrefix,
}

impl LicenseUriRewrite {
    pub fn new(prefix: RoutingPrefix) -> Self {
        Self { prefix }
    }
}

impl RequestFilter for LicenseUriRewrite {
    fn filter(&self, request_type: RequestType, request: &mut NetworkRequest) {
        if request_type != RequestType::License {
            return;
        }

        let prefix = self.prefix.get();
        if prefix.is_empty() {
            return;
        }

        let Some(uri) = request.uris.first_mut() else {
            return;
        };

        if let Some(suffix) = LICENSE_SCHEME_SUFFIXES.iter().find(|s| uri.ends_with(*s)) {
            let rewritten = format!("{prefix}/{suffix}");
            debug!(from = %uri, to = %rewritten, "License URI rewritten");
            *uri = rewritten;
        }
    }

    fn name(&self) -> &'static str {
        "license-uri-rewrite"
    }
}

// =============================================================================
// Header injection
// =============================================================================

/// Merges caller headers into matching requests without overriding headers
/// the engine already set
pub struct HeaderInjection {
    name: &'static str,
    applies_to: &'static [RequestType],
    headers: Vec<(String, String)>,
}

impl HeaderInjection {
    /// Headers for license requests
    pub fn license(headers: &HeaderSet) -> Self {
        Self::new("license-headers", &[RequestType::License], headers)
    }

    /// Headers for manifest and segment requests
    pub fn manifest(headers: &HeaderSet) -> Self {
        Self::new(
            "manifest-headers",
            &[RequestType::Manifest, RequestType::Segment],
            headers,
        )
    }

    fn new(name: &'static str, applies_to: &'static [RequestType], headers: &HeaderSet) -> Self {
        // Later duplicates in the caller's set win, first-seen order is kept.
        let mut merged: Vec<(String, String)> = Vec::with_capacity(headers.len());
        for (key, value) in headers {
            match merged.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
                Some(entry) => entry.1 = value.clone(),
                None => merged.push((key.clone(), value.clone())),
            }
        }

        Self {
            name,
            applies_to,
            headers: merged,
        }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

impl RequestFilter for HeaderInjection {
    fn filter(&self, request_type: RequestType, request: &mut NetworkRequest) {
        if !self.applies_to.contains(&request_type) {
            return;
        }

        for (key, value) in &self.headers {
            if request.header(key).is_none() {
                request.headers.insert(key.clone(), value.clone());
            }
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Installs the filter set for one load and owns the routing prefix
#[derive(Debug, Clone, Default)]
pub struct RequestFilterPipeline {
    prefix: RoutingPrefix,
}

impl RequestFilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently held routing prefix (empty if none)
    pub fn routing_prefix(&self) -> String {
        self.prefix.get()
    }

    /// Clear every filter on the engine and install the set for `source`.
    ///
    /// The routing prefix is reset so nothing captured by an earlier load,
    /// failed or not, leaks into this one. Returns the number of request
    /// filters installed.
    pub fn install(&self, engine: &dyn PlaybackEngine, source: &MediaSource) -> usize {
        engine.clear_request_filters();
        engine.clear_response_filters();
        self.prefix.reset();

        engine.register_response_filter(Arc::new(RoutingPrefixCapture::new(self.prefix.clone())));

        let mut request_filters: Vec<Arc<dyn RequestFilter>> =
            vec![Arc::new(LicenseUriRewrite::new(self.prefix.clone()))];

        if let Some(headers) = source.license_headers.as_ref().filter(|h| !h.is_empty()) {
            request_filters.push(Arc::new(HeaderInjection::license(headers)));
        }
        if let Some(headers) = source.manifest_headers.as_ref().filter(|h| !h.is_empty()) {
            request_filters.push(Arc::new(HeaderInjection::manifest(headers)));
        }

        let installed = request_filters.len();
        for filter in request_filters {
            debug!(filter = filter.name(), "Registering request filter");
            engine.register_request_filter(filter);
        }

        installed
    }
}
