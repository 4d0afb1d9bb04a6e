//! Request shape accepted by the Transport: a method, headers and an
//! optional JSON body.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: reqwest::Method,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl RequestSpec {
    pub fn new(method: reqwest::Method) -> Self {
        RequestSpec {
            method,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get() -> Self {
        RequestSpec::new(reqwest::Method::GET)
    }

    pub fn post(body: serde_json::Value) -> Self {
        let mut spec = RequestSpec::new(reqwest::Method::POST);
        spec.body = Some(body);
        spec
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}
