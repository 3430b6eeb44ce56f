#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use seniorcare_admin::{app, builtin_catalog, resolve, AppState, MemoryStore, Settings, StorageBackend, ADMIN_PREFIX};
use serde_json::{Map, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Router over a fresh memory store.
pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_auth(false)
    }

    pub fn with_auth(auth_enabled: bool) -> Self {
        let settings = Settings {
            storage: StorageBackend::Memory,
            auth_enabled,
            ..Settings::default()
        };
        let model = resolve(&builtin_catalog().unwrap()).unwrap();
        let state = AppState::new(Arc::new(MemoryStore::new()), model, settings);
        let router = app(state.clone());
        TestApp { state, router }
    }

    pub async fn send(&self, method: Method, path: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
        let uri = if is_common(path) {
            path.to_string()
        } else {
            format!("{}{}", ADMIN_PREFIX, path)
        };
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&b).unwrap())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(Method::GET, path, None, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, path, Some(body), None).await
    }

    pub async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, path, Some(body), None).await
    }

    pub async fn delete(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(Method::DELETE, path, body, None).await
    }

    /// POST and return the new id, failing the test on anything but 201.
    pub async fn create(&self, segment: &str, body: Value) -> i64 {
        let (status, json) = self.post(&format!("/{}", segment), body).await;
        assert_eq!(status, StatusCode::CREATED, "create {} failed: {}", segment, json);
        json["data"]["id"].as_i64().unwrap()
    }

    /// Insert through the service, bypassing HTTP and grants.
    pub async fn seed(&self, resource: &str, body: Value) -> i64 {
        let res = self.state.model.resource(resource).unwrap();
        let map: Map<String, Value> = body.as_object().cloned().unwrap();
        self.state.service().add(res, &map).await.unwrap()
    }
}

fn is_common(path: &str) -> bool {
    ["/health", "/ready", "/version", "/openapi.json"].contains(&path)
}
