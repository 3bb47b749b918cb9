#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use nest_map::api::{self, auth, AppState};
use nest_map::config::AppConfig;
use nest_map::models::{Anchor, ConversationThread, IntentFlags, PropertyRecord};
use nest_map::store::{InMemoryStore, SeedData};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const SECRET: &str = "test-secret";
/// Covers central Newcastle; `p-far` in London lies outside it
pub const NEWCASTLE_BBOX: &str = "-1.70,54.90,-1.50,55.05";

fn property(
    id: &str,
    lat: f64,
    lon: f64,
    owner: Option<&str>,
    intent: IntentFlags,
) -> PropertyRecord {
    PropertyRecord {
        id: id.to_string(),
        lat,
        lon,
        postcode: Some("NE1 1AA".to_string()),
        street: Some("Grey Street".to_string()),
        house_number: None,
        display_label: Some(format!("{id} label")),
        is_claimed: Some(owner.is_some()),
        claimed_by_user_id: owner.map(str::to_string),
        intent,
    }
}

fn anchor(id: &str, anchor_type: &str, lat: f64, lon: f64) -> Anchor {
    Anchor {
        id: id.to_string(),
        name: format!("{id} name"),
        anchor_type: anchor_type.to_string(),
        lat,
        lon,
    }
}

fn thread(id: &str, property: &str, owner: &str, viewer: &str, minute: u32) -> ConversationThread {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
    ConversationThread {
        id: id.to_string(),
        property_id: property.to_string(),
        owner_user_id: owner.to_string(),
        viewer_user_id: viewer.to_string(),
        created_at: at,
        updated_at: at,
        last_message_at: Some(at),
        last_message_preview: Some("Hello".to_string()),
    }
}

pub fn seed() -> SeedData {
    SeedData {
        properties: vec![
            property("p-free", 54.9780, -1.6170, None, IntentFlags::default()),
            property(
                "p-sale",
                54.9790,
                -1.6180,
                Some("owner-1"),
                IntentFlags {
                    is_for_sale: Some(true),
                    settled: Some(true),
                    ..IntentFlags::default()
                },
            ),
            property(
                "p-settled",
                54.9800,
                -1.6190,
                Some("owner-2"),
                IntentFlags {
                    settled: Some(true),
                    ..IntentFlags::default()
                },
            ),
            property("p-far", 51.5074, -0.1278, None, IntentFlags::default()),
        ],
        anchors: vec![
            anchor("school-1", "primary_school", 54.9795, -1.6185),
            anchor("school-2", "school", 54.9850, -1.6250),
            anchor("bus-1", "bus_stop", 54.9788, -1.6176),
            anchor("church-far", "church", 55.0500, -1.6000),
        ],
        threads: vec![
            thread("t-old", "p-sale", "owner-1", "viewer-1", 5),
            thread("t-new", "p-sale", "owner-1", "viewer-1", 30),
        ],
    }
}

pub fn config() -> AppConfig {
    AppConfig {
        jwt_secret: SECRET.to_string(),
        request_timeout_secs: 2,
        ..AppConfig::default()
    }
}

pub fn app() -> (Router, Arc<InMemoryStore>) {
    app_with(seed())
}

pub fn app_with(seed: SeedData) -> (Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::from_seed(seed));
    let state = AppState::new(store.clone(), &config()).unwrap();
    (api::router(state), store)
}

pub fn token(user_id: &str) -> String {
    auth::create_token(user_id, SECRET, Duration::from_secs(3600)).unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub raw: Vec<u8>,
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("authorization", format!("Bearer {}", token(user)));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let raw = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    let body = serde_json::from_slice(&raw).unwrap_or(Value::Null);

    TestResponse {
        status,
        headers,
        body,
        raw,
    }
}

pub async fn get(app: &Router, uri: &str, user: Option<&str>) -> TestResponse {
    send(app, Method::GET, uri, user, None).await
}

pub async fn post(app: &Router, uri: &str, user: Option<&str>, body: Value) -> TestResponse {
    send(app, Method::POST, uri, user, Some(body)).await
}

pub async fn patch(app: &Router, uri: &str, user: Option<&str>, body: Value) -> TestResponse {
    send(app, Method::PATCH, uri, user, Some(body)).await
}

pub fn ids(body: &Value) -> Vec<String> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_string())
        .collect()
}
