mod common;

use axum::http::StatusCode;
use axum::routing::get as get_route;
use axum::Router;
use common::get;
use nest_map::api;
use serde_json::json;

async fn explode() -> &'static str {
    panic!("database pool exploded")
}

#[tokio::test]
async fn panicking_handler_answers_with_internal_error_envelope() {
    let app = api::with_outer_layers(Router::new().route("/boom", get_route(explode)));
    let res = get(&app, "/boom", None).await;

    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body["ok"], json!(false));
    assert_eq!(res.body["error"]["code"], json!("INTERNAL_ERROR"));
    assert!(!String::from_utf8_lossy(&res.raw).contains("pool exploded"));
}

#[tokio::test]
async fn service_keeps_answering_after_a_panic() {
    let app = api::with_outer_layers(
        Router::new()
            .route("/boom", get_route(explode))
            .route("/ok", get_route(|| async { "fine" })),
    );

    assert_eq!(get(&app, "/boom", None).await.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(get(&app, "/ok", None).await.status, StatusCode::OK);
}
