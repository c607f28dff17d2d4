//! Integration tests for the HTTP surface.
//!
//! Requests go through the real router with `tower::ServiceExt::oneshot`;
//! no sockets are bound.

use std::sync::Arc;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{FixedOffset, TimeZone, Utc};
use kiosk::clock::{ManualClock, ScheduleClock};
use kiosk::engine::{EngineSettings, Kiosk};
use kiosk::web::{router, WebState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_app() -> Result<(Router, Arc<Kiosk>)> {
    let clock = Arc::new(ScheduleClock::new(
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 9, 1, 10, 30, 0).unwrap())),
        FixedOffset::east_opt(0).unwrap(),
    ));
    let kiosk = Arc::new(Kiosk::open(None, EngineSettings::default(), clock)?);
    Ok((router(WebState { kiosk: kiosk.clone() }), kiosk))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body)?).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn test_curation_flow_over_http() -> Result<()> {
    let (app, _kiosk) = test_app()?;

    let (status, body) = send(&app, "POST", "/api/themes", Some(json!({"name": "Nature", "cadence_secs": 1800}))).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Nature");
    send(&app, "POST", "/api/themes", Some(json!({"name": "Urban", "cadence_secs": 3600}))).await?;

    for id in ["i1.jpg", "i2.jpg", "i3.jpg", "i4.jpg"] {
        let (status, _) = send(&app, "POST", "/api/items", Some(json!({"id": id}))).await?;
        assert_eq!(status, StatusCode::CREATED);
    }
    for (id, themes) in [
        ("i1.jpg", json!(["Nature"])),
        ("i2.jpg", json!(["Nature"])),
        ("i3.jpg", json!(["Nature", "Urban"])),
        ("i4.jpg", json!(["Urban"])),
    ] {
        let (status, _) = send(&app, "PUT", &format!("/api/items/{}/themes", id), Some(json!({"themes": themes}))).await?;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = send(&app, "POST", "/api/atmospheres", Some(json!({"name": "Evening"}))).await?;
    assert_eq!(status, StatusCode::CREATED);
    send(
        &app,
        "PUT",
        "/api/atmospheres/Evening/themes",
        Some(json!({"themes": ["Nature", "Urban"]})),
    )
    .await?;

    let (status, selector) = send(&app, "POST", "/api/selector", Some(json!({"mode": "atmosphere", "id": "Evening"}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(selector, json!({"mode": "atmosphere", "id": "Evening"}));

    let (status, selection) = send(&app, "GET", "/api/selection", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(selection["snapshot"]["cadence_secs"], 1800);
    assert_eq!(selection["snapshot"]["items"].as_array().map(Vec::len), Some(4));
    assert!(selection.get("changed").is_none());

    let fingerprint = selection["fingerprint"].as_str().unwrap_or_default().to_string();
    let (_, again) = send(&app, "GET", &format!("/api/selection?fingerprint={}", fingerprint), None).await?;
    assert_eq!(again["changed"], false);
    Ok(())
}

#[tokio::test]
async fn test_schedule_slots_are_mirrored_over_http() -> Result<()> {
    let (app, kiosk) = test_app()?;
    kiosk.create_atmosphere("Calm", Some(120))?;

    let (status, body) = send(&app, "PUT", "/api/schedule/periods/8", Some(json!({"atmospheres": ["Calm"]}))).await?;
    assert_eq!(status, StatusCode::OK);
    let periods = body["periods"].as_array().cloned().unwrap_or_default();
    assert_eq!(periods.len(), 12);
    assert_eq!(periods[1]["atmospheres"], json!(["Calm"]));
    assert_eq!(periods[7]["atmospheres"], json!(["Calm"]));

    let (status, body) = send(&app, "PUT", "/api/schedule/periods/13", Some(json!({"atmospheres": []}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = send(&app, "PUT", "/api/schedule/periods/2", Some(json!({"atmospheres": ["Nope"]}))).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
    Ok(())
}

#[tokio::test]
async fn test_backup_and_restore_round_trip() -> Result<()> {
    let (app, kiosk) = test_app()?;
    kiosk.create_theme("Keep", Some(60))?;
    kiosk.ingest_item("keep.jpg")?;

    let (status, backup) = send(&app, "GET", "/api/state", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(backup["themes"]["Keep"].is_object());

    kiosk.delete_theme("Keep")?;
    kiosk.delete_item("keep.jpg")?;
    assert!(kiosk.store().snapshot().graph.themes.get("Keep").is_none());

    let (status, _) = send(&app, "PUT", "/api/state", Some(backup)).await?;
    assert_eq!(status, StatusCode::OK);
    let doc = kiosk.store().snapshot();
    assert!(doc.graph.themes.contains_key("Keep"));
    assert!(doc.graph.items.contains_key("keep.jpg"));
    assert!(doc.graph.themes["All"].protected);
    Ok(())
}

#[tokio::test]
async fn test_log_polling_with_cursor() -> Result<()> {
    let (app, _kiosk) = test_app()?;

    for message in ["booted", "showing i1", "showing i2"] {
        let (status, _) = send(&app, "POST", "/api/log", Some(json!({"message": message, "source": "display"}))).await?;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, tail) = send(&app, "GET", "/api/log?limit=2", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tail["entries"][0]["message"], "showing i1");
    assert_eq!(tail["has_more"], true);

    let (status, page) = send(&app, "GET", "/api/log?cursor=0&limit=2", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["entries"].as_array().map(Vec::len), Some(2));
    assert_eq!(page["entries"][0]["message"], "booted");
    assert_eq!(page["has_more"], true);

    let cursor = page["cursor"].as_u64().unwrap_or_default();
    let (_, rest) = send(&app, "GET", &format!("/api/log?cursor={}", cursor), None).await?;
    assert_eq!(rest["entries"][0]["message"], "showing i2");
    assert_eq!(rest["has_more"], false);

    let (status, body) = send(&app, "POST", "/api/log", Some(json!({"level": "shout", "message": "x"}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
    Ok(())
}

#[tokio::test]
async fn test_health_reports_revision() -> Result<()> {
    let (app, kiosk) = test_app()?;
    kiosk.create_theme("Bump", None)?;

    let (status, health) = send(&app, "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["revision"], kiosk.store().revision());
    Ok(())
}

async fn send_raw(app: &Router, method: &str, uri: &str, body: &str) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?;
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn test_malformed_requests_get_json_errors() -> Result<()> {
    let (app, kiosk) = test_app()?;

    let (status, body) = send(&app, "POST", "/api/commands", Some(json!({"item": "x"}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
    assert!(body["error"].as_str().unwrap_or_default().contains("command"));

    let (status, body) = send_raw(&app, "POST", "/api/commands", "not json").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = send(&app, "PUT", "/api/schedule/periods/300", Some(json!({"atmospheres": []}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = send(&app, "GET", "/api/log?limit=lots", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    kiosk.ingest_item("a.jpg")?;
    let (status, body) = send_raw(&app, "POST", "/api/items/a.jpg/toggle", "{").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
    assert!(kiosk.store().snapshot().graph.items["a.jpg"].enabled);
    Ok(())
}
