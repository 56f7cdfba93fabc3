mod common;

use reqwest::StatusCode;
use serde_json::json;

// ── Health & auth ───────────────────────────────────────────────

#[tokio::test]
async fn health_returns_ok() {
    let app = common::spawn_app().await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn admin_token_is_required_when_configured() {
    let app = common::spawn_app_with_token(Some("s3cret")).await;

    let resp = app
        .client
        .get(app.url("/api/v1/queue/actions"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .client
        .get(app.url("/api/v1/queue/actions"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let (body, status) = app.get("/api/v1/queue/actions").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn actor_header_becomes_created_by() {
    let app = common::spawn_app().await;

    let resp = app
        .client
        .post(app.url("/api/v1/queue/actions"))
        .header("x-actor", "kitchen-panel")
        .json(&json!({
            "action_type": "scene_activation",
            "payload": { "scene_id": "scene.movie_night" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["created_by"], "kitchen-panel");
}

// ── Enqueue ─────────────────────────────────────────────────────

#[tokio::test]
async fn enqueue_applies_type_defaults() {
    let app = common::spawn_app().await;

    let action = app.turn_on("light.kitchen").await;
    assert_eq!(action["status"], "pending");
    assert_eq!(action["priority"], "normal");
    assert_eq!(action["name"], "entity state change");
    assert_eq!(action["target_entity_id"], "light.kitchen");
    assert_eq!(action["timeout_seconds"], 30);
    assert_eq!(action["max_retries"], 3);
    assert_eq!(action["retry_count"], 0);
    assert_eq!(action["created_by"], "system");
}

#[tokio::test]
async fn enqueue_rejects_invalid_requests() {
    let app = common::spawn_app().await;

    let (body, status) = app
        .post(
            "/api/v1/queue/actions",
            &json!({ "action_type": "entity_state_change", "payload": { "entity_id": "light.hall" } }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("state"));

    let (_, status) = app
        .post(
            "/api/v1/queue/actions",
            &json!({ "action_type": "teleport", "payload": {} }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app
        .post(
            "/api/v1/queue/actions",
            &json!({
                "action_type": "scene_activation",
                "priority": "whenever",
                "payload": { "scene_id": "scene.morning" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status) = app
        .post(
            "/api/v1/queue/actions",
            &json!({
                "action_type": "scene_activation",
                "deadline": "2000-01-01T00:00:00Z",
                "payload": { "scene_id": "scene.morning" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (body, _) = app.get("/api/v1/queue/actions").await;
    assert!(body.as_array().unwrap().is_empty(), "rejected requests must not persist");
}

#[tokio::test]
async fn list_filters_by_status_and_priority() {
    let app = common::spawn_app().await;

    app.turn_on("light.one").await;
    app.enqueue(json!({
        "action_type": "notification_send",
        "priority": "urgent",
        "payload": { "message": "Door open" }
    }))
    .await;

    let (body, status) = app.get("/api/v1/queue/actions?priority=urgent,critical").await;
    assert_eq!(status, StatusCode::OK);
    let actions = body.as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["action_type"], "notification_send");

    let (body, _) = app.get("/api/v1/queue/actions?status=pending&order_by=priority").await;
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["priority"], "urgent");

    let (_, status) = app.get("/api/v1/queue/actions?status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Bulk ────────────────────────────────────────────────────────

#[tokio::test]
async fn sequential_bulk_chains_dependencies() {
    let app = common::spawn_app().await;

    let (body, status) = app
        .post(
            "/api/v1/queue/actions/bulk",
            &json!({
                "sequential": true,
                "actions": [
                    { "action_type": "entity_state_change", "payload": { "entity_id": "light.a", "state": "on" } },
                    { "action_type": "entity_state_change", "payload": { "entity_id": "light.b", "state": "on" } }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let correlation_id = body["correlation_id"].as_str().unwrap();
    assert!(correlation_id.starts_with("bulk_"));
    assert_eq!(body["actions"].as_array().unwrap().len(), 2);

    let second = body["actions"][1]["id"].as_i64().unwrap();
    let first = body["actions"][0]["id"].as_i64().unwrap();
    let (detail, _) = app.get(&format!("/api/v1/queue/actions/{second}")).await;
    assert_eq!(detail["correlation_id"], correlation_id);
    assert_eq!(detail["dependencies"][0]["depends_on_action_id"], first);
    assert_eq!(detail["dependencies"][0]["dependency_type"], "completion");
}

#[tokio::test]
async fn bulk_stop_on_error_returns_bad_request() {
    let app = common::spawn_app().await;

    let (body, status) = app
        .post(
            "/api/v1/queue/actions/bulk",
            &json!({
                "stop_on_error": true,
                "actions": [
                    { "action_type": "scene_activation", "payload": { "scene_id": "scene.a" } },
                    { "action_type": "scene_activation", "payload": {} },
                    { "action_type": "scene_activation", "payload": { "scene_id": "scene.c" } }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["aborted"], true);
    assert_eq!(body["actions"].as_array().unwrap().len(), 1);
    assert_eq!(body["failures"][0]["index"], 1);
}

// ── Lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn manual_processing_completes_actions() {
    let app = common::spawn_app().await;
    let action = app.turn_on("light.porch").await;
    let id = action["id"].as_i64().unwrap();

    let (summary, status) = app.post("/api/v1/queue/process", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["executed"], 1);
    assert_eq!(summary["completed"], 1);
    assert_eq!(app.home.call_count(), 1);

    let (detail, _) = app.get(&format!("/api/v1/queue/actions/{id}")).await;
    assert_eq!(detail["status"], "completed");
    assert_eq!(detail["results"].as_array().unwrap().len(), 1);
    assert_eq!(detail["results"][0]["attempt_number"], 1);
}

#[tokio::test]
async fn retryable_failure_is_rescheduled() {
    let app = common::spawn_app().await;
    let action = app.turn_on("busy.dimmer").await;
    let id = action["id"].as_i64().unwrap();

    app.post("/api/v1/queue/process", &json!({})).await;

    let (detail, _) = app.get(&format!("/api/v1/queue/actions/{id}")).await;
    assert_eq!(detail["status"], "retrying");
    assert_eq!(detail["retry_count"], 1);
    assert!(detail["next_retry_at"].is_string());

    // Not due yet, so another pass leaves it alone.
    let (summary, _) = app.post("/api/v1/queue/process", &json!({})).await;
    assert_eq!(summary["executed"], 0);
}

#[tokio::test]
async fn failed_action_can_be_retried() {
    let app = common::spawn_app().await;
    let action = app.turn_on("invalid.lamp").await;
    let id = action["id"].as_i64().unwrap();

    app.post("/api/v1/queue/process", &json!({})).await;
    let (detail, _) = app.get(&format!("/api/v1/queue/actions/{id}")).await;
    assert_eq!(detail["status"], "failed");
    assert_eq!(detail["error_details"]["code"], "INVALID_TARGET");

    let (summary, status) = app
        .post(&format!("/api/v1/queue/actions/{id}/retry"), &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["executed"], 1);
    assert_eq!(app.home.call_count(), 2);

    let (_, status) = app
        .post("/api/v1/queue/actions/9999/retry", &json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_and_delete_respect_status() {
    let app = common::spawn_app().await;
    let id = app.turn_on("light.garage").await["id"].as_i64().unwrap();

    let (body, status) = app
        .post(&format!("/api/v1/queue/actions/{id}/cancel"), &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (_, status) = app
        .post(&format!("/api/v1/queue/actions/{id}/cancel"), &json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (body, status) = app.delete(&format!("/api/v1/queue/actions/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Deleted");

    let (_, status) = app.get(&format!("/api/v1/queue/actions/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_changes_priority_and_rejects_bad_status() {
    let app = common::spawn_app().await;
    let id = app.turn_on("light.den").await["id"].as_i64().unwrap();

    let (body, status) = app
        .put(
            &format!("/api/v1/queue/actions/{id}"),
            &json!({ "priority": "critical", "name": "Den light" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["priority"], "critical");
    assert_eq!(body["name"], "Den light");

    let (_, status) = app
        .put(
            &format!("/api/v1/queue/actions/{id}"),
            &json!({ "status": "completed" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dependency_cycles_are_rejected() {
    let app = common::spawn_app().await;
    let a = app.turn_on("light.a").await["id"].as_i64().unwrap();
    let b = app.turn_on("light.b").await["id"].as_i64().unwrap();

    let (body, status) = app
        .post(
            &format!("/api/v1/queue/actions/{b}/dependencies"),
            &json!({ "depends_on_action_id": a }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["dependency_type"], "completion");

    let (body, status) = app
        .post(
            &format!("/api/v1/queue/actions/{a}/dependencies"),
            &json!({ "depends_on_action_id": b }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("cycle"));
}

// ── Queue administration ────────────────────────────────────────

#[tokio::test]
async fn clear_requires_confirmation() {
    let app = common::spawn_app().await;
    app.turn_on("light.one").await;
    app.turn_on("light.two").await;

    let (_, status) = app.post("/api/v1/queue/clear", &json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (body, status) = app
        .post(
            "/api/v1/queue/clear",
            &json!({ "status": ["pending"], "confirm_clear": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_count"], 2);
}

#[tokio::test]
async fn statistics_reflect_queue_contents() {
    let app = common::spawn_app().await;
    app.turn_on("light.one").await;
    app.turn_on("invalid.two").await;
    app.post("/api/v1/queue/process", &json!({})).await;

    let (stats, status) = app.get("/api/v1/queue/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_actions"], 2);
    assert_eq!(stats["completed_actions"], 1);
    assert_eq!(stats["failed_actions"], 1);
    assert_eq!(stats["success_rate"], 50.0);
    assert_eq!(stats["queue_health"], "healthy");

    let (body, _) = app.get("/api/v1/queue/status").await;
    assert_eq!(body["running"], false);
    assert_eq!(body["statistics"]["total_actions"], 2);
}

#[tokio::test]
async fn health_reports_stopped_processor() {
    let app = common::spawn_app().await;

    let (body, status) = app.get("/api/v1/queue/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["processor_running"], false);

    app.service.start().await.unwrap();
    let (body, status) = app.get("/api/v1/queue/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);

    app.service.stop().await;
}

#[tokio::test]
async fn configured_worker_count_survives_start() {
    let app = common::spawn_app().await;

    app.service.start().await.unwrap();
    let (body, status) = app.get("/api/v1/queue/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_workers"], 2);
    assert_eq!(app.service.processor().settings().worker_count, 2);

    app.service.stop().await;
}

#[tokio::test]
async fn catalogues_list_types_and_priorities() {
    let app = common::spawn_app().await;

    let (types, status) = app.get("/api/v1/queue/types").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(types.as_array().unwrap().len(), 8);

    let (priorities, _) = app.get("/api/v1/queue/priorities").await;
    let names: Vec<&str> = priorities
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["low", "normal", "high", "urgent", "critical"]);
}

#[tokio::test]
async fn settings_update_reports_per_key() {
    let app = common::spawn_app().await;

    let (body, status) = app
        .put(
            "/api/v1/queue/settings",
            &json!({
                "max_concurrent_workers": 8,
                "worker_poll_interval_ms": "5",
                "schema_version": 2
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"].as_array().unwrap().len(), 1);
    assert_eq!(body["updated"][0]["setting"]["value"], "8");
    assert_eq!(body["updated"][0]["effect"], "live");
    assert!(body["errors"]["worker_poll_interval_ms"].is_string());
    assert!(body["errors"]["schema_version"].as_str().unwrap().contains("read-only"));

    let (settings, _) = app.get("/api/v1/queue/settings").await;
    let workers = settings
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["key"] == "max_concurrent_workers")
        .unwrap();
    assert_eq!(workers["value"], "8");
}

#[tokio::test]
async fn event_stream_is_served_as_sse() {
    let app = common::spawn_app().await;

    let resp = app
        .client
        .get(app.url("/api/v1/queue/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
}
