mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{test_app, valid_body, CRON_TOKEN, OPERATOR_TOKEN};
use fiv_match_api::api::app_router;

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn operator(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-verify-token", OPERATOR_TOKEN)
        .header("x-operator-name", "maria");
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = app_router(test_app().state);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn submission_answers_created_with_score() {
    let app = app_router(test_app().state);
    let (status, body) = call(&app, post_json("/api/leads", &valid_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["lead_score"], "high");
    assert_ne!(body["lead_id"], "00000000-0000-0000-0000-000000000000");
}

#[tokio::test]
async fn filtered_submission_looks_accepted() {
    let test = test_app();
    let app = app_router(test.state.clone());
    let mut body = valid_body();
    body["_company"] = json!("bot");

    let (status, response) = call(&app, post_json("/api/leads", &body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(response["success"], true);
    assert_eq!(response["lead_id"], "00000000-0000-0000-0000-000000000000");
    assert_eq!(test.store.lead_count(), 0);
}

#[tokio::test]
async fn malformed_and_invalid_submissions() {
    let app = app_router(test_app().state);

    let request = Request::builder()
        .method("POST")
        .uri("/api/leads")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let mut invalid = valid_body();
    invalid["phone"] = json!("12");
    let (status, body) = call(&app, post_json("/api/leads", &invalid)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["fields"]["phone"].is_string());
}

#[tokio::test]
async fn admin_routes_require_the_operator_token() {
    let app = app_router(test_app().state);

    let request = Request::builder()
        .uri("/api/admin/leads")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/admin/leads")
        .header("x-verify-token", "wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri(format!("/api/admin/leads?token={}", OPERATOR_TOKEN))
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["leads"], json!([]));
}

#[tokio::test]
async fn operator_works_a_lead_through_dispatch() {
    let test = test_app();
    let app = app_router(test.state.clone());

    let (_, created) = call(&app, post_json("/api/leads", &valid_body())).await;
    let lead_id = created["lead_id"].as_str().unwrap().to_string();
    let short = lead_id[..8].to_uppercase();

    let detail_uri = format!("/api/admin/leads/{}", short);
    let (status, detail) = call(&app, operator("GET", &detail_uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["short_id"], short);
    assert_eq!(detail["events"].as_array().unwrap().len(), 2);

    let (status, routing) = call(
        &app,
        operator("GET", &format!("/api/admin/leads/{}/routing", lead_id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(routing["email"], "cluj@partner.ro");

    let (status, clinic) = call(
        &app,
        operator(
            "POST",
            "/api/admin/clinics",
            Some(json!({
                "name": "Clinica Sante",
                "email": "Contact@Sante.ro",
                "cities": ["Cluj-Napoca", " "]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(clinic["email"], "contact@sante.ro");
    assert_eq!(clinic["cities"], json!(["Cluj-Napoca"]));
    let clinic_id = clinic["id"].as_str().unwrap().to_string();

    // assignment needs verification first
    let (status, refused) = call(
        &app,
        operator(
            "POST",
            &format!("/api/admin/leads/{}/assign", lead_id),
            Some(json!({"clinic_id": clinic_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(refused["code"], "not_verified");

    let (status, verified) = call(
        &app,
        operator(
            "POST",
            &format!("/api/admin/leads/{}/verify", lead_id),
            Some(json!({"notes": "confirmed by phone"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["status"], "VERIFIED_READY");
    assert_eq!(verified["tier"], "A");
    assert_eq!(verified["operator_notes"], "confirmed by phone");

    let (status, assigned) = call(
        &app,
        operator(
            "POST",
            &format!("/api/admin/leads/{}/assign", lead_id),
            Some(json!({"clinic_id": clinic_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned["status"], "ASSIGNED");

    let (status, sent) = call(
        &app,
        operator("POST", &format!("/api/admin/leads/{}/send", lead_id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["status"], "SENT_TO_CLINIC");
    assert_eq!(test.email.sent_to("contact@sante.ro").len(), 1);
}

#[tokio::test]
async fn status_route_accepts_only_operator_statuses() {
    let app = app_router(test_app().state);
    let (_, created) = call(&app, post_json("/api/leads", &valid_body())).await;
    let uri = format!("/api/admin/leads/{}/status", created["lead_id"].as_str().unwrap());

    let body = json!({"status": "SENT_TO_CLINIC"});
    let (status, _) = call(&app, operator("POST", &uri, Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, lead) = call(
        &app,
        operator("POST", &uri, Some(json!({"status": "LOW_INTENT_NURTURE"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lead["status"], "LOW_INTENT_NURTURE");
    assert_eq!(lead["nurture_stage"], 1);

    let body = json!({"status": "INVALID"});
    let (status, lead) = call(&app, operator("POST", &uri, Some(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lead["status"], "INVALID");

    let body = json!({"status": "VERIFIED_READY"});
    let (status, refused) = call(&app, operator("POST", &uri, Some(body))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(refused["code"], "terminal_state");
}

#[tokio::test]
async fn clinics_can_be_updated_and_deactivated() {
    let app = app_router(test_app().state);
    let (_, clinic) = call(
        &app,
        operator(
            "POST",
            "/api/admin/clinics",
            Some(json!({"name": "Clinica Est", "email": "est@clinic.ro"})),
        ),
    )
    .await;
    let uri = format!("/api/admin/clinics/{}", clinic["id"].as_str().unwrap());

    let body = json!({"phone": "0264 000 000"});
    let (status, updated) = call(&app, operator("PUT", &uri, Some(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["phone"], "0264 000 000");
    assert_eq!(updated["name"], "Clinica Est");

    let (status, _) = call(&app, operator("PUT", &uri, Some(json!({})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, operator("DELETE", &uri, None)).await;
    assert_eq!(status, StatusCode::OK);

    let active_uri = "/api/admin/clinics?active_only=true";
    let (_, active) = call(&app, operator("GET", active_uri, None)).await;
    assert_eq!(active, json!([]));
    let (_, all) = call(&app, operator("GET", "/api/admin/clinics", None)).await;
    assert_eq!(all.as_array().unwrap().len(), 1);

    let (status, _) = call(
        &app,
        operator("GET", &format!("/api/admin/clinics/{}", uuid::Uuid::new_v4()), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn nurture_trigger_requires_the_internal_token() {
    let app = app_router(test_app().state);

    let request = Request::builder()
        .method("POST")
        .uri("/api/internal/run-nurture")
        .header("x-verify-token", OPERATOR_TOKEN)
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/api/internal/run-nurture")
        .header("x-internal-token", CRON_TOKEN)
        .body(Body::empty())
        .unwrap();
    let (status, report) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["processed"], 0);
}
