//! End-to-end authorization pipeline against a live Postgres. Run with
//! `cargo test -- --ignored` once `DATABASE_URL` points at a scratch
//! database.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use tower::util::ServiceExt;
use uuid::Uuid;

use common::{body_json, get_request, json_request, setup, unique_email};

#[tokio::test]
#[ignore]
async fn premium_gate_and_suspension_flow() {
    let (app, state) = setup().await;

    // Register a regular user on the free plan.
    let email = unique_email("pipeline-user");
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            &json!({ "email": email, "password": "correct-horse-battery" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let user_token = body_json(res).await["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    let user_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(&state.pool)
        .await
        .unwrap();

    // Free plan cannot reach the premium surface.
    let res = app
        .clone()
        .oneshot(get_request("/account/entitlements", Some(&user_token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Create an administrator the blunt way.
    let admin_email = unique_email("pipeline-admin");
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            &json!({ "email": admin_email, "password": "correct-horse-battery" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let admin_token = body_json(res).await["access_token"]
        .as_str()
        .unwrap()
        .to_string();
    sqlx::query("UPDATE users SET is_admin = TRUE WHERE email = $1")
        .bind(&admin_email)
        .execute(&state.pool)
        .await
        .unwrap();

    // Non-admins cannot use admin routes.
    let res = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/admin/users/{}/plan", user_id),
            Some(&user_token),
            &json!({ "plan": "premium", "plan_expires_at": null }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // The administrator grants a non-expiring premium plan.
    let res = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/admin/users/{}/plan", user_id),
            Some(&admin_token),
            &json!({ "plan": "premium", "plan_expires_at": null }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Same call, now admitted.
    let res = app
        .clone()
        .oneshot(get_request("/account/entitlements", Some(&user_token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["plan"], "premium");

    // Suspension wins over everything, including the still-valid token.
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/admin/users/{}/suspend", user_id),
            Some(&admin_token),
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(get_request("/account/entitlements", Some(&user_token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore]
async fn audit_trail_is_scoped_to_the_caller() {
    let (app, state) = setup().await;

    let email = unique_email("audit-user");
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            &json!({ "email": email, "password": "correct-horse-battery" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let user_token = body_json(res).await["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    let user_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(&state.pool)
        .await
        .unwrap();

    // Give the background writer a moment to land the register entry.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // The user asks for someone else's entries; the scope clamp means they
    // still only see their own.
    let other = Uuid::new_v4();
    let res = app
        .clone()
        .oneshot(get_request(
            &format!("/audit/logs?user_id={}", other),
            Some(&user_token),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    for entry in body["entries"].as_array().unwrap() {
        assert_eq!(entry["user_id"], json!(user_id));
    }

    // Stats are admin-only.
    let res = app
        .clone()
        .oneshot(get_request("/audit/stats", Some(&user_token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore]
async fn logout_revokes_the_access_token() {
    let (app, _state) = setup().await;

    let email = unique_email("logout-user");
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            &json!({ "email": email, "password": "correct-horse-battery" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = body_json(res).await;
    let access = body["access_token"].as_str().unwrap().to_string();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/logout",
            Some(&access),
            &json!({ "refresh_token": refresh }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // The blacklisted jti now fails the revocation gate.
    let res = app
        .clone()
        .oneshot(get_request("/audit/logs", Some(&access)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // The rotated-out refresh token is dead too.
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/refresh",
            None,
            &json!({ "refresh_token": refresh }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
