//! HTTP face of the Whispr store: PostgREST-style table access, named
//! procedures and email/password sessions.

pub mod access;
pub mod auth;
pub mod error;
pub mod middleware;
pub mod rest;
pub mod rpc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tracing::error;

use whispr_db::Database;

use crate::auth::AppState;
use crate::error::ApiError;

/// All routes. Everything under `/rest/v1` requires a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/rest/v1/{table}",
            get(rest::select)
                .post(rest::insert)
                .patch(rest::update)
                .delete(rest::delete),
        )
        .route("/rest/v1/rpc/{name}", post(rpc::call))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

pub async fn health() -> &'static str {
    "ok"
}

/// Run a store call off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> whispr_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::internal("store worker failed")
        })?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use whispr_types::api::{SessionResponse, TABLE_NOTES};

    use super::*;
    use crate::auth::AppStateInner;

    fn app() -> Router {
        let state = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
        });
        router(state)
    }

    async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(app: &Router, email: &str) -> SessionResponse {
        let (status, body) = send(
            app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "email": email, "password": "long-enough", "mood": "calm" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn store_requires_a_token() {
        let app = app();
        let (status, body) = send(&app, Method::GET, "/rest/v1/whispr_notes", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");

        let (status, _) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn register_login_and_duplicate_email() {
        let app = app();
        let session = register(&app, "someone@example.com").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "someone@example.com", "password": "long-enough" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], session.user_id.to_string());

        let (status, _) = send(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "someone@example.com", "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "email": "someone@example.com", "password": "long-enough" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");
    }

    #[tokio::test]
    async fn note_lifecycle_over_http() {
        let app = app();
        let alice = register(&app, "alice@example.com").await;
        let bob = register(&app, "bob@example.com").await;

        let (status, rows) = send(
            &app,
            Method::POST,
            &format!("/rest/v1/{}", TABLE_NOTES),
            Some(&alice.token),
            Some(json!({ "sender_id": alice.user_id, "content": "hi", "mood": "calm" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let note_id = rows[0]["id"].as_str().unwrap().to_string();

        let uri = format!(
            "/rest/v1/{}?status=eq.active&sender_id=neq.{}&order=created_at.desc&limit=20",
            TABLE_NOTES, bob.user_id
        );
        let (status, rows) = send(&app, Method::GET, &uri, Some(&bob.token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows.as_array().unwrap().len(), 1);

        let params = json!({ "note_id": note_id, "responder_id": bob.user_id, "action": "listen" });
        let (status, outcome) = send(
            &app,
            Method::POST,
            "/rest/v1/rpc/handle_note_propagation",
            Some(&bob.token),
            Some(params.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["status"], "listened");

        let (status, body) = send(
            &app,
            Method::POST,
            "/rest/v1/rpc/handle_note_propagation",
            Some(&bob.token),
            Some(params),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");
    }

    #[tokio::test]
    async fn acting_as_someone_else_is_forbidden() {
        let app = app();
        let alice = register(&app, "alice@example.com").await;
        let bob = register(&app, "bob@example.com").await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/rest/v1/rpc/delete_user_account",
            Some(&alice.token),
            Some(json!({ "user_id": bob.user_id })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn rows_of_other_users_are_off_limits() {
        let app = app();
        let alice = register(&app, "alice@example.com").await;
        let bob = register(&app, "bob@example.com").await;
        let mallory = register(&app, "mallory@example.com").await;
        let notes = format!("/rest/v1/{}", TABLE_NOTES);

        let (status, _) = send(
            &app,
            Method::POST,
            &notes,
            Some(&mallory.token),
            Some(json!({ "sender_id": alice.user_id, "content": "not mine", "mood": "calm" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            Method::POST,
            &notes,
            Some(&alice.token),
            Some(json!({ "sender_id": alice.user_id, "content": "hi", "mood": "calm", "status": "listened" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        let (_, rows) = send(
            &app,
            Method::POST,
            &notes,
            Some(&alice.token),
            Some(json!({ "sender_id": alice.user_id, "content": "hi", "mood": "calm" })),
        )
        .await;
        let note_id = rows[0]["id"].as_str().unwrap().to_string();

        // even the author cannot move a note's state by hand
        let (status, _) = send(
            &app,
            Method::PATCH,
            &format!("{}?id=eq.{}&sender_id=eq.{}", notes, note_id, alice.user_id),
            Some(&alice.token),
            Some(json!({ "status": "listened", "propagation_count": 7 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(
            &app,
            Method::DELETE,
            &format!("{}?id=eq.{}", notes, note_id),
            Some(&mallory.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, outcome) = send(
            &app,
            Method::POST,
            "/rest/v1/rpc/handle_note_propagation",
            Some(&bob.token),
            Some(json!({ "note_id": note_id, "responder_id": bob.user_id, "action": "listen" })),
        )
        .await;
        let bobs_buddy = outcome["buddy_id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            Method::PATCH,
            &format!("/rest/v1/buddies?id=eq.{}", bobs_buddy),
            Some(&mallory.token),
            Some(json!({ "unread_count": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, rows) = send(
            &app,
            Method::GET,
            &format!("/rest/v1/buddies?id=eq.{}", bobs_buddy),
            Some(&mallory.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(rows.as_array().unwrap().is_empty());
        let (_, rows) = send(&app, Method::GET, "/rest/v1/buddy_messages?message_type=eq.text", Some(&mallory.token), None).await;
        assert!(rows.as_array().unwrap().is_empty());

        let (_, rows) = send(&app, Method::GET, "/rest/v1/buddy_messages?message_type=eq.text", Some(&bob.token), None).await;
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["content"], "hi");
    }

    #[tokio::test]
    async fn bad_queries_are_client_errors() {
        let app = app();
        let alice = register(&app, "alice@example.com").await;

        let (status, _) = send(&app, Method::GET, "/rest/v1/credentials", Some(&alice.token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            send(&app, Method::GET, "/rest/v1/whispr_notes?status=like.act", Some(&alice.token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid");

        let (status, _) = send(
            &app,
            Method::DELETE,
            "/rest/v1/whispr_notes",
            Some(&alice.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
