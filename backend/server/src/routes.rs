use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    routing::{get, patch, post, put},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::{
    admin, agreements, appointments, auth, cases, connections, contact, events, hub, lawyers,
    messages, notifications, payments, posts, state::AppState, topics, users,
};

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn cors(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    match origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!("Invalid CORS_ORIGIN {origin}: {e}, cross-origin requests disabled");
            layer
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/auth/send-otp", post(auth::send_otp_handler))
        .route("/auth/verify-otp", post(auth::verify_otp_handler))
        .route(
            "/users",
            get(users::list_handler).post(users::register_handler),
        )
        .route(
            "/users/{key}",
            get(users::get_handler).put(users::update_handler),
        )
        .route("/lawyers", get(lawyers::list_handler))
        .route("/lawyers/search", get(lawyers::search_handler))
        .route(
            "/cases",
            get(cases::list_handler).post(cases::create_handler),
        )
        .route("/cases/{id}/accept", post(cases::accept_handler))
        .route(
            "/connections",
            get(connections::list_handler).post(connections::create_handler),
        )
        .route("/connections/{id}", put(connections::update_handler))
        .route(
            "/appointments",
            get(appointments::list_handler).post(appointments::create_handler),
        )
        .route(
            "/appointments/booked-slots",
            get(appointments::booked_slots_handler),
        )
        .route("/appointments/{id}", put(appointments::update_handler))
        .route(
            "/messages",
            get(messages::list_handler).post(messages::send_handler),
        )
        .route("/notifications/unread", get(notifications::unread_handler))
        .route("/notifications/read", put(notifications::read_handler))
        .route(
            "/events",
            get(events::list_handler).post(events::create_handler),
        )
        .route("/events/{id}/status", patch(events::status_handler))
        .route(
            "/posts",
            get(posts::feed_handler).post(posts::create_handler),
        )
        .route("/posts/{id}/like", post(posts::like_handler))
        .route("/posts/{id}/comment", post(posts::comment_handler))
        .route(
            "/topics",
            get(topics::trending_handler).post(topics::create_handler),
        )
        .route(
            "/agreements",
            get(agreements::list_handler).post(agreements::create_handler),
        )
        .route("/contact", post(contact::create_handler))
        .route("/payments", get(payments::list_handler))
        .route("/payments/verify", post(payments::verify_handler))
        .route("/admin/stats", get(admin::stats_handler))
        .route("/admin/clients", get(admin::clients_handler))
        .route("/admin/pending-lawyers", get(admin::pending_lawyers_handler))
        .route("/admin/inquiries", get(contact::list_handler))
        .route("/admin/request-access", post(admin::request_access_handler))
        .route(
            "/admin/verify-lawyer/{id}",
            post(admin::verify_lawyer_handler),
        );

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/ws", get(hub::ws_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors(&state.config.cors_origin))
        .with_state(state)
}
