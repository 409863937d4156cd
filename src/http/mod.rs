//! Thin JSON translation layer over Store (spec.md 6, contract only in the
//! original scope but carried as the ambient HTTP surface here). Routes are
//! grouped by resource; `auth::require_session` gates everything except
//! the auth endpoints themselves.

pub mod attachments;
pub mod auth;
pub mod contacts;
pub mod drafts;
pub mod misc;
pub mod rules;
pub mod search;
pub mod threads;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

pub fn router(store: Store, config: Config) -> Router {
    let state: SharedState = Arc::new(AppState { store, config });

    let public = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me));

    let protected = Router::new()
        .route("/threads", get(threads::list))
        .route("/threads/:id", get(threads::get_one))
        .route("/threads/:id/reply-later", patch(threads::reply_later))
        .route("/threads/:id/set-aside", patch(threads::set_aside))
        .route("/drafts", post(drafts::create))
        .route("/drafts/:id", patch(drafts::update).delete(drafts::destroy))
        .route("/drafts/:id/send", post(drafts::send))
        .route("/contacts", get(contacts::list))
        .route("/contacts/:id", get(contacts::get_one).patch(contacts::update))
        .route(
            "/contacts/:id/set-default-identity",
            post(contacts::set_default_identity),
        )
        .route("/screener/:id", patch(contacts::screener_update))
        .route("/emails/mark-read", post(misc::mark_read_bulk))
        .route("/unread-counts", get(misc::unread_counts))
        .route("/notifications/pending", get(misc::notifications_pending))
        .route("/feed", get(misc::feed))
        .route("/set-aside", get(misc::set_aside_list))
        .route("/search", get(search::search))
        .route("/rules", get(rules::list).post(rules::create))
        .route("/rules/:id", patch(rules::update).delete(rules::destroy))
        .route("/rules/:id/apply", post(rules::apply))
        .route("/rules/applications/:id", get(rules::application_status))
        .route("/attachments/:id", get(attachments::get_one))
        .route("/uploads", post(attachments::upload))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    Router::new()
        .nest("/api", public.merge(protected))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
