use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware as midware;
use crate::api::middleware::verify_internal::verify_internal_ident;
use crate::db::pg::PgStore;
use crate::db::prelude::db_pool;
use crate::engine::EngineError;
use crate::engine::league::UnknownLeague;
use crate::util::env::Var;
use crate::var;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone, Debug)]
pub struct AppState {
    pub store: PgStore,
}

#[instrument(skip(tx))]
pub async fn router(tx: UnboundedSender<SocketAddr>) {
    let state = Arc::new(AppState {
        store: PgStore::new(db_pool().await.unwrap()),
    });

    let internal_post_routes = Router::new()
        .route("/api/season/reset", post(run_season_reset))
        .route_layer(middleware::from_fn(verify_internal_ident));

    let app = Router::new()
        .merge(internal_post_routes)
        //
        // the engine of the app
        .route("/api/progress", post(record_progress))
        .route("/api/progress/students", get(students_overview))
        .route("/api/progress/{user_id}", get(user_history))
        //
        // gamification reads + acks
        .route("/api/leaderboard/{league}", get(league_leaderboard))
        .route("/api/users/confirm-promotion", post(confirm_promotion))
        //
        // liveness
        .route("/checkhealth", get(|| async { "SERVER_OK" }))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(midware::cors().await.unwrap())
        .with_state(state);

    let port = var!(Var::ServerApiPort)
        .await
        .unwrap()
        .parse::<u16>()
        .unwrap();

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await.unwrap();

    tx.send(socket_addr).unwrap();
    axum::serve(listener, app).await.unwrap()
}

/// Surfaces handler errors into the request trace; the `IntoResponse` impl
/// stashes the typed error in the response extensions on the way out.
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument]
pub async fn start_server(
    tx: UnboundedSender<SocketAddr>,
    mut rx: UnboundedReceiver<SocketAddr>,
) -> Result<Vec<JoinHandle<()>>, RouteError> {
    tracing::info!("starting server");
    let server_handle = tokio::task::spawn(async move {
        router(tx).await;
    });

    let logging_handle = tokio::task::spawn(async move {
        while !rx.is_closed() {
            if let Some(msg) = rx.recv().await {
                tracing::info!(
                    server_url = &format!("http://127.0.0.1:{}", msg.port()),
                    "server ready"
                );
                break;
            }
        }
    });

    Ok(vec![server_handle, logging_handle])
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    UnknownLeague(#[from] UnknownLeague),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message) = match &self {
            RouteError::Engine(engine_err) => match engine_err {
                EngineError::InvalidInput(_) => {
                    (StatusCode::BAD_REQUEST, engine_err.to_string())
                }
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, engine_err.to_string()),
                EngineError::StorageUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, engine_err.to_string())
                }
                EngineError::PartialReset { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, engine_err.to_string())
                }
            },

            RouteError::UnknownLeague(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        };

        let mut response = (status, Json(ErrorResponse { message })).into_response();
        response.extensions_mut().insert(Arc::new(self));

        response
    }
}
