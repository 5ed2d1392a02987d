use std::net::SocketAddr;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::verify_internal::verify_internal_ident;
use crate::api::middleware::verify_pos::verify_pos_ident;
use crate::db::prelude::*;
use crate::error::EngineError;
use crate::util::env::{EnvErr, Var};
use crate::var;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone, Debug)]
pub struct AppState {
    pub db_pool: &'static PgPool,
}

#[instrument(skip(tx))]
pub async fn router(tx: UnboundedSender<SocketAddr>) -> Result<(), RouteError> {
    let state = Arc::new(AppState {
        db_pool: db_pool().await?,
    });

    // signed POS terminal routes
    let pos_routes = Router::new()
        .route("/transaction", post(submit_transaction))
        .route("/token/consume", post(consume_token))
        .route_layer(middleware::from_fn(verify_pos_ident));

    // operator-only corrections
    let internal_routes = Router::new()
        .route("/member/{id}/adjust", post(adjust_member_points))
        .route_layer(middleware::from_fn(verify_internal_ident));

    let app = Router::new()
        .merge(pos_routes)
        .merge(internal_routes)
        .route("/", get(|| async { Response::new(Body::empty()) }))
        //
        // member-facing routes
        .route("/member/{id}/balance", get(member_balance))
        .route("/voucher/claim", post(claim_voucher))
        .route("/voucher/redeem", post(redeem_voucher))
        //
        // redemption token protocol
        .route("/token/issue", post(issue_token))
        .route("/token/validate", post(validate_token))
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
        .with_state(state);

    let port = var!(Var::ServerApiPort)
        .await?
        .parse::<u16>()
        .map_err(|e| RouteError::Startup(format!("invalid SERVER_API_PORT: {e}")))?;

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tx.send(socket_addr)
        .map_err(|e| RouteError::Startup(e.to_string()))?;

    Ok(axum::serve(listener, app).await?)
}

/// Surfaces handler errors into the request trace; the `IntoResponse` impl
/// stashes the original error on the response for this to pick up.
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
        if let Err(e) = router(tx).await {
            tracing::error!(error = ?e, "api server exited");
        }
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

    let handles = vec![server_handle, logging_handle];
    Ok(handles)
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    QueryError(#[from] PgError),

    #[error(transparent)]
    EnvError(#[from] EnvErr),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Startup(String),
}

impl RouteError {
    fn status(&self) -> StatusCode {
        match self {
            RouteError::Engine(e) => match e {
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::Conflict(_) => StatusCode::CONFLICT,
                EngineError::InsufficientPoints { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::Expired(_) => StatusCode::GONE,
                EngineError::InvalidSignature => StatusCode::FORBIDDEN,
                EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                EngineError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Config(_) | EngineError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            RouteError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RouteError::QueryError(_)
            | RouteError::EnvError(_)
            | RouteError::IoError(_)
            | RouteError::Startup(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let status = self.status();

        // storage details stay out of client-facing messages
        let message = match &self {
            RouteError::Engine(EngineError::Storage(_)) => {
                String::from("internal storage error")
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(ErrorResponse { message })).into_response();
        response.extensions_mut().insert(Arc::new(self));

        response
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn engine_errors_map_to_their_statuses() {
        let cases: Vec<(RouteError, StatusCode)> = vec![
            (
                EngineError::NotFound("member").into(),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::Conflict("dup".into()).into(),
                StatusCode::CONFLICT,
            ),
            (
                EngineError::InsufficientPoints {
                    available: 1,
                    requested: 2,
                }
                .into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (EngineError::Expired("token").into(), StatusCode::GONE),
            (EngineError::InvalidSignature.into(), StatusCode::FORBIDDEN),
            (
                EngineError::Validation("bad".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Transient(sqlx::Error::PoolTimedOut).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status(), expected);
        }
    }

    #[test]
    fn storage_details_never_reach_the_client() {
        let err: RouteError = EngineError::Storage(sqlx::Error::PoolClosed).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
