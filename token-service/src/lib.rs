pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, JwtConfig, OtpConfig, RefreshConfig};
use crate::services::{AuthFlow, Clock, HealthCheck, OtpNotifier, Storage};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::request_otp,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::RequestOtpRequest,
            dtos::auth::OtpLoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::TokenResponse,
            dtos::auth::MessageResponse,
        )
    ),
    tags(
        (name = "Authentication", description = "Passcode login and token lifecycle"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub environment: Environment,
    pub allowed_origins: Arc<Vec<String>>,
    pub flow: AuthFlow,
    pub health: Arc<dyn HealthCheck>,
    /// Cancelled on shutdown; every request works under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new<S>(
        environment: Environment,
        allowed_origins: Vec<String>,
        jwt: &JwtConfig,
        otp: &OtpConfig,
        refresh: &RefreshConfig,
        store: Arc<S>,
        notifier: Arc<dyn OtpNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError>
    where
        S: Storage + 'static,
    {
        let flow = services::build_auth_flow(store.clone(), notifier, clock, jwt, otp, refresh)?;

        Ok(Self {
            environment,
            allowed_origins: Arc::new(allowed_origins),
            flow,
            health: store,
            shutdown: CancellationToken::new(),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new().route("/health", get(handlers::health_check));

    if state.environment == Environment::Dev {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let cors = cors_layer(&state);

    app.route("/auth/otp/request", post(handlers::request_otp))
        .route("/auth/otp/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/logout", post(handlers::logout))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(cors)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    if state.environment == Environment::Dev {
        return CorsLayer::permissive();
    }

    let origins = state
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
