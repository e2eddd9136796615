use crate::cli::Args;
use crate::config::roles::RoleRegistry;
use crate::llm::chat::ChatClient;
use crate::models::chat::{ ChatMessage, ChatRequest, ChatResponse };
use crate::models::conversion::{ ConversionRequest, PerspectiveConvertBody };
use crate::session::ConversionSession;
use crate::stream::sse::SseEncoder;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::post,
    Router,
    Json,
    extract::{ State, rejection::JsonRejection },
    response::{ IntoResponse, Response },
    http::{ header, HeaderValue, Method, StatusCode },
};
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use log::{ info, warn, error };

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoleRegistry>,
    pub chat_client: Arc<dyn ChatClient>,
}

#[derive(Serialize)]
struct ErrorResponse {
    #[serde(rename = "statusCode")]
    status_code: u16,
    message: String,
    error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = ErrorResponse {
        status_code: status.as_u16(),
        message,
        error: status.canonical_reason().unwrap_or("Error").to_string(),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .0.join("; "))]
pub struct ValidationError(pub Vec<String>);

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        error_response(StatusCode::BAD_REQUEST, self.to_string())
    }
}

fn required(field: &str, value: Option<String>, problems: &mut Vec<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            problems.push(format!("{} should not be empty", field));
            String::new()
        }
    }
}

fn check_role(field: &str, id: &str, registry: &RoleRegistry, problems: &mut Vec<String>) {
    if id.is_empty() || !registry.is_configured() {
        return;
    }
    if registry.resolve(id).is_err() {
        problems.push(format!("{} must be one of: {}", field, registry.ids().join(", ")));
    }
}

/// Checks presence of every field and membership of both roles in the
/// configured set. Same-role requests are allowed.
pub fn validate_conversion(
    registry: &RoleRegistry,
    body: PerspectiveConvertBody
) -> Result<ConversionRequest, ValidationError> {
    let mut problems = Vec::new();
    let source_role = required("sourceRole", body.source_role, &mut problems);
    let target_role = required("targetRole", body.target_role, &mut problems);
    let content = required("content", body.content, &mut problems);

    check_role("sourceRole", &source_role, registry, &mut problems);
    check_role("targetRole", &target_role, registry, &mut problems);

    if problems.is_empty() {
        Ok(ConversionRequest { source_role, target_role, content })
    } else {
        Err(ValidationError(problems))
    }
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/llm/perspective-convert", post(perspective_convert_handler))
        .route("/llm/chat", post(chat_handler))
        .with_state(state)
}

pub async fn start_http_server(
    addr: SocketAddr,
    state: AppState,
    args: Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let app = router(state).layer(cors_layer(&args.cors_origins));

    if args.enable_tls {
        let (cert_path, key_path) = match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("TLS enabled without cert/key".into());
            }
        };
        info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        info!("HTTPS server listening on: https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e)
        })?;
        info!("HTTP server listening on: http://{}", addr);
        axum::serve(listener, app.into_make_service()).await?;
    }

    Ok(())
}

async fn perspective_convert_handler(
    State(state): State<AppState>,
    body: Result<Json<PerspectiveConvertBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let request = match validate_conversion(&state.registry, body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected perspective conversion: {}", e);
            return e.into_response();
        }
    };

    let mut session = ConversionSession::new(request);
    // A start failure is already queued as the session's terminal event.
    if let Err(e) = session.start(&state.registry, state.chat_client.as_ref()) {
        warn!("Session {} failed to start: {}", session.id(), e);
    }

    SseEncoder::new(&session).into_response()
}

async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let message = match body {
        Ok(Json(ChatRequest { message: Some(message) })) if !message.trim().is_empty() => message,
        Ok(_) => {
            return error_response(StatusCode::BAD_REQUEST, "message should not be empty".into());
        }
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.chat_client.complete(&[ChatMessage::user(message)]).await {
        Ok(resp) => Json(ChatResponse { response: resp.response }).into_response(),
        Err(e) => {
            error!("Chat completion failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}
