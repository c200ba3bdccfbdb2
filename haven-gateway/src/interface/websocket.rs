//! WebSocket 接入层
//!
//! 握手阶段校验来源与令牌，之后每个连接由一个读循环和一个写任务驱动。

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use haven_core::error::HavenError;
use haven_core::metrics::GatewayMetrics;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::{ConnectionService, GatewayEventHandler, SessionContext};
use crate::domain::events::{ErrorNotice, OutboundFrame};
use crate::domain::models::{ConnectionPhase, Principal};
use crate::domain::repositories::AuthenticatorRef;
use crate::domain::service::{ConnectionRegistry, OutboundReceiver, TopicRouter};

/// 路由共享状态
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<TopicRouter>,
    pub connections: Arc<ConnectionService>,
    pub events: Arc<GatewayEventHandler>,
    pub authenticator: AuthenticatorRef,
    pub metrics: Arc<GatewayMetrics>,
    pub allowed_origin: Arc<str>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

pub fn build_router(state: GatewayState) -> Router {
    let cors = cors_layer(&state.allowed_origin);
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origin: &str) -> CorsLayer {
    if allowed_origin == "*" {
        return CorsLayer::permissive();
    }
    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods([Method::GET])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true),
        Err(err) => {
            warn!(origin = %allowed_origin, error = %err, "invalid allowed origin, cross-origin requests disabled");
            CorsLayer::new()
        }
    }
}

/// 未配置时允许任意来源；缺少 Origin 头（非浏览器客户端）放行
fn origin_allowed(allowed_origin: &str, headers: &HeaderMap) -> bool {
    if allowed_origin == "*" {
        return true;
    }
    match headers.get(ORIGIN).and_then(|v| v.to_str().ok()) {
        Some(origin) => origin.trim_end_matches('/') == allowed_origin.trim_end_matches('/'),
        None => true,
    }
}

/// 令牌优先取 `Authorization: Bearer`，其次取查询参数
fn extract_token(headers: &HeaderMap, params: &ConnectParams) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| params.token.clone().filter(|t| !t.is_empty()))
}

fn reject(status: StatusCode, err: &HavenError) -> Response {
    (status, Json(ErrorNotice::from_error(err, None))).into_response()
}

async fn ws_handler(
    State(state): State<GatewayState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let mut phase = ConnectionPhase::Connecting;

    if !origin_allowed(&state.allowed_origin, &headers) {
        warn!(origin = ?headers.get(ORIGIN), "handshake rejected: origin not allowed");
        return reject(
            StatusCode::FORBIDDEN,
            &HavenError::unauthorized("origin not allowed"),
        );
    }

    let principal = match extract_token(&headers, &params) {
        Some(token) => state.authenticator.verify(&token).await,
        None => Err(HavenError::AuthenticationFailed(
            "missing credential".to_string(),
        )),
    };
    let principal = match principal {
        Ok(principal) => principal,
        Err(err) => {
            state.metrics.auth_failures_total.inc();
            debug!(error = %err, "handshake rejected");
            return reject(StatusCode::UNAUTHORIZED, &err);
        }
    };

    if let Err(err) = phase.advance(ConnectionPhase::Authenticated) {
        return reject(StatusCode::INTERNAL_SERVER_ERROR, &err);
    }

    ws.on_upgrade(move |socket| run_session(state, socket, principal, phase))
}

async fn run_session(
    state: GatewayState,
    socket: WebSocket,
    principal: Principal,
    mut phase: ConnectionPhase,
) {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = state.connections.channel();
    let (ws_tx, mut ws_rx) = socket.split();

    if let Err(err) = state.connections.admit(&session_id, &principal, tx).await {
        warn!(session_id = %session_id, user_id = %principal.user_id, error = %err, "failed to admit connection");
        return;
    }
    if let Err(err) = phase.advance(ConnectionPhase::Active) {
        warn!(session_id = %session_id, error = %err, "connection state error");
    }

    let mut writer = tokio::spawn(write_loop(session_id.clone(), ws_tx, rx));
    let ctx = SessionContext::new(session_id.clone(), principal);

    loop {
        tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.events.handle_text(&ctx, text.as_str()).await;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    state.events.handle_binary(&ctx, &bytes).await;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    let _ = state.registry.touch(&session_id);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(session_id = %session_id, error = %err, "websocket read failed");
                    break;
                }
            },
            // 写任务结束（服务端关闭或对端不可写）
            _ = &mut writer => break,
        }

        // 已被剔除，或出站队列写满
        if !state.registry.is_writable(&session_id) {
            break;
        }
    }

    let _ = phase.advance(ConnectionPhase::Disconnected);
    state.connections.disconnect(&session_id, "client disconnected").await;
    writer.abort();
    info!(session_id = %session_id, user_id = %ctx.user_id(), "session finished");
}

async fn write_loop(
    session_id: String,
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: OutboundReceiver,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Event(event) => {
                let payload = match event.to_json() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(session_id = %session_id, event = event.name(), error = %err, "failed to encode event");
                        continue;
                    }
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            OutboundFrame::Close { reason } => {
                let close = CloseFrame {
                    code: close_code::AWAY,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(close))).await;
                break;
            }
        }
    }
}

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.registry.len(),
        "topics": state.router.topic_count().await,
    }))
}

async fn metrics_handler() -> Response {
    match haven_core::metrics::render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
