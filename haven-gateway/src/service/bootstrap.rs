//! 应用启动器 - 负责依赖注入和服务启动

use std::sync::Arc;

use anyhow::{Context, Result};
use haven_core::HavenAppConfig;
use haven_core::tracing::init_tracing_from_config;
use haven_core::utils::ServiceHelper;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::GatewayConfig;
use crate::domain::events::OutboundFrame;
use crate::domain::service::ConnectionRegistry;
use crate::interface::build_router;

use super::wire::{self, ApplicationContext};

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run(app_config: &'static HavenAppConfig) -> Result<()> {
        init_tracing_from_config(Some(&app_config.logging));

        let context = Self::create_context(app_config).await?;
        Self::start_server(context).await
    }

    /// 创建应用上下文
    pub async fn create_context(app_config: &HavenAppConfig) -> Result<ApplicationContext> {
        let config = GatewayConfig::from_app_config(app_config);
        let collaborators = wire::build_collaborators(&config).await;
        wire::initialize(config, collaborators).context("Failed to initialize gateway")
    }

    /// 启动 HTTP/WebSocket 服务器
    pub async fn start_server(context: ApplicationContext) -> Result<()> {
        let addr = ServiceHelper::parse_server_addr(&context.config.address, context.config.port)?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!(%addr, "starting realtime gateway");

        let heartbeat = context.heartbeat.clone().start();
        let app = build_router(context.gateway_state());

        let registry = Arc::clone(&context.registry);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                // 执行优雅停机
                Self::close_connections(&registry);
            })
            .await
            .context("gateway server failed");

        heartbeat.stop().await;

        info!("realtime gateway stopped");
        result
    }

    /// 通知所有在线连接关闭
    fn close_connections(registry: &ConnectionRegistry) {
        let sessions = registry.list();
        for info in &sessions {
            registry.send(
                &info.session_id,
                OutboundFrame::Close {
                    reason: "server shutting down".to_string(),
                },
            );
        }
        if !sessions.is_empty() {
            info!(connections = sessions.len(), "closed remaining connections");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
