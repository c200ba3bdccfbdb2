use anyhow::Result;
use haven_core::utils::ServiceHelper;
use haven_gateway::ApplicationBootstrap;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let app_config = ServiceHelper::load_config(None);

    let result = ApplicationBootstrap::run(app_config).await;
    match &result {
        Ok(()) => info!("✅ 实时网关已退出"),
        Err(err) => tracing::error!(error = %format!("{err:#}"), "❌ 实时网关启动失败"),
    }
    result
}
