use std::error::Error;
use std::sync::Arc;

use configuration::Settings;
use exchange_gateway::access::StaticAccessControl;
use exchange_gateway::start_server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let settings = Settings::load()?;
    let access = Arc::new(StaticAccessControl::from_settings(&settings)?);
    let handles = start_server(settings, access).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handles.shutdown().await?;
    Ok(())
}
