use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use handover::application::{AvailabilityProbe, CallbackScheduler, ClickToCallInitiator};
use handover::config::Config;
use handover::domain::event::EventKind;
use handover::domain::ports::{CallControl, Notifier, TenantConfig, TicketGateway};
use handover::infrastructure::directory::StaticTenantConfig;
use handover::infrastructure::esl::EslConnection;
use handover::infrastructure::notifier::HttpNotifier;
use handover::infrastructure::ticketing::HttpTicketGateway;
use handover::interface::api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting handover orchestration service");

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    info!(
        esl_host = %config.esl.host,
        esl_port = config.esl.port,
        api_port = config.server.port,
        "configuration loaded"
    );

    // Event-socket connection, retried until the platform is reachable
    let esl = Arc::new(EslConnection::new(config.esl.clone()));
    if let Err(e) = esl.connect().await {
        warn!(error = %e, "initial connect failed, entering reconnect loop");
        esl.reconnect().await?;
    }
    let control: Arc<dyn CallControl> = esl.clone();
    control
        .subscribe(&[
            EventKind::ChannelAnswer,
            EventKind::ChannelBridge,
            EventKind::ChannelHangup,
            EventKind::BackgroundJob,
        ])
        .await?;

    // Collaborators
    let gateway: Arc<dyn TicketGateway> = Arc::new(HttpTicketGateway::new(&config.ticketing)?);
    let notifier: Arc<dyn Notifier> = Arc::new(HttpNotifier::new(&config.notifier)?);
    let tenants: Arc<dyn TenantConfig> = Arc::new(StaticTenantConfig::new());

    // Application services. The transfer orchestrator is library surface for
    // the voice session; this binary runs the callback side.
    let probe = Arc::new(AvailabilityProbe::new(control.clone(), tenants.clone()));
    let click_to_call = Arc::new(ClickToCallInitiator::new(
        control.clone(),
        gateway.clone(),
        probe.clone(),
        config.click_to_call.clone(),
    ));

    // One scheduler task per configured tenant
    let scheduler = Arc::new(CallbackScheduler::new(
        gateway,
        notifier,
        probe.clone(),
        config.scheduler.clone(),
    ));
    let mut scheduler_tasks = Vec::new();
    for tenant in &config.scheduler.tenants {
        let scheduler = scheduler.clone();
        let tenant = tenant.clone();
        scheduler_tasks.push(tokio::spawn(scheduler.run(tenant)));
    }

    let state = AppState {
        control: control.clone(),
        probe,
        click_to_call,
    };
    let app = build_router(state);

    let bind = format!("{}:{}", config.server.host, config.server.port);
    info!(bind = %bind, "API server listening");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    for task in scheduler_tasks {
        task.abort();
    }
    esl.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
