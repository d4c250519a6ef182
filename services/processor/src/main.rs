use anyhow::{Context, Result};
use solana_sdk::signature::Signer;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use processor::allowance::AllowanceManager;
use processor::config::Config;
use processor::ledger_gateway::LedgerGateway;
use processor::reconciliation::Reconciler;
use processor::solana_client::{load_processor_keypair, SolanaRpc};
use processor::solana_instructions::VaultInstructions;
use processor::solana_tx::{ConfirmSettings, TransactionSender};
use processor::worker_pool::{
    BackendClient, BatchProcessor, LedgerExecutor, OnChainExecutor, SettlementApi,
    SimulatedExecutor, ThreadRngDrawer, WorkerPool,
};
use shared::pda::VaultAddresses;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging with JSON formatting (configurable via env)
    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "processor=info".into());

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        service = "processor",
        version = env!("CARGO_PKG_VERSION"),
        log_format = if use_json { "json" } else { "text" },
        "Starting processor service"
    );

    let config = Config::load()?;
    tracing::info!(
        instance_id = %config.processor.instance_id,
        worker_count = config.processor.worker_count,
        batch_interval_seconds = config.processor.batch_interval_seconds,
        max_batch_size = config.processor.max_batch_size,
        use_real_solana = config.processor.use_real_solana,
        "Configuration loaded"
    );

    let metrics_handle = tokio::spawn(start_metrics_server(config.metrics_port));

    let api: Arc<dyn SettlementApi> = Arc::new(BackendClient::new(
        &config.backend.api_base_url,
        Duration::from_secs(config.rpc.request_timeout_seconds),
    )?);

    let mut background = Vec::new();
    let shutdown = tokio_util::sync::CancellationToken::new();

    let executor: Arc<dyn LedgerExecutor> = if config.processor.use_real_solana {
        let program_id = config
            .solana
            .vault_program_id
            .context("VAULT_PROGRAM_ID must be set when USE_REAL_SOLANA=true")?;
        let addresses = VaultAddresses::new(program_id)?;
        addresses
            .verify_casino(config.solana.expected_casino.as_ref())
            .context("Casino address does not match EXPECTED_CASINO_PDA")?;

        let rpc = Arc::new(SolanaRpc::new(
            &config.solana.rpc_urls,
            config.solana.commitment_config(),
            Duration::from_secs(config.rpc.request_timeout_seconds),
        )?);
        let gateway = Arc::new(LedgerGateway::new(rpc.clone(), config.rpc.rate_limit_policy()));
        let sender = Arc::new(TransactionSender::new(
            gateway.clone(),
            ConfirmSettings::from(&config.rpc),
        ));
        let instructions = VaultInstructions::new(addresses);

        let keypair_path = config
            .processor
            .keypair_path
            .as_deref()
            .context("PROCESSOR_KEYPAIR must be set when USE_REAL_SOLANA=true")?;
        let processor_keypair = Arc::new(load_processor_keypair(keypair_path)?);
        tracing::info!(
            processor_pubkey = %processor_keypair.pubkey(),
            casino = %addresses.casino(),
            rpc_count = config.solana.rpc_urls.len(),
            "Settling against the vault program"
        );

        let allowances = Arc::new(AllowanceManager::new(
            sender.clone(),
            instructions,
            config.processor.instance_id.clone(),
            api.clone(),
        ));
        let casino = allowances.casino().await.context("Casino account is not readable")?;
        if casino.processor != processor_keypair.pubkey() {
            tracing::warn!(
                expected = %casino.processor,
                actual = %processor_keypair.pubkey(),
                "Processor keypair is not the casino's registered processor"
            );
        }
        if casino.paused {
            tracing::warn!("Casino is paused; spends will be rejected until it is unpaused");
        }

        background.push(tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(15));
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => rpc.health_check_all(gateway.admission()).await,
                    }
                }
            }
        }));

        Arc::new(OnChainExecutor::new(allowances, instructions, sender, processor_keypair))
    } else {
        tracing::warn!("USE_REAL_SOLANA=false, settling against the simulated ledger");
        Arc::new(SimulatedExecutor)
    };

    let batch_processor = Arc::new(BatchProcessor::new(
        api.clone(),
        executor.clone(),
        Arc::new(ThreadRngDrawer),
        config.processor.max_batch_size,
    ));
    let worker_pool = Arc::new(WorkerPool::new(
        config.processor.worker_count,
        &config.processor.instance_id,
        batch_processor,
        Duration::from_secs(config.processor.batch_interval_seconds),
    ));

    let reconciler = Reconciler::new(
        api,
        executor,
        format!("{}-reconciler", config.processor.instance_id),
        config.processor.max_stuck_time_seconds,
    );
    background.push(tokio::spawn({
        let shutdown = shutdown.clone();
        let every = Duration::from_secs(config.processor.reconcile_interval_seconds);
        async move { reconciler.run(every, shutdown).await }
    }));

    let worker_handle = tokio::spawn({
        let worker_pool = worker_pool.clone();
        async move { worker_pool.start().await }
    });

    tracing::info!("Processor running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Workers finish the batch they hold before stopping
    worker_pool.stop();
    shutdown.cancel();
    match worker_handle.await {
        Ok(Err(e)) => tracing::error!(error = ?e, "Worker pool exited with error"),
        Err(e) => tracing::error!(error = %e, "Worker pool task panicked"),
        Ok(Ok(())) => {}
    }
    for handle in background {
        let _ = handle.await;
    }
    metrics_handle.abort();

    tracing::info!("Processor stopped");

    Ok(())
}

async fn start_metrics_server(port: u16) -> Result<()> {
    use axum::{routing::get, Router};
    use std::net::SocketAddr;

    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    let app = Router::new().route("/metrics", get(|| async move { handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Processor metrics listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
