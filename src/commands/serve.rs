use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::info;

use ai_gateway_core::config::GatewayConfig;
use ai_gateway_core::http::{build_admin_router, AppState};
use ai_gateway_core::pipeline::GatewayPipeline;
use ai_gateway_core::policy::Policy;
use ai_gateway_core::tenant::Tenant;

/// Starts the admin HTTPS surface (health, readiness, metrics, demo
/// ingress route) over the full pipeline, the way
/// `commands::webhook::serve` starts the admission webhook: load config,
/// bind TLS, spawn background maintenance tasks, serve until `Ctrl+C`.
pub async fn run(addr_str: &str, config_path: &str, policies_path: Option<&str>, tenants_path: Option<&str>) -> anyhow::Result<()> {
    println!("Starting ai-gatewayd admin surface...\n");
    info!("gateway_starting");

    let config_text = std::fs::read_to_string(config_path).with_context(|| format!("cannot read config file '{config_path}'"))?;
    let config = GatewayConfig::from_yaml_str(&config_text).context("config file is not valid YAML/JSON")?;

    let policies: Vec<Policy> = match policies_path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("cannot read policy file '{path}'"))?;
            serde_yaml::from_str(&text).context("policy document is not valid YAML")?
        }
        None => Vec::new(),
    };

    let tenants: Vec<Tenant> = match tenants_path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("cannot read tenant file '{path}'"))?;
            serde_yaml::from_str(&text).context("tenant document is not valid YAML")?
        }
        None => Vec::new(),
    };

    println!("  Config file .................. OK ({config_path})");
    println!("  Endpoints registered ......... {}", config.endpoints.len());
    println!("  Tenants registered ........... {}", tenants.len());
    println!("  Policies loaded ............... {}", policies.len());

    ai_gateway_core::metrics::init();

    let addr: SocketAddr = addr_str.parse().context("invalid address format")?;
    let queue_max_size = config.queue.max_size;
    let idle_timeout = config.lb.idle_timeout();
    let cache_ttl = config.cache.ttl();

    let pipeline = Arc::new(GatewayPipeline::from_config(&config, policies, tenants));
    let state = Arc::new(AppState::new(pipeline.clone(), queue_max_size));

    println!("\n  Available endpoints:");
    println!("    POST /v1/chat/completions .. demo ingress route");
    println!("    GET  /healthz ............... liveness probe");
    println!("    GET  /readyz ................ readiness probe");
    println!("    GET  /metrics ............... Prometheus metrics");
    println!("\nai-gatewayd running on https://{addr}. Press Ctrl+C to stop.\n");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let cache_reaper = tokio::spawn(reap_cache_periodically(pipeline.clone(), cache_ttl.max(Duration::from_secs(1)), shutdown_tx.subscribe()));
    let pool_reaper = tokio::spawn(reap_pools_periodically(pipeline.clone(), idle_timeout.max(Duration::from_secs(1)), shutdown_tx.subscribe()));
    let autoscaler = tokio::spawn(autoscale_periodically(pipeline.clone(), Duration::from_secs(5), shutdown_tx.subscribe()));

    let app = build_admin_router(state);
    let (ca_pem, cert_pem, key_pem) = ai_gateway_core::certs::generate_self_signed_certs("ai-gatewayd-admin", &[])
        .context("failed to generate ephemeral TLS material for the admin listener")?;
    let _ = ca_pem;
    let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem(cert_pem.into_bytes(), key_pem.into_bytes())
        .await
        .context("failed to load generated TLS material")?;

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let mut ctrl_c_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let _ = ctrl_c_shutdown.recv().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    let serve_task = tokio::spawn(async move { axum_server::bind_rustls(addr, rustls_config).handle(handle).serve(app.into_make_service()).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    println!("\nShutdown signal received. Stopping ai-gatewayd...");
    let _ = shutdown_tx.send(());

    let _ = serve_task.await?;
    cache_reaper.abort();
    pool_reaper.abort();
    autoscaler.abort();

    info!("gateway_stopped");
    println!("ai-gatewayd stopped.");
    Ok(())
}

/// Single background task per subsystem (§9): periodically sweeps expired
/// semantic-cache entries. Observes cancellation on every tick boundary,
/// never holds a lock across the tick's own sleep.
async fn reap_cache_periodically(pipeline: Arc<GatewayPipeline>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = pipeline.cache.reap_expired_at(std::time::Instant::now()).await;
                if removed > 0 {
                    tracing::debug!(removed, "cache_reap_tick");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Periodically reaps idle connection-pool slots across every registered
/// endpoint ().
async fn reap_pools_periodically(pipeline: Arc<GatewayPipeline>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = pipeline.load_balancer.reap_idle_at(period, std::time::Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, "pool_reap_tick");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Periodically feeds live queue utilization and circuit-breaker error rate
/// into `Scheduler::autoscale` so worker concurrency tracks load (§5.4:
/// scale up above 0.7 utilization with a low error rate, down below 0.2).
async fn autoscale_periodically(pipeline: Arc<GatewayPipeline>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let capacity = pipeline.queue.capacity().max(1);
                let utilization = pipeline.queue.len() as f64 / capacity as f64;
                let error_rate = pipeline.circuit.recent_failure_rate();
                pipeline.scheduler.autoscale(utilization, error_rate);
                tracing::debug!(utilization, error_rate, concurrency = pipeline.scheduler.current_concurrency(), "autoscale_tick");
            }
            _ = shutdown.recv() => break,
        }
    }
}
