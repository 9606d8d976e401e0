use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::info;

use clawrouter::balance::{BalanceFetcher, BalanceMonitor};
use clawrouter::catalog::Catalog;
use clawrouter::config::PaymentMode;
use clawrouter::dedup::DedupCache;
use clawrouter::dispatch::Dispatcher;
use clawrouter::payments::{ClawCreditBackend, PaymentBackend, WalletBackend};
use clawrouter::session_pin::SessionPinStore;
use clawrouter::stats::StatsRegistry;
use clawrouter::{api, router, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /health and exit immediately.
    // Avoids needing curl/wget in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clawrouter=info,tower_http=warn".into()),
        )
        .init();

    let config = Config::load()?;
    info!(port = config.proxy_port, payment_mode = %config.payment_mode, "clawrouter starting");

    let payment_backend = Arc::new(build_payment_backend(&config)?);
    let catalog = Arc::new(Catalog::new());
    let pins = Arc::new(SessionPinStore::new(Duration::from_secs(config.session_pin_ttl_secs)));
    let dedup = Arc::new(DedupCache::new(Duration::from_secs(config.dedup_ttl_secs)));
    let stats = Arc::new(StatsRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(payment_backend.clone(), config.blockrun_base_url.clone(), stats.clone()));

    let balance = spawn_balance_monitor(&config, &payment_backend);

    let state = Arc::new(router::RouterState {
        catalog,
        pins,
        balance,
        dedup,
        dispatcher,
        stats,
        payment_backend,
        request_deadline: Duration::from_secs(config.request_deadline_secs),
        blockrun_base_url: config.blockrun_base_url.clone(),
    });

    let addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.proxy_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let app = api::client::router(state).layer(axum::middleware::from_fn(api::request_id::request_id_middleware)).layer(
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
    );

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

fn build_payment_backend(config: &Config) -> anyhow::Result<PaymentBackend> {
    match config.payment_mode {
        PaymentMode::Wallet => {
            let wallet_config = config.wallet.clone().expect("validated at config load");
            Ok(PaymentBackend::Wallet(WalletBackend::new(wallet_config)?))
        }
        PaymentMode::ClawCredit => {
            let clawcredit_config = config.clawcredit.clone().expect("validated at config load");
            Ok(PaymentBackend::ClawCredit(ClawCreditBackend::new(clawcredit_config)))
        }
    }
}

/// Wallet mode polls the on-chain balance on an interval; clawcredit mode has
/// no local balance to sample, so the monitor never starts.
fn spawn_balance_monitor(config: &Config, payment_backend: &Arc<PaymentBackend>) -> Option<BalanceMonitor> {
    match payment_backend.as_ref() {
        PaymentBackend::Wallet(_) => {
            let backend = payment_backend.clone();
            let base_url = config.blockrun_base_url.clone();
            let fetch: BalanceFetcher = Box::new(move || {
                let backend = backend.clone();
                let base_url = base_url.clone();
                Box::pin(async move {
                    match backend.as_ref() {
                        PaymentBackend::Wallet(wallet) => wallet.fetch_balance_usd(&base_url).await,
                        PaymentBackend::ClawCredit(_) => unreachable!("balance monitor only spawned in wallet mode"),
                    }
                })
            });
            Some(BalanceMonitor::spawn(Duration::from_secs(config.balance_poll_secs), fetch))
        }
        PaymentBackend::ClawCredit(_) => {
            info!("clawcredit payment mode — balance monitor not started");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// `clawrouter --healthcheck`: GET /health and exit 0 on 200, 1 otherwise.
/// Invoked from a Docker HEALTHCHECK directive.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("BLOCKRUN_PROXY_PORT").ok().and_then(|v| v.parse::<u16>().ok()).unwrap_or(8402);
    let url = format!("http://127.0.0.1:{port}/health");
    let resp = reqwest::get(&url).await?;
    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}
