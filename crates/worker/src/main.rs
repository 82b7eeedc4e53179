//! Saga worker entry point.
//!
//! Wires the orchestrator against in-process collaborators: provisions the
//! message topology, spawns the downstream services and the retention
//! sweeper, recovers any in-flight sagas, runs one demonstration sale, and
//! then consumes replies until shutdown.

mod config;

use std::sync::Arc;

use common::{CorrelationId, CustomerId, Money, SaleItem, SaleRequest};
use messaging::{InMemoryMessageChannel, MessageChannel, Topology, routing};
use orchestrator::{
    InMemoryOrderService, InMemoryPaymentService, InMemoryStockService, OrchestratorEngine,
};
use saga_store::{InMemorySagaStore, InstrumentedSagaStore, run_sweeper};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
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
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn demo_sale() -> SaleRequest {
    SaleRequest::new(
        CorrelationId::new(),
        CustomerId::new(),
        vec![
            SaleItem::new("SKU-1001", "Mechanical Keyboard", 1, Money::from_cents(8999)),
            SaleItem::new("SKU-2002", "USB-C Cable", 2, Money::from_cents(1299)),
        ],
    )
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let _metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = Config::from_env();

    // 3. Provision the message topology (one-shot, idempotent)
    let channel = Arc::new(InMemoryMessageChannel::new());
    Topology::standard()
        .provision(&*channel)
        .await
        .expect("topology provisioning failed");

    // 4. Saga store with uniform operation instrumentation
    let store = Arc::new(InstrumentedSagaStore::new(InMemorySagaStore::new()));

    // 5. Downstream services
    tokio::spawn(InMemoryStockService::new().run(Arc::clone(&channel)));
    tokio::spawn(InMemoryPaymentService::new().run(Arc::clone(&channel)));
    tokio::spawn(InMemoryOrderService::new().run(Arc::clone(&channel)));

    // 6. Retention sweeper
    tokio::spawn(run_sweeper(Arc::clone(&store), config.retention()));

    // 7. Engine: recover anything left in flight, then consume replies
    let engine = OrchestratorEngine::new(Arc::clone(&store), Arc::clone(&channel), config.engine());
    let recovered = engine
        .recover_inflight()
        .await
        .expect("in-flight recovery failed");
    if recovered > 0 {
        tracing::info!(recovered, "recovered in-flight sagas");
    }

    let replies = channel
        .consume(routing::SAGA_REPLY_QUEUE)
        .await
        .expect("failed to attach reply consumer");

    let correlation_id = engine
        .submit(demo_sale())
        .await
        .expect("demo sale submission failed");
    tracing::info!(%correlation_id, "demonstration sale submitted");

    tokio::select! {
        result = engine.run(replies) => {
            result.expect("engine run loop failed");
        }
        () = shutdown_signal() => {}
    }

    tracing::info!("worker shut down gracefully");
}
