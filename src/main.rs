//! Outbox Bus sample node.
//!
//! Runs the bus over the in-memory adapters, serves the read API and
//! publishes an `OrderPlaced` event every few seconds inside a transaction
//! that also "writes" the order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use outbox_bus::adapters::http::{read_api_router, ReadApiState};
use outbox_bus::adapters::{InMemoryBroker, InMemoryMessageStorage, InMemoryTransaction, JsonMessageSerializer};
use outbox_bus::application::EventPublisher;
use outbox_bus::config::{AppConfig, ServerConfig};
use outbox_bus::domain::foundation::DomainError;
use outbox_bus::ports::MessageSerializer;
use outbox_bus::{Event, EventBus, EventHandler};

const PUBLISH_EVERY: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u64,
}

impl Event for OrderPlaced {
    const NAME: Option<&'static str> = Some("orders.placed");
}

struct LogReceipt;

#[async_trait]
impl EventHandler<OrderPlaced> for LogReceipt {
    const NAME: Option<&'static str> = Some("receipts.log");

    async fn handle(
        &self,
        event: OrderPlaced,
        items: &HashMap<String, String>,
    ) -> Result<(), DomainError> {
        tracing::info!(order_id = event.order_id, items = items.len(), "Receipt logged");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load_validated()?;
    setup_logging(&config.server)?;

    let serializer: Arc<dyn MessageSerializer> = Arc::new(JsonMessageSerializer::new());
    let storage = Arc::new(InMemoryMessageStorage::new());
    let broker = Arc::new(InMemoryBroker::new(serializer.clone()));

    let bus = EventBus::builder(config.bus.clone())
        .with_storage(storage)
        .with_sender(broker.clone())
        .with_subscriber(broker)
        .with_serializer(serializer)
        .add_handler::<OrderPlaced, _>(LogReceipt)
        .build()?;
    let running = bus.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sampler = tokio::spawn(publish_samples(running.bus().publisher(), shutdown_rx.clone()));

    let server = if config.server.enable_read_api {
        let addr = config.server.socket_addr()?;
        let app = read_api_router()
            .with_state(ReadApiState::new(running.bus().queries()))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Read API listening");

        let mut stop = shutdown_rx;
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.wait_for(|stopped| *stopped).await;
                })
                .await
        }))
    } else {
        None
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down gracefully...");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sampler.await {
        tracing::warn!(error = %e, "Sample publisher ended abnormally");
    }
    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Read API server failed"),
            Err(e) => tracing::error!(error = %e, "Read API server task failed"),
            Ok(Ok(())) => {}
        }
    }

    for exit in running.shutdown().await {
        if let Err(e) = exit.result {
            tracing::warn!(task = %exit.name, error = %e, "Task ended with error");
        }
    }
    Ok(())
}

fn setup_logging(server: &ServerConfig) -> Result<(), BoxError> {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&server.log_level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if server.log_json {
        builder.json().try_init()?;
    } else {
        builder.try_init()?;
    }
    Ok(())
}

/// Publishes one order per tick until shutdown.
async fn publish_samples(publisher: Arc<EventPublisher>, mut shutdown: watch::Receiver<bool>) {
    let orders = Arc::new(AtomicU64::new(0));
    let mut interval = tokio::time::interval(PUBLISH_EVERY);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }

            _ = interval.tick() => {
                let order_id = orders.load(Ordering::SeqCst) + 1;
                let tx = InMemoryTransaction::begin();

                let stored = orders.clone();
                if let Err(e) = tx.enlist(move || {
                    stored.store(order_id, Ordering::SeqCst);
                }) {
                    tracing::warn!(error = %e, "Could not stage order write");
                    continue;
                }

                let event = OrderPlaced { order_id };
                match publisher.publish(&event, Some(tx.context()), None).await {
                    Ok(msg_id) => match tx.commit() {
                        Ok(()) => {
                            tracing::debug!(order_id, msg_id = %msg_id, "Sample order committed");
                        }
                        Err(e) => {
                            tracing::warn!(order_id, error = %e, "Sample order commit rejected");
                        }
                    },
                    Err(e) => {
                        tx.rollback();
                        tracing::warn!(order_id, error = %e, "Sample order rolled back");
                    }
                }
            }
        }
    }
}
