use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use murmur_broker::{Delivery, Subscriber};
use murmur_types::{Error, Result};

use crate::handlers::DeliveryHandler;

/// Error fragments that mark a failure worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "timeout",
    "temporary failure",
    "service unavailable",
];

/// Whether a failed delivery goes back on its queue.
pub fn should_requeue(err: &Error) -> bool {
    let text = err.to_string().to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// One consumer per `(exchange, queue, routing key)`, acknowledging manually.
pub struct Consumer {
    pub exchange: &'static str,
    pub queue: &'static str,
    pub routing_key: &'static str,
    handler: Arc<dyn DeliveryHandler>,
}

impl Consumer {
    pub fn new(
        exchange: &'static str,
        queue: &'static str,
        routing_key: &'static str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Self {
        Self {
            exchange,
            queue,
            routing_key,
            handler,
        }
    }

    pub fn spawn(self, subscriber: Arc<dyn Subscriber>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(subscriber.as_ref()).await {
                error!("Consumer for {} failed to start: {}", self.queue, e);
            }
        })
    }

    /// Consumes until the broker closes the stream or a handler panics.
    /// A panic is logged and ends this consumer; it is not restarted.
    pub async fn run(&self, subscriber: &dyn Subscriber) -> Result<()> {
        let mut deliveries = subscriber.consume(self.queue).await?;
        info!(
            "Consuming {} ({} / {})",
            self.queue, self.exchange, self.routing_key
        );

        while let Some(delivery) = deliveries.recv().await {
            let outcome = AssertUnwindSafe(self.handler.handle(&delivery.body))
                .catch_unwind()
                .await;

            match outcome {
                Ok(result) => self.settle(&delivery, result).await,
                Err(panic) => {
                    error!(
                        "Handler for {} panicked on delivery {}: {}",
                        self.queue,
                        delivery.tag,
                        panic_message(panic.as_ref())
                    );
                    if let Err(e) = delivery.nack(false).await {
                        warn!("Failed to drop delivery {}: {}", delivery.tag, e);
                    }
                    break;
                }
            }
        }

        info!("Consumer for {} stopped", self.queue);
        Ok(())
    }

    async fn settle(&self, delivery: &Delivery, result: Result<()>) {
        let settled = match result {
            Ok(()) => {
                debug!("Handled delivery {} from {}", delivery.tag, self.queue);
                delivery.ack().await
            }
            Err(e) => {
                let requeue = should_requeue(&e);
                warn!(
                    "Delivery {} from {} failed (requeue: {}): {}",
                    delivery.tag, self.queue, requeue, e
                );
                delivery.nack(requeue).await
            }
        };
        if let Err(e) = settled {
            warn!("Failed to settle delivery {}: {}", delivery.tag, e);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
