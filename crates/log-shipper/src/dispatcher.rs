// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::DestinationConfig;
use crate::destinations::Destination;
use crate::errors::DeliveryError;
use crate::queue::BatchReceiver;
use crate::records::Batch;

/// Single consumer of the delivery queue. Hands every batch to each enabled destination in
/// registration order.
pub struct Dispatcher {
    destinations: Vec<Box<dyn Destination>>,
    send_timeout: Duration,
}

impl Dispatcher {
    /// Configures every destination and keeps the enabled ones.
    #[must_use]
    pub fn new(
        destinations: Vec<Box<dyn Destination>>,
        config: &DestinationConfig,
        send_timeout: Duration,
    ) -> Self {
        let destinations = destinations
            .into_iter()
            .filter_map(|mut destination| {
                destination.configure(config);
                if destination.is_enabled() {
                    info!("Destination {} is enabled", destination.name());
                    Some(destination)
                } else {
                    info!("Destination {} is disabled", destination.name());
                    None
                }
            })
            .collect();
        Self {
            destinations,
            send_timeout,
        }
    }

    pub fn destination_names(&self) -> Vec<&'static str> {
        self.destinations.iter().map(|d| d.name()).collect()
    }

    /// Consumes the queue until it is closed and drained, then shuts the destinations down.
    pub async fn run(self, mut queue: BatchReceiver) {
        while let Some(batch) = queue.recv().await {
            self.dispatch(&batch).await;
        }

        for destination in &self.destinations {
            let result =
                match tokio::time::timeout(self.send_timeout, destination.shutdown()).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(self.send_timeout)),
                };
            if let Err(e) = result {
                error!("Failed to shut down destination {}: {e}", destination.name());
            }
        }
        info!("Dispatcher is closed");
    }

    /// Delivers one batch to every destination. A failing destination does not affect the
    /// others.
    pub async fn dispatch(&self, batch: &Batch) {
        for destination in &self.destinations {
            let result =
                match tokio::time::timeout(self.send_timeout, destination.send_batch(batch)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(self.send_timeout)),
                };
            match result {
                Ok(()) => debug!(
                    "Delivered {} records to destination {}",
                    batch.len(),
                    destination.name()
                ),
                Err(e) => error!(
                    "Failed to deliver {} records to destination {}: {e}",
                    batch.len(),
                    destination.name()
                ),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::records::{NormalizedRecord, RecordKind};
    use async_trait::async_trait;
    use serde_json::value::RawValue;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct MockDestination {
        name: &'static str,
        enabled: bool,
        fail: bool,
        delay: Option<Duration>,
        journal: Journal,
        configured_with: Arc<Mutex<Option<DestinationConfig>>>,
    }

    impl MockDestination {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                enabled: true,
                fail: false,
                delay: None,
                journal: journal.clone(),
                configured_with: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Destination for MockDestination {
        fn name(&self) -> &'static str {
            self.name
        }

        fn configure(&mut self, config: &DestinationConfig) {
            *self.configured_with.lock().unwrap() = Some(config.clone());
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn send_batch(&self, batch: &Batch) -> Result<(), DeliveryError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let id = &batch.records()[0].correlation_id;
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{id}", self.name));
            if self.fail {
                return Err(DeliveryError::Payload("boom".to_string()));
            }
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), DeliveryError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:shutdown", self.name));
            Ok(())
        }
    }

    fn batch(id: &str) -> Batch {
        Batch::new(vec![NormalizedRecord {
            time: chrono::Utc::now(),
            kind: RecordKind::Function,
            correlation_id: id.to_string(),
            payload: RawValue::from_string("\"line\"".to_string()).unwrap(),
        }])
        .unwrap()
    }

    async fn run_with(destinations: Vec<Box<dyn Destination>>, ids: &[&str], timeout: Duration) {
        let dispatcher = Dispatcher::new(destinations, &DestinationConfig::default(), timeout);
        let (tx, rx) = queue::channel(8);
        let cancel_token = CancellationToken::new();
        for id in ids {
            tx.send(batch(id), &cancel_token).await.unwrap();
        }
        tx.close();
        dispatcher.run(rx).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_destination_does_not_block_others() {
        let journal = Journal::default();
        let mut failing = MockDestination::new("first", &journal);
        failing.fail = true;
        let second = MockDestination::new("second", &journal);

        run_with(
            vec![Box::new(failing), Box::new(second)],
            &["a", "b"],
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "first:a",
                "second:a",
                "first:b",
                "second:b",
                "first:shutdown",
                "second:shutdown"
            ]
        );
        assert!(logs_contain("Failed to deliver 1 records to destination first"));
        assert!(logs_contain("Dispatcher is closed"));
    }

    #[tokio::test]
    async fn test_disabled_destinations_are_skipped() {
        let journal = Journal::default();
        let mut disabled = MockDestination::new("disabled", &journal);
        disabled.enabled = false;
        let enabled = MockDestination::new("enabled", &journal);

        let dispatcher = Dispatcher::new(
            vec![Box::new(disabled), Box::new(enabled)],
            &DestinationConfig::default(),
            Duration::from_secs(1),
        );
        assert_eq!(dispatcher.destination_names(), vec!["enabled"]);

        dispatcher.dispatch(&batch("a")).await;
        assert_eq!(*journal.lock().unwrap(), vec!["enabled:a"]);
    }

    #[tokio::test]
    async fn test_destinations_are_configured_once() {
        let journal = Journal::default();
        let destination = MockDestination::new("one", &journal);
        let configured_with = destination.configured_with.clone();
        let config = DestinationConfig {
            function_name: "fn".to_string(),
            region: "eu-west-1".to_string(),
        };

        let _dispatcher =
            Dispatcher::new(vec![Box::new(destination)], &config, Duration::from_secs(1));
        assert_eq!(*configured_with.lock().unwrap(), Some(config));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_slow_destination_times_out() {
        let journal = Journal::default();
        let mut slow = MockDestination::new("slow", &journal);
        slow.delay = Some(Duration::from_secs(5));
        let fast = MockDestination::new("fast", &journal);

        let started = std::time::Instant::now();
        run_with(
            vec![Box::new(slow), Box::new(fast)],
            &["a"],
            Duration::from_millis(50),
        )
        .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        let journal = journal.lock().unwrap();
        assert!(journal.contains(&"fast:a".to_string()));
        assert!(!journal.contains(&"slow:a".to_string()));
        assert!(logs_contain("did not answer within"));
    }

    #[tokio::test]
    async fn test_empty_queue_still_shuts_down_destinations() {
        let journal = Journal::default();
        run_with(
            vec![Box::new(MockDestination::new("only", &journal))],
            &[],
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(*journal.lock().unwrap(), vec!["only:shutdown"]);
    }
}
