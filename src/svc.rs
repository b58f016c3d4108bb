//! Service Lifecycle
//!
//! Background services share one lifecycle contract. An [`Orchestrator`]
//! initializes and runs each service, waits for its "started" notification,
//! and on shutdown signals stop and waits for "finished".
//!
//! ```text
//! uninitialized -> configuring -> ready -> running -> stopping -> stopped
//!                       |
//!                       +--> failed (startup error, service stays inert)
//! ```

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::error::CrawlerError;

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Configuring,
    Ready,
    Running,
    Stopping,
    Stopped,
    /// Startup failed; the service never runs
    Failed,
}

/// Notification sent by a service to its orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Emitted once, right before background execution begins
    Started(&'static str),

    /// Emitted once, after the background work fully terminated
    Finished(&'static str),
}

/// Sending half of the orchestrator's event channel
pub type EventSender = mpsc::UnboundedSender<ServiceEvent>;

/// Lifecycle contract of a background service
#[async_trait]
pub trait Service: Send + Sync {
    /// Stable identifier used in logs
    fn name(&self) -> &'static str;

    fn state(&self) -> ServiceState;

    /// Prepare the service. An error leaves it inert.
    async fn init(&mut self) -> Result<(), CrawlerError>;

    /// Start background execution without blocking the caller.
    ///
    /// Sends [`ServiceEvent::Started`] before returning `Ok`, and
    /// [`ServiceEvent::Finished`] once the background work has ended.
    async fn run(&mut self, events: EventSender) -> Result<(), CrawlerError>;

    /// Request stop. Idempotent, and safe before the service runs.
    fn stop(&self);
}

/// Shared, observable state of a service
#[derive(Clone)]
pub struct StateCell(Arc<watch::Sender<ServiceState>>);

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServiceState::Uninitialized);
        Self(Arc::new(tx))
    }

    pub fn get(&self) -> ServiceState {
        *self.0.borrow()
    }

    pub fn set(&self, state: ServiceState) {
        self.0.send_replace(state);
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.0.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts, tracks and stops a set of services
pub struct Orchestrator {
    services: Vec<Box<dyn Service>>,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<ServiceEvent>,
    /// Services that acknowledged start and have not finished yet
    running: HashSet<&'static str>,
    wait_timeout: Duration,
}

impl Orchestrator {
    pub fn new(wait_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            services: Vec::new(),
            events_tx,
            events_rx,
            running: HashSet::new(),
            wait_timeout,
        }
    }

    pub fn register(&mut self, service: Box<dyn Service>) {
        self.services.push(service);
    }

    /// Names of services currently running
    pub fn running(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.running.iter().copied().collect();
        names.sort_unstable();
        names
    }

    /// Initialize and run every registered service, then wait until each
    /// successfully run service reported it started. Returns how many did.
    pub async fn start(&mut self) -> usize {
        let mut expected = HashSet::new();

        for service in self.services.iter_mut() {
            let name = service.name();

            if let Err(e) = service.init().await {
                error!("💥 Critical: can not initialize {}; {}", name, e);
                continue;
            }

            match service.run(self.events_tx.clone()).await {
                Ok(()) => {
                    expected.insert(name);
                }
                Err(e) => error!("💥 Critical: {} did not start; {}", name, e),
            }
        }

        let started = self.wait_for(expected, true).await;
        info!("✅ {} service(s) started", started);
        started
    }

    /// Signal stop to every service and wait until running ones finished
    pub async fn shutdown(&mut self) {
        info!("🛑 Stopping {} service(s)", self.running.len());

        for service in self.services.iter() {
            service.stop();
        }

        let pending = self.running.clone();
        let finished = self.wait_for(pending, false).await;
        info!("👋 {} service(s) finished", finished);
    }

    /// Consume events until every name in `pending` produced the awaited kind
    async fn wait_for(&mut self, mut pending: HashSet<&'static str>, started: bool) -> usize {
        let mut count = 0;
        let deadline = tokio::time::Instant::now() + self.wait_timeout;

        while !pending.is_empty() {
            let event = match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    warn!("Timed out waiting for services: {:?}", pending);
                    break;
                }
            };

            match event {
                ServiceEvent::Started(name) => {
                    self.running.insert(name);
                    if started && pending.remove(name) {
                        count += 1;
                    }
                }
                ServiceEvent::Finished(name) => {
                    self.running.remove(name);
                    if started {
                        // finished before start was awaited
                        pending.remove(name);
                    } else if pending.remove(name) {
                        count += 1;
                    }
                }
            }
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Service that finishes as soon as it is stopped
    struct EchoService {
        name: &'static str,
        fail_init: bool,
        state: StateCell,
        events: Option<EventSender>,
    }

    impl EchoService {
        fn new(name: &'static str, fail_init: bool) -> Self {
            Self {
                name,
                fail_init,
                state: StateCell::new(),
                events: None,
            }
        }
    }

    #[async_trait]
    impl Service for EchoService {
        fn name(&self) -> &'static str {
            self.name
        }

        fn state(&self) -> ServiceState {
            self.state.get()
        }

        async fn init(&mut self) -> Result<(), CrawlerError> {
            if self.fail_init {
                self.state.set(ServiceState::Failed);
                return Err(CrawlerError::NotReady(self.name));
            }
            self.state.set(ServiceState::Ready);
            Ok(())
        }

        async fn run(&mut self, events: EventSender) -> Result<(), CrawlerError> {
            if self.state.get() != ServiceState::Ready {
                return Err(CrawlerError::NotReady(self.name));
            }
            self.state.set(ServiceState::Running);
            let _ = events.send(ServiceEvent::Started(self.name));
            self.events = Some(events);
            Ok(())
        }

        fn stop(&self) {
            if self.state.get() == ServiceState::Running {
                self.state.set(ServiceState::Stopped);
                if let Some(events) = &self.events {
                    let _ = events.send(ServiceEvent::Finished(self.name));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_orchestrator_start_and_shutdown() {
        let mut orchestrator = Orchestrator::new(Duration::from_secs(5));
        orchestrator.register(Box::new(EchoService::new("alpha", false)));
        orchestrator.register(Box::new(EchoService::new("beta", false)));

        assert_eq!(orchestrator.start().await, 2);
        assert_eq!(orchestrator.running(), vec!["alpha", "beta"]);

        orchestrator.shutdown().await;
        assert!(orchestrator.running().is_empty());
    }

    #[tokio::test]
    async fn test_failed_service_stays_inert() {
        let mut orchestrator = Orchestrator::new(Duration::from_secs(5));
        orchestrator.register(Box::new(EchoService::new("broken", true)));
        orchestrator.register(Box::new(EchoService::new("healthy", false)));

        assert_eq!(orchestrator.start().await, 1);
        assert_eq!(orchestrator.running(), vec!["healthy"]);
        assert_eq!(orchestrator.services[0].state(), ServiceState::Failed);

        orchestrator.shutdown().await;
        assert_eq!(orchestrator.services[0].state(), ServiceState::Failed);
    }

    #[test]
    fn test_state_cell() {
        let cell = StateCell::new();
        let rx = cell.subscribe();
        assert_eq!(cell.get(), ServiceState::Uninitialized);

        cell.clone().set(ServiceState::Running);
        assert_eq!(cell.get(), ServiceState::Running);
        assert_eq!(*rx.borrow(), ServiceState::Running);
    }
}
