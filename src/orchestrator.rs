//! The node lifecycle state machine.
//!
//! Sequences the bootstrap/connect handshake, the bounded
//! wait-for-minimum-peers loop, the retrying store/retrieve workflow,
//! and finally the indefinite connectivity monitor. Transitions are
//! strictly forward-only; the only revisited work is the retry
//! sub-loops inside AwaitingPeers and StoringValue.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::address;
use crate::bootstrap::{BootstrapConnector, BootstrapTarget};
use crate::config::{Config, ConfigError};
use crate::kv::{KvClient, KvRecord, RetrieveError, StoreError, StoreReport};
use crate::monitor;
use crate::overlay::Overlay;
use crate::readiness;

/// Lifecycle states, entered in order. `Connecting` is skipped when the
/// node is itself a bootstrap node; `Monitoring` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Connecting,
    Bootstrapping,
    AwaitingPeers,
    StoringValue,
    RetrievingValue,
    Monitoring,
}

/// What happened on the way to the monitoring loop.
///
/// Phases skipped because the top-level deadline ran out are `None`.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Whether the bootstrap connection attempt succeeded. `false` when
    /// it failed or was skipped (bootstrap node, exhausted deadline).
    pub connected: bool,
    /// Whether the overlay's bootstrap procedure succeeded.
    pub bootstrapped: bool,
    /// Peer count observed when readiness ended, reached or not.
    pub ready_peers: usize,
    /// Whether readiness timed out before reaching the minimum.
    pub readiness_timed_out: bool,
    pub store: Option<Result<StoreReport, StoreError>>,
    pub retrieved: Option<Result<KvRecord, RetrieveError>>,
}

/// Drives a node from cold start to the monitoring loop.
#[derive(Debug)]
pub struct Orchestrator<O> {
    overlay: Arc<O>,
    config: Config,
    state: State,
}

impl<O: Overlay> Orchestrator<O> {
    pub fn new(overlay: Arc<O>, config: Config) -> Orchestrator<O> {
        Orchestrator {
            overlay,
            config,
            state: State::Init,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    // === Public Methods ===

    /// Runs the full lifecycle, then monitors connectivity until the
    /// `shutdown` channel fires (or its sender is dropped).
    ///
    /// Only configuration errors are returned, and only before any
    /// network operation; every later failure is reported and the run
    /// continues in reduced-connectivity mode.
    pub fn run(&mut self, shutdown: flume::Receiver<()>) -> Result<(), ConfigError> {
        let summary = self.run_until_monitoring()?;
        debug!(?summary, "Lifecycle complete, entering monitoring loop");

        monitor::run(
            self.overlay.as_ref(),
            self.config.monitor_interval,
            &shutdown,
        );

        Ok(())
    }

    /// Runs every state up to (and into) `Monitoring`, without starting
    /// the monitoring loop itself.
    pub fn run_until_monitoring(&mut self) -> Result<RunSummary, ConfigError> {
        // Fail fast on configuration problems, before any network
        // operation.
        self.config.validate()?;

        let target = if self.config.is_bootstrap {
            None
        } else {
            match &self.config.bootstrap_addr {
                Some(addr) => Some(BootstrapTarget::parse(addr)?),
                None => return Err(ConfigError::MissingBootstrapAddr),
            }
        };

        let identity = self.overlay.identity();
        info!(peer_id = %identity.peer_id, "Node created");
        for addr in address::dialable_addrs(&identity) {
            info!(%addr, "Node address");
        }

        // Covers everything up to Monitoring, which is unbounded.
        let deadline = Instant::now() + self.config.run_deadline;
        let mut summary = RunSummary::default();

        match &target {
            Some(target) => self.connect_phase(target, deadline, &mut summary),
            None => info!("Running as a bootstrap node"),
        }

        self.bootstrap_phase(deadline, &mut summary);
        self.readiness_phase(deadline, &mut summary);
        self.kv_phase(deadline, &mut summary);

        self.advance(State::Monitoring);

        Ok(summary)
    }

    // === Private Methods ===

    /// Single connection attempt to the bootstrap peer, on a joined
    /// worker thread. Failure is a warning, not fatal; the run continues
    /// with zero confirmed peers.
    fn connect_phase(&mut self, target: &BootstrapTarget, deadline: Instant, summary: &mut RunSummary) {
        self.advance(State::Connecting);

        if remaining(deadline).is_zero() {
            warn!("Run deadline exhausted, skipping bootstrap connection");
            return;
        }

        let connector = BootstrapConnector::new(Arc::clone(&self.overlay));

        match connector.connect(target, self.config.connect_timeout) {
            Ok(ack) => {
                info!(remote = %ack.remote, "Connected to bootstrap node");
                summary.connected = true;
            }
            Err(error) => {
                warn!(%error, "Failed to connect to bootstrap node, continuing with reduced connectivity");
            }
        }

        thread::sleep(self.config.connect_settle);
    }

    fn bootstrap_phase(&mut self, deadline: Instant, summary: &mut RunSummary) {
        self.advance(State::Bootstrapping);

        if remaining(deadline).is_zero() {
            warn!("Run deadline exhausted, skipping overlay bootstrap");
            return;
        }

        match self.overlay.bootstrap() {
            Ok(()) => {
                info!("Overlay bootstrapped");
                summary.bootstrapped = true;
            }
            Err(error) => {
                warn!(%error, "Overlay bootstrap failed, continuing with reduced connectivity");
            }
        }
    }

    /// Bounded wait for the minimum peer count. A timeout is reported
    /// and the key/value workflow is attempted regardless.
    fn readiness_phase(&mut self, deadline: Instant, summary: &mut RunSummary) {
        self.advance(State::AwaitingPeers);

        let budget = self.config.max_wait.min(remaining(deadline));

        match readiness::wait_for_min_peers(
            self.overlay.as_ref(),
            self.config.min_peers,
            budget,
            self.config.poll_interval,
        ) {
            Ok(count) => {
                summary.ready_peers = count;
            }
            Err(timeout) => {
                warn!(%timeout, "Continuing with available peers");
                summary.ready_peers = timeout.last_observed;
                summary.readiness_timed_out = true;
            }
        }
    }

    /// Store with bounded retries, settle, then a single retrieve.
    fn kv_phase(&mut self, deadline: Instant, summary: &mut RunSummary) {
        let client = KvClient::new(Arc::clone(&self.overlay));

        self.advance(State::StoringValue);

        if remaining(deadline).is_zero() {
            warn!("Run deadline exhausted, skipping key/value workflow");
            self.advance(State::RetrievingValue);
            return;
        }

        let record = KvRecord::new(
            self.config.record_key.clone(),
            self.config.record_value.clone(),
        );

        let stored = client.store_with_retry(&record, &self.config.store_retry);
        if let Err(error) = &stored {
            warn!(%error, "Store exhausted all attempts");
        }
        summary.store = Some(stored);

        // Let replication propagate before looking the key back up.
        thread::sleep(self.config.replication_settle);

        self.advance(State::RetrievingValue);

        if remaining(deadline).is_zero() {
            warn!("Run deadline exhausted, skipping retrieve");
            return;
        }

        let retrieved = client.retrieve(&self.config.record_key);
        match &retrieved {
            Ok(found) => {
                info!(key = %found.key, bytes = found.value.len(), "Retrieved value");
            }
            Err(error) => {
                // A miss here is not a store failure; replication may
                // still be propagating.
                warn!(%error, "Retrieve failed");
            }
        }
        summary.retrieved = Some(retrieved);
    }

    fn advance(&mut self, next: State) {
        debug!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }
}

/// Time left before `deadline`, zero once it has passed.
fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

impl RunSummary {
    /// The retrieved value, when the retrieve phase ran and hit.
    pub fn retrieved_value(&self) -> Option<&Bytes> {
        match &self.retrieved {
            Some(Ok(record)) => Some(&record.value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::overlay::scripted::ScriptedOverlay;
    use crate::overlay::{BootstrapError, ConnectError, PutError};

    fn fast_config() -> Config {
        Config {
            bootstrap_addr: Some("/ip4/10.0.0.1/tcp/4001/p2p/boot".to_string()),
            max_wait: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            connect_settle: Duration::ZERO,
            replication_settle: Duration::ZERO,
            store_retry: crate::config::RetryPolicy {
                max_attempts: 2,
                inter_delay: Duration::from_millis(10),
            },
            ..Default::default()
        }
    }

    #[test]
    fn missing_bootstrap_addr_fails_before_any_network_operation() {
        let overlay = Arc::new(ScriptedOverlay::new());
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&overlay),
            Config {
                bootstrap_addr: None,
                ..fast_config()
            },
        );

        let error = orchestrator
            .run_until_monitoring()
            .expect_err("must fail fast");

        assert_eq!(error, ConfigError::MissingBootstrapAddr);
        assert_eq!(overlay.peers_calls.load(Ordering::SeqCst), 0);
        assert_eq!(overlay.put_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.state(), State::Init);
    }

    #[test]
    fn malformed_bootstrap_addr_fails_before_any_network_operation() {
        let overlay = Arc::new(ScriptedOverlay::new());
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&overlay),
            Config {
                bootstrap_addr: Some("not-an-address".to_string()),
                ..fast_config()
            },
        );

        let error = orchestrator
            .run_until_monitoring()
            .expect_err("must fail fast");

        assert!(matches!(error, ConfigError::InvalidBootstrapAddr { .. }));
        assert_eq!(overlay.peers_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn happy_path_reaches_monitoring_with_record_roundtrip() {
        let overlay = Arc::new(
            ScriptedOverlay::new()
                .with_peer_counts(&[3])
                .with_get_result(Ok(Bytes::from_static(b"Hello, DHT!"))),
        );
        let mut orchestrator = Orchestrator::new(Arc::clone(&overlay), fast_config());

        let summary = orchestrator
            .run_until_monitoring()
            .expect("valid configuration");

        assert!(summary.connected);
        assert!(summary.bootstrapped);
        assert_eq!(summary.ready_peers, 3);
        assert!(!summary.readiness_timed_out);
        assert_eq!(
            summary.store,
            Some(Ok(StoreReport { attempts: 1 }))
        );
        assert_eq!(
            summary.retrieved_value(),
            Some(&Bytes::from_static(b"Hello, DHT!"))
        );
        assert_eq!(orchestrator.state(), State::Monitoring);
    }

    #[test]
    fn connect_and_bootstrap_failures_degrade_instead_of_aborting() {
        let overlay = Arc::new(
            ScriptedOverlay::new()
                .with_peer_counts(&[0])
                .with_put_results(vec![Err(PutError::InsufficientPeers { peers: 0 })]),
        );
        *overlay.connect_result.lock().expect("poisoned") =
            Err(ConnectError::Timeout(Duration::from_secs(1)));
        *overlay.bootstrap_result.lock().expect("poisoned") =
            Err(BootstrapError::NoKnownPeers);

        let mut orchestrator = Orchestrator::new(Arc::clone(&overlay), fast_config());

        let summary = orchestrator
            .run_until_monitoring()
            .expect("network failures are not fatal");

        assert!(!summary.connected);
        assert!(!summary.bootstrapped);
        assert!(summary.readiness_timed_out);
        assert_eq!(summary.ready_peers, 0);

        let store = summary.store.expect("store phase ran");
        let error = store.expect_err("put always fails");
        assert_eq!(error.attempts, 2);
        assert_eq!(overlay.put_calls.load(Ordering::SeqCst), 2);

        assert!(summary.retrieved.expect("retrieve phase ran").is_err());
        assert_eq!(orchestrator.state(), State::Monitoring);
    }

    #[test]
    fn bootstrap_node_skips_connecting() {
        let overlay = Arc::new(
            ScriptedOverlay::new()
                .with_peer_counts(&[3])
                .with_get_result(Ok(Bytes::from_static(b"Hello, DHT!"))),
        );
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&overlay),
            Config {
                is_bootstrap: true,
                bootstrap_addr: None,
                ..fast_config()
            },
        );

        let summary = orchestrator
            .run_until_monitoring()
            .expect("bootstrap node needs no address");

        assert!(!summary.connected);
        assert!(summary.bootstrapped);
        assert_eq!(orchestrator.state(), State::Monitoring);
    }

    #[test]
    fn exhausted_deadline_skips_to_monitoring() {
        let overlay = Arc::new(ScriptedOverlay::new());
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&overlay),
            Config {
                run_deadline: Duration::ZERO,
                ..fast_config()
            },
        );

        let summary = orchestrator
            .run_until_monitoring()
            .expect("valid configuration");

        assert!(!summary.connected);
        assert!(!summary.bootstrapped);
        assert!(summary.store.is_none());
        assert!(summary.retrieved.is_none());
        assert_eq!(overlay.put_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.state(), State::Monitoring);
    }

    #[test]
    fn shutdown_signal_ends_the_monitoring_loop() {
        let overlay = Arc::new(
            ScriptedOverlay::new()
                .with_peer_counts(&[3])
                .with_get_result(Ok(Bytes::from_static(b"Hello, DHT!"))),
        );
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&overlay),
            Config {
                monitor_interval: Duration::from_millis(10),
                ..fast_config()
            },
        );

        let (sender, receiver) = flume::bounded::<()>(1);

        let handle = thread::spawn(move || orchestrator.run(receiver));

        thread::sleep(Duration::from_millis(100));
        sender.send(()).expect("orchestrator is monitoring");

        handle
            .join()
            .expect("orchestrator thread exits cleanly")
            .expect("valid configuration");
    }
}
