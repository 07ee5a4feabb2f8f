//! NetBIOS server discovery.
//!
//! Discovery runs as a background task that broadcasts one name query per
//! round and diffs the answers against the servers it already knows. The
//! consumer pulls [`DiscoveryEvent`]s from a [`DiscoveryEvents`] stream on
//! whatever task or thread it likes; nothing is pushed onto a caller
//! context implicitly.

use {
    crate::{
        entry::ServerIdentity,
        transport::NameService,
        utils::{self, Result},
    },
    futures::Stream,
    log::{debug, info, warn},
    std::{
        collections::{HashMap, HashSet},
        net::Ipv4Addr,
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
        time::Duration,
    },
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_stream::wrappers::UnboundedReceiverStream,
    tokio_util::sync::CancellationToken,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A server answered for the first time since it was last removed.
    Added(ServerIdentity),
    /// A known server stopped answering.
    Removed(ServerIdentity),
}

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Listen window used when `start` is given a zero timeout.
    pub default_timeout: Duration,
    /// Consecutive silent rounds tolerated before a server is removed.
    pub max_missed_rounds: u32,
    /// Pause after a failed broadcast round.
    pub retry_delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> DiscoveryConfig {
        DiscoveryConfig {
            default_timeout: Duration::from_secs(4),
            max_missed_rounds: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Stream of discovery events. Ends when discovery is stopped or restarted.
pub struct DiscoveryEvents {
    rx: UnboundedReceiverStream<DiscoveryEvent>,
}

impl Stream for DiscoveryEvents {
    type Item = DiscoveryEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().rx).poll_next(cx)
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Discovery state machine: idle until `start`, discovering until `stop`.
pub struct DiscoveryService<N: NameService> {
    factory: Box<dyn Fn() -> N + Send + Sync>,
    ns: Arc<N>,
    config: DiscoveryConfig,
    running: Option<Running>,
}

impl<N: NameService> DiscoveryService<N> {
    /// `factory` builds a fresh name service; it is called again on every `stop`.
    pub fn new<F>(factory: F) -> DiscoveryService<N>
    where
        F: Fn() -> N + Send + Sync + 'static,
    {
        DiscoveryService::with_config(factory, DiscoveryConfig::default())
    }

    pub fn with_config<F>(factory: F, config: DiscoveryConfig) -> DiscoveryService<N>
    where
        F: Fn() -> N + Send + Sync + 'static,
    {
        let ns = Arc::new(factory());
        DiscoveryService {
            factory: Box::new(factory),
            ns,
            config,
            running: None,
        }
    }

    pub fn is_discovering(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Start discovering, restarting cleanly if already running.
    ///
    /// `timeout` bounds each broadcast listen window; zero selects the
    /// configured default. Must be called within a tokio runtime.
    pub fn start(&mut self, timeout: Duration) -> DiscoveryEvents {
        if self.running.is_some() {
            self.stop();
        }

        let window = self.window(timeout);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(discover(
            self.ns.clone(),
            window,
            self.config.clone(),
            tx,
            cancel.clone(),
        ));

        info!("discovery started, window {:?}", window);
        self.running = Some(Running { cancel, task });
        DiscoveryEvents {
            rx: UnboundedReceiverStream::new(rx),
        }
    }

    /// Stop discovering and rebuild the name service.
    ///
    /// Safe to call when idle. The current event stream ends.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.task.abort();
            info!("discovery stopped");
        }
        self.ns = Arc::new((self.factory)());
    }

    fn window(&self, timeout: Duration) -> Duration {
        if timeout.is_zero() {
            self.config.default_timeout
        } else {
            timeout
        }
    }

    pub async fn resolve_name_to_address(&self, name: &str) -> Option<Ipv4Addr> {
        let ns = self.ns.clone();
        let name = name.to_owned();
        utils::blocking(move || Ok(ns.resolve(&name)))
            .await
            .ok()
            .flatten()
    }

    pub async fn resolve_address_to_name(&self, addr: Ipv4Addr) -> Option<String> {
        let ns = self.ns.clone();
        utils::blocking(move || Ok(ns.inverse(addr)))
            .await
            .ok()
            .flatten()
    }
}

impl<N: NameService> Drop for DiscoveryService<N> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.task.abort();
        }
    }
}

async fn discover<N: NameService>(
    ns: Arc<N>,
    window: Duration,
    config: DiscoveryConfig,
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
    cancel: CancellationToken,
) {
    let mut tracker = Tracker::new(config.max_missed_rounds);

    while !tx.is_closed() {
        let ns = ns.clone();
        let round: Result<Vec<ServerIdentity>> = tokio::select! {
            _ = cancel.cancelled() => break,
            round = utils::blocking(move || Ok(ns.query(window)?)) => round,
        };

        let seen = match round {
            Ok(seen) => seen,
            Err(e) => {
                warn!("discovery round failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.retry_delay) => continue,
                }
            }
        };

        for event in tracker.round(seen) {
            match &event {
                DiscoveryEvent::Added(id) => info!("server added: {}", id),
                DiscoveryEvent::Removed(id) => info!("server removed: {}", id),
            }
            if tx.send(event).is_err() {
                break;
            }
        }
    }

    debug!("discovery task finished");
}

/// Liveness bookkeeping across broadcast rounds.
struct Tracker {
    max_missed: u32,
    known: HashMap<ServerIdentity, u32>,
}

impl Tracker {
    fn new(max_missed: u32) -> Tracker {
        Tracker {
            max_missed,
            known: HashMap::new(),
        }
    }

    fn round(&mut self, seen: Vec<ServerIdentity>) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        let mut answered = HashSet::new();

        for id in seen {
            if !answered.insert(id.clone()) {
                continue;
            }
            if self.known.insert(id.clone(), 0).is_none() {
                events.push(DiscoveryEvent::Added(id));
            }
        }

        let mut gone = Vec::new();
        for (id, missed) in self.known.iter_mut() {
            if answered.contains(id) {
                continue;
            }
            *missed += 1;
            if *missed > self.max_missed {
                gone.push(id.clone());
            }
        }

        gone.sort_by(|a, b| a.name.cmp(&b.name));
        for id in gone {
            self.known.remove(&id);
            events.push(DiscoveryEvent::Removed(id));
        }

        events
    }
}
