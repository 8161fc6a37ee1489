// Simulation — one tokio task per node, linked by unbounded channels
//
// Frames cross task boundaries as bincode bytes. Each inbox is FIFO, so
// every link delivers in send order.

use anyhow::{Context, Result};
use capmesh_core::message::{decode_message, encode_message};
use capmesh_core::search::SearchLog;
use capmesh_core::{
    DiscoveryNode, Message, MessageHandler, NeighborListener, NodeConfig, Parameter, PeerId,
    SearchKind, Taxonomy, Transport,
};
use clap::ValueEnum;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Topology {
    Line,
    Ring,
    Star,
}

impl Topology {
    /// Undirected links between `nodes` peers numbered from 0. The star hub
    /// is peer 0.
    pub fn links(self, nodes: u32) -> Vec<(PeerId, PeerId)> {
        let mut links: Vec<(PeerId, PeerId)> = match self {
            Topology::Line | Topology::Ring => {
                (1..nodes).map(|n| (PeerId(n - 1), PeerId(n))).collect()
            }
            Topology::Star => (1..nodes).map(|n| (PeerId(0), PeerId(n))).collect(),
        };
        if self == Topology::Ring && nodes > 2 {
            links.push((PeerId(nodes - 1), PeerId(0)));
        }
        links
    }
}

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub nodes: u32,
    pub topology: Topology,
    pub provide: Vec<Parameter>,
    pub search: Vec<Parameter>,
    pub kind: SearchKind,
    pub duration: Duration,
    /// Aging period; `None` disables aging
    pub age_every: Option<Duration>,
    pub save_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct FoundReport {
    pub provider: u32,
    pub parameters: Vec<String>,
    pub distance: u32,
}

#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub id: u32,
    pub local: Vec<String>,
    /// Representative → effective distance
    pub distances: BTreeMap<String, u32>,
    pub active_searches: usize,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub settled: bool,
    pub frames: usize,
    pub found: Vec<FoundReport>,
    pub nodes: Vec<NodeReport>,
}

enum Frame {
    Message(Vec<u8>),
    Neighbors {
        appeared: BTreeSet<PeerId>,
        disappeared: BTreeSet<PeerId>,
    },
    Shutdown,
}

/// Frames sent but not yet processed, used to detect quiescence
#[derive(Default)]
struct InFlight {
    pending: AtomicUsize,
    total: AtomicUsize,
}

impl InFlight {
    fn sent(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn done(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }
}

type Inboxes = Arc<HashMap<PeerId, mpsc::UnboundedSender<Frame>>>;

struct ChannelTransport {
    id: PeerId,
    neighbors: RwLock<BTreeSet<PeerId>>,
    inboxes: Inboxes,
    in_flight: Arc<InFlight>,
}

impl ChannelTransport {
    fn send(&self, to: PeerId, frame: Frame) {
        let Some(inbox) = self.inboxes.get(&to) else {
            return;
        };
        self.in_flight.sent();
        if inbox.send(frame).is_err() {
            self.in_flight.done();
            debug!(peer = %self.id, to = %to, "inbox closed");
        }
    }

    fn link_up(&self, neighbor: PeerId) {
        self.neighbors.write().insert(neighbor);
    }
}

impl Transport for ChannelTransport {
    fn local_id(&self) -> PeerId {
        self.id
    }

    fn neighbors(&self) -> BTreeSet<PeerId> {
        self.neighbors.read().clone()
    }

    fn enqueue_broadcast(&self, message: Message) {
        let bytes = match encode_message(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer = %self.id, "dropping {}: {}", message, e);
                return;
            }
        };
        for neighbor in self.neighbors() {
            self.send(neighbor, Frame::Message(bytes.clone()));
        }
    }
}

struct SimNode {
    node: Arc<DiscoveryNode>,
    transport: Arc<ChannelTransport>,
    log: Arc<SearchLog>,
}

pub struct Simulation {
    nodes: BTreeMap<PeerId, SimNode>,
    in_flight: Arc<InFlight>,
    tasks: Vec<JoinHandle<()>>,
}

impl Simulation {
    /// Build the nodes and spawn their tasks. Links come up in `connect`.
    pub fn spawn(
        config: &NodeConfig,
        taxonomy: Arc<dyn Taxonomy>,
        count: u32,
        age_every: Option<Duration>,
    ) -> Result<Self> {
        let in_flight = Arc::new(InFlight::default());
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for n in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(PeerId(n), tx);
            receivers.push((PeerId(n), rx));
        }
        let inboxes: Inboxes = Arc::new(senders);

        let mut nodes = BTreeMap::new();
        let mut tasks = Vec::new();
        for (id, rx) in receivers {
            let transport = Arc::new(ChannelTransport {
                id,
                neighbors: RwLock::new(BTreeSet::new()),
                inboxes: inboxes.clone(),
                in_flight: in_flight.clone(),
            });
            let log = Arc::new(SearchLog::with_reply(format!("hello from {}", id).into_bytes()));
            let node = Arc::new(
                DiscoveryNode::new(config, taxonomy.clone(), transport.clone(), log.clone())
                    .with_context(|| format!("Failed to build node {}", id))?,
            );
            tasks.push(tokio::spawn(run_node(
                node.clone(),
                rx,
                in_flight.clone(),
                age_every,
            )));
            nodes.insert(
                id,
                SimNode {
                    node,
                    transport,
                    log,
                },
            );
        }

        Ok(Self {
            nodes,
            in_flight,
            tasks,
        })
    }

    pub fn node(&self, id: PeerId) -> Option<&Arc<DiscoveryNode>> {
        self.nodes.get(&id).map(|sim| &sim.node)
    }

    /// Bring links up. Both ends learn of each other through their inbox.
    pub fn connect(&self, links: &[(PeerId, PeerId)]) {
        let mut appeared: BTreeMap<PeerId, BTreeSet<PeerId>> = BTreeMap::new();
        for (a, b) in links {
            let (Some(left), Some(right)) = (self.nodes.get(a), self.nodes.get(b)) else {
                warn!("link {}-{} names an unknown node", a, b);
                continue;
            };
            left.transport.link_up(*b);
            right.transport.link_up(*a);
            appeared.entry(*a).or_default().insert(*b);
            appeared.entry(*b).or_default().insert(*a);
        }
        for (id, neighbors) in appeared {
            if let Some(sim) = self.nodes.get(&id) {
                sim.transport.send(
                    id,
                    Frame::Neighbors {
                        appeared: neighbors,
                        disappeared: BTreeSet::new(),
                    },
                );
            }
        }
    }

    /// Wait until no frame is in flight. Returns false on timeout.
    pub async fn settle(&self, deadline: Instant) -> bool {
        loop {
            if self.in_flight.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn frames(&self) -> usize {
        self.in_flight.total.load(Ordering::Relaxed)
    }

    pub async fn shutdown(self) -> Vec<SimNodeState> {
        for sim in self.nodes.values() {
            sim.transport.send(sim.node.id(), Frame::Shutdown);
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("node task failed: {}", e);
            }
        }
        self.nodes
            .into_values()
            .map(|sim| SimNodeState {
                node: sim.node,
                log: sim.log,
            })
            .collect()
    }
}

/// What is left of a node once its task stopped
pub struct SimNodeState {
    pub node: Arc<DiscoveryNode>,
    pub log: Arc<SearchLog>,
}

async fn run_node(
    node: Arc<DiscoveryNode>,
    mut inbox: mpsc::UnboundedReceiver<Frame>,
    in_flight: Arc<InFlight>,
    age_every: Option<Duration>,
) {
    let mut aging = age_every.map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let frame = match aging.as_mut() {
            Some(ticker) => tokio::select! {
                frame = inbox.recv() => frame,
                _ = ticker.tick() => {
                    node.age();
                    continue;
                }
            },
            None => inbox.recv().await,
        };
        let Some(frame) = frame else { break };

        let stop = matches!(frame, Frame::Shutdown);
        match frame {
            Frame::Message(bytes) => match decode_message(&bytes) {
                Ok(message) => node.handle_message(&message),
                Err(e) => warn!(peer = %node.id(), "undecodable frame: {}", e),
            },
            Frame::Neighbors {
                appeared,
                disappeared,
            } => node.neighbors_changed(&appeared, &disappeared),
            Frame::Shutdown => {}
        }
        in_flight.done();
        if stop {
            break;
        }
    }
    debug!(peer = %node.id(), "node task stopped");
}

/// Run one scenario: the last node provides, node 0 searches
pub async fn run(
    config: NodeConfig,
    taxonomy: Arc<dyn Taxonomy>,
    options: SimulationOptions,
) -> Result<SimulationReport> {
    anyhow::ensure!(options.nodes >= 2, "A simulation needs at least two nodes");
    let deadline = Instant::now() + options.duration;

    let sim = Simulation::spawn(&config, taxonomy, options.nodes, options.age_every)?;
    sim.connect(&options.topology.links(options.nodes));
    let mut settled = sim.settle(deadline).await;

    let provider = PeerId(options.nodes - 1);
    if let Some(node) = sim.node(provider) {
        for p in &options.provide {
            node.add_local_parameter(p.clone());
        }
        let result = node.commit();
        info!(peer = %provider, added = result.added.len(), "provider committed");
    }
    settled &= sim.settle(deadline).await;

    if !options.search.is_empty() {
        if let Some(node) = sim.node(PeerId(0)) {
            let id = node.start_search(
                options.search.iter().cloned().collect(),
                None,
                options.kind,
            );
            info!(peer = %PeerId(0), search = %id, kind = %options.kind, "search started");
        }
        settled &= sim.settle(deadline).await;
    }
    if !settled {
        warn!(
            "simulation did not settle within {} ms",
            options.duration.as_millis()
        );
    }

    let frames = sim.frames();
    let states = sim.shutdown().await;

    if let Some(dir) = &options.save_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for state in &states {
            let id = state.node.id();
            state
                .node
                .save_table(&dir.join(format!("table-{}.xml", id)))
                .with_context(|| format!("Failed to save table of node {}", id))?;
            state
                .node
                .save_routes(&dir.join(format!("routes-{}.xml", id)))
                .with_context(|| format!("Failed to save routes of node {}", id))?;
        }
    }

    let found = states
        .iter()
        .find(|state| state.node.id() == PeerId(0))
        .map(found_reports)
        .unwrap_or_default();

    Ok(SimulationReport {
        settled,
        frames,
        found,
        nodes: states.iter().map(node_report).collect(),
    })
}

fn found_reports(origin: &SimNodeState) -> Vec<FoundReport> {
    use capmesh_core::SearchEvent;

    origin
        .log
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SearchEvent::ParametersFound {
                source,
                parameters,
                distance,
                ..
            } => Some(FoundReport {
                provider: source.0,
                parameters: parameters.iter().map(|p| p.to_string()).collect(),
                distance,
            }),
            _ => None,
        })
        .collect()
}

fn node_report(state: &SimNodeState) -> NodeReport {
    let table = state.node.table().read();
    NodeReport {
        id: state.node.id().0,
        local: table.local_parameters().iter().map(|p| p.to_string()).collect(),
        distances: table
            .rows()
            .map(|(p, distances)| (p.to_string(), distances.effective_distance()))
            .collect(),
        active_searches: state.node.active_searches().len(),
    }
}
