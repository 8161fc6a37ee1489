// Loopback — in-memory network of discovery nodes
//
// Frames go through one FIFO queue, so per-link order is preserved. A frame
// whose link disappeared while it was queued is lost, like a frame on air
// when the neighbor walks away.

use super::{MessageHandler, NeighborListener, Transport};
use crate::config::NodeConfig;
use crate::message::Message;
use crate::node::DiscoveryNode;
use crate::peer::PeerId;
use crate::search::{NoopListener, SearchListener};
use crate::taxonomy::Taxonomy;
use crate::CoreError;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{trace, warn};

/// Upper bound on deliveries per `run_until_idle`
pub const MAX_DELIVERIES: usize = 1_000_000;

type Links = Arc<RwLock<HashMap<PeerId, BTreeSet<PeerId>>>>;
type Queue = Arc<Mutex<VecDeque<(PeerId, Message)>>>;

/// Transport handed to each loopback node
pub struct LoopbackTransport {
    id: PeerId,
    links: Links,
    queue: Queue,
}

impl Transport for LoopbackTransport {
    fn local_id(&self) -> PeerId {
        self.id
    }

    fn neighbors(&self) -> BTreeSet<PeerId> {
        self.links.read().get(&self.id).cloned().unwrap_or_default()
    }

    fn enqueue_broadcast(&self, message: Message) {
        let neighbors = self.neighbors();
        let mut queue = self.queue.lock();
        for neighbor in neighbors {
            queue.push_back((neighbor, message.clone()));
        }
    }
}

pub struct LoopbackNetwork {
    config: NodeConfig,
    taxonomy: Arc<dyn Taxonomy>,
    nodes: BTreeMap<PeerId, Arc<DiscoveryNode>>,
    links: Links,
    queue: Queue,
    delivered: usize,
}

impl LoopbackNetwork {
    pub fn new(config: NodeConfig, taxonomy: Arc<dyn Taxonomy>) -> Self {
        Self {
            config,
            taxonomy,
            nodes: BTreeMap::new(),
            links: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            delivered: 0,
        }
    }

    pub fn add_node(&mut self, id: PeerId) -> Result<Arc<DiscoveryNode>, CoreError> {
        self.add_node_with_listener(id, Arc::new(NoopListener))
    }

    pub fn add_node_with_listener(
        &mut self,
        id: PeerId,
        listener: Arc<dyn SearchListener>,
    ) -> Result<Arc<DiscoveryNode>, CoreError> {
        let transport = Arc::new(LoopbackTransport {
            id,
            links: self.links.clone(),
            queue: self.queue.clone(),
        });
        let node = Arc::new(DiscoveryNode::new(
            &self.config,
            self.taxonomy.clone(),
            transport,
            listener,
        )?);
        self.links.write().entry(id).or_default();
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    pub fn node(&self, id: PeerId) -> Option<&Arc<DiscoveryNode>> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<DiscoveryNode>> {
        self.nodes.values()
    }

    pub fn neighbors(&self, id: PeerId) -> BTreeSet<PeerId> {
        self.links.read().get(&id).cloned().unwrap_or_default()
    }

    /// Link two nodes and tell both. Returns false if they were already linked.
    pub fn connect(&self, a: PeerId, b: PeerId) -> bool {
        if a == b {
            return false;
        }
        let added = {
            let mut links = self.links.write();
            let added = links.entry(a).or_default().insert(b);
            links.entry(b).or_default().insert(a);
            added
        };
        if added {
            self.notify(a, BTreeSet::from([b]), BTreeSet::new());
            self.notify(b, BTreeSet::from([a]), BTreeSet::new());
        }
        added
    }

    /// Cut the link between two nodes and tell both
    pub fn disconnect(&self, a: PeerId, b: PeerId) -> bool {
        let removed = {
            let mut links = self.links.write();
            let removed = links.get_mut(&a).is_some_and(|n| n.remove(&b));
            if let Some(n) = links.get_mut(&b) {
                n.remove(&a);
            }
            removed
        };
        if removed {
            self.notify(a, BTreeSet::new(), BTreeSet::from([b]));
            self.notify(b, BTreeSet::new(), BTreeSet::from([a]));
        }
        removed
    }

    /// Queued frames not yet delivered
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Total frames delivered so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Deliver the oldest queued frame. Returns false when the queue is empty.
    pub fn deliver_one(&mut self) -> bool {
        let Some((to, message)) = self.queue.lock().pop_front() else {
            return false;
        };

        let linked = self
            .links
            .read()
            .get(&to)
            .is_some_and(|n| n.contains(&message.sender));
        if !linked {
            trace!(from = %message.sender, to = %to, "link gone, frame lost");
            return true;
        }

        if let Some(node) = self.nodes.get(&to) {
            self.delivered += 1;
            node.handle_message(&message);
        }
        true
    }

    /// Pump frames until the queue drains. Returns the number delivered.
    pub fn run_until_idle(&mut self) -> usize {
        let start = self.delivered;
        let mut steps = 0;
        while self.deliver_one() {
            steps += 1;
            if steps >= MAX_DELIVERIES {
                warn!(pending = self.pending(), "delivery cap reached, network not idle");
                break;
            }
        }
        self.delivered - start
    }

    /// Age every node's table once
    pub fn age_all(&self) {
        for node in self.nodes.values() {
            node.age();
        }
    }

    fn notify(&self, id: PeerId, appeared: BTreeSet<PeerId>, disappeared: BTreeSet<PeerId>) {
        if let Some(node) = self.nodes.get(&id) {
            node.neighbors_changed(&appeared, &disappeared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::Parameter;
    use crate::taxonomy::BasicTaxonomy;

    fn peer(n: u32) -> PeerId {
        PeerId(n)
    }

    fn param(s: &str) -> Parameter {
        s.parse().unwrap()
    }

    fn network(size: u32) -> LoopbackNetwork {
        let mut net = LoopbackNetwork::new(NodeConfig::default(), Arc::new(BasicTaxonomy::new()));
        for n in 0..size {
            net.add_node(peer(n)).unwrap();
        }
        net
    }

    #[test]
    fn test_connect_is_symmetric() {
        let net = network(2);
        assert!(net.connect(peer(0), peer(1)));
        assert!(!net.connect(peer(1), peer(0)));
        assert_eq!(net.neighbors(peer(0)), BTreeSet::from([peer(1)]));
        assert_eq!(net.neighbors(peer(1)), BTreeSet::from([peer(0)]));

        assert!(net.disconnect(peer(1), peer(0)));
        assert!(net.neighbors(peer(0)).is_empty());
        assert!(!net.disconnect(peer(0), peer(1)));
    }

    #[test]
    fn test_update_reaches_line_end() {
        let mut net = network(3);
        net.connect(peer(0), peer(1));
        net.connect(peer(1), peer(2));

        let source = net.node(peer(0)).unwrap().clone();
        source.add_local_parameter(param("I-A"));
        source.commit();
        assert!(net.run_until_idle() > 0);

        assert_eq!(net.node(peer(1)).unwrap().effective_distance(&param("I-A")), 4);
        assert_eq!(net.node(peer(2)).unwrap().effective_distance(&param("I-A")), 3);
        assert_eq!(net.pending(), 0);
    }

    #[test]
    fn test_frames_on_cut_link_are_lost() {
        let mut net = network(2);
        net.connect(peer(0), peer(1));
        net.run_until_idle();

        let source = net.node(peer(0)).unwrap().clone();
        source.add_local_parameter(param("I-A"));
        source.commit();
        assert_eq!(net.pending(), 1);

        net.disconnect(peer(0), peer(1));
        net.run_until_idle();
        assert_eq!(net.node(peer(1)).unwrap().effective_distance(&param("I-A")), 0);
    }

    #[test]
    fn test_bootstrap_on_late_link() {
        let mut net = network(2);
        let source = net.node(peer(0)).unwrap().clone();
        source.add_local_parameter(param("O-B"));
        source.commit();
        assert_eq!(net.pending(), 0);

        net.connect(peer(0), peer(1));
        net.run_until_idle();
        assert_eq!(net.node(peer(1)).unwrap().distance_from(&param("O-B"), peer(0)), 4);
    }
}
