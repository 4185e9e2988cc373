//! The topology named server (§2 "Topology service"; `marklin_topology_server`).
//!
//! Owns the immutable track graph plus the (small, mutable) sensor
//! blacklist, grounded on `topology/api.h`'s `Marklin_GetTrackNodes`/
//! `Marklin_InitTrack`/blacklist request set.

use std::sync::{Arc, Mutex};
use std::thread;

use marklin_common::config::TrackLayout;
use marklin_common::ids::TaskId;

use marklin_runtime::ipc::{channel, Mailbox, ServerEndpoint};

use crate::blacklist::{SensorAddr, SensorBlacklist};
use crate::graph::TrackGraph;
use crate::layout;

/// Well-known registration name for this service.
pub const SERVER_NAME: &str = "marklin_topology_server";

enum Request {
    GetTrackNodes,
    GetSensorBlacklist,
    AddBlacklistedSensor(u8, u8),
    RemoveBlacklistedSensor(u8, u8),
    IsSensorBlacklisted(u8, u8),
}

enum Reply {
    Graph(Arc<TrackGraph>, TrackLayout),
    Blacklist(Vec<SensorAddr>),
    Bool(bool),
    Ok,
}

/// Client handle to the topology service.
#[derive(Clone)]
pub struct TopologyHandle {
    mailbox: Mailbox<Request, Reply>,
}

impl TopologyHandle {
    /// The immutable track graph and the layout it was built from.
    pub fn track_nodes(&self, me: TaskId) -> (Arc<TrackGraph>, TrackLayout) {
        match self.mailbox.call(me, Request::GetTrackNodes) {
            Reply::Graph(g, l) => (g, l),
            _ => unreachable!("GetTrackNodes replies with Graph"),
        }
    }

    pub fn sensor_blacklist(&self, me: TaskId) -> Vec<SensorAddr> {
        match self.mailbox.call(me, Request::GetSensorBlacklist) {
            Reply::Blacklist(v) => v,
            _ => unreachable!("GetSensorBlacklist replies with Blacklist"),
        }
    }

    pub fn add_blacklisted_sensor(&self, me: TaskId, bank: u8, sensor_id: u8) {
        match self.mailbox.call(me, Request::AddBlacklistedSensor(bank, sensor_id)) {
            Reply::Ok => {}
            _ => unreachable!("AddBlacklistedSensor replies with Ok"),
        }
    }

    pub fn remove_blacklisted_sensor(&self, me: TaskId, bank: u8, sensor_id: u8) {
        match self.mailbox.call(me, Request::RemoveBlacklistedSensor(bank, sensor_id)) {
            Reply::Ok => {}
            _ => unreachable!("RemoveBlacklistedSensor replies with Ok"),
        }
    }

    pub fn is_sensor_blacklisted(&self, me: TaskId, bank: u8, sensor_id: u8) -> bool {
        match self.mailbox.call(me, Request::IsSensorBlacklisted(bank, sensor_id)) {
            Reply::Bool(b) => b,
            _ => unreachable!("IsSensorBlacklisted replies with Bool"),
        }
    }
}

/// Build the track graph for `layout` and spawn the topology server.
pub fn spawn(layout_kind: TrackLayout) -> TopologyHandle {
    let graph = layout::load(layout_kind);
    graph.validate().expect("hardcoded track layout failed structural validation");
    let graph = Arc::new(graph);

    let (mailbox, endpoint) = channel();
    thread::Builder::new()
        .name("marklin_topology_server".into())
        .spawn(move || run(endpoint, graph, layout_kind))
        .expect("failed to spawn marklin_topology_server thread");
    TopologyHandle { mailbox }
}

fn run(endpoint: ServerEndpoint<Request, Reply>, graph: Arc<TrackGraph>, layout_kind: TrackLayout) {
    let blacklist = Mutex::new(SensorBlacklist::new());
    loop {
        let call = endpoint.receive();
        let (_from, request, token) = call.into_parts();
        match request {
            Request::GetTrackNodes => token.reply(Reply::Graph(graph.clone(), layout_kind)),
            Request::GetSensorBlacklist => {
                let v = blacklist.lock().expect("blacklist mutex poisoned").iter().copied().collect();
                token.reply(Reply::Blacklist(v));
            }
            Request::AddBlacklistedSensor(bank, id) => {
                blacklist.lock().expect("blacklist mutex poisoned").add(bank, id);
                token.reply(Reply::Ok);
            }
            Request::RemoveBlacklistedSensor(bank, id) => {
                blacklist.lock().expect("blacklist mutex poisoned").remove(bank, id);
                token.reply(Reply::Ok);
            }
            Request::IsSensorBlacklisted(bank, id) => {
                let b = blacklist.lock().expect("blacklist mutex poisoned").contains(bank, id);
                token.reply(Reply::Bool(b));
            }
        }
    }
}
