//! Shared fixture: a small device and graph with known stripe layout.
#![allow(dead_code)]

use core_config::{DeviceConfig, WorkloadConfig};
use core_data::{Callback, DataManager};
use core_graph::{BlockSpec, Graph};
use core_sim::Module;
use std::cell::RefCell;
use std::rc::Rc;

pub const BLOCK_SIZE: u32 = 65536;
pub const READ_LATENCY: u64 = 100;
pub const FEATURE_DIM: u32 = 64;

/// 2 channels x 2 chips, 2-plane stripes of 512-byte pages: 4 chips,
/// 1024-byte stripes, 4 features (dim 64) per stripe.
pub fn device() -> DeviceConfig {
    let mut device = DeviceConfig::default();
    device.topology.channels = 2;
    device.topology.chips_per_channel = 2;
    device.topology.dies_per_chip = 2;
    device.topology.planes_per_die = 2;
    device.topology.blocks_per_plane = 8;
    device.topology.pages_per_block = 4;
    device.topology.page_capacity = 512;
    device.timing.read_latency = READ_LATENCY;
    device.timing.program_latency = 400;
    device
}

pub fn workload(transfer_capacity: u64) -> WorkloadConfig {
    let mut workload = WorkloadConfig::default();
    workload.feature.node_feature_dim = FEATURE_DIM;
    workload.buffers.transfer_capacity = transfer_capacity;
    workload
}

/// 24 vertices over 6 blocks; vertex 16 is dense across blocks 2..=4.
/// Block -> chip: 0->0, 1->1, 2->2, 3->3, 4->0, 5->1.
pub fn graph() -> Graph {
    let specs = vec![
        BlockSpec { vlo: 0, vup: 8, elo: 0, odg: 40, idg: 40, dense: false },
        BlockSpec { vlo: 8, vup: 16, elo: 40, odg: 40, idg: 40, dense: false },
        BlockSpec { vlo: 16, vup: 16, elo: 80, odg: 50, idg: 10, dense: true },
        BlockSpec { vlo: 16, vup: 16, elo: 130, odg: 50, idg: 10, dense: true },
        BlockSpec { vlo: 16, vup: 16, elo: 180, odg: 50, idg: 10, dense: true },
        BlockSpec { vlo: 17, vup: 24, elo: 230, odg: 30, idg: 130, dense: false },
    ];
    Graph::from_parts(false, 24, 260, BLOCK_SIZE, specs).unwrap()
}

pub fn manager(transfer_capacity: u64) -> DataManager {
    DataManager::new(device(), graph(), &workload(transfer_capacity)).unwrap()
}

/// Callbacks that append their label to a shared log on fire.
pub fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Callback) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let make = {
        let log = Rc::clone(&log);
        move |label: &str| -> Callback {
            let log = Rc::clone(&log);
            let label = label.to_string();
            Box::new(move || log.borrow_mut().push(label))
        }
    };
    (log, make)
}

/// Run to quiescence, checking invariants at every tick boundary.
pub fn drive(dm: &mut DataManager) {
    let mut guard = 0u32;
    while dm.busy() {
        dm.skip_to_next_event();
        dm.check_invariants();
        guard += 1;
        assert!(guard < 100_000, "simulation never went idle");
    }
}
