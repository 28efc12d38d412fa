/*!
ÉTAT PARTAGÉ - Tout ce que les handlers HTTP et les lots se partagent
*/

use crate::batch::BatchRegistry;
use crate::config::KernelConfig;
use crate::offline_log::OfflineLog;
use crate::roster::RosterStore;
use crate::stats::DispatchStats;
use fleet_dispatch::{DispatchPolicy, ReachabilityTable};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Shared<KernelConfig>,
    pub config_path: Arc<PathBuf>,
    pub roster: Arc<RosterStore>,
    pub reachability: Arc<ReachabilityTable>,
    pub offline_log: Arc<OfflineLog>,
    pub stats: DispatchStats,
    pub batches: BatchRegistry,
}

impl AppState {
    pub fn new(cfg: KernelConfig, config_path: PathBuf, roster: RosterStore) -> Self {
        let offline_log = OfflineLog::new(&cfg.logs_dir);
        Self {
            cfg: new_state(cfg),
            config_path: Arc::new(config_path),
            roster: Arc::new(roster),
            reachability: Arc::new(ReachabilityTable::new()),
            offline_log: Arc::new(offline_log),
            stats: DispatchStats::new(),
            batches: BatchRegistry::default(),
        }
    }

    /// Copie de la politique courante, figée pour un lot
    pub fn dispatch_policy(&self) -> DispatchPolicy {
        self.cfg.lock().dispatch.clone()
    }
}
