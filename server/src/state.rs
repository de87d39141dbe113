// server/src/state.rs

use common::{RunId, RunInfo, SimConfig, SimId, Simulation};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

pub type SharedSim = Arc<Mutex<Simulation>>;

/// Todo vive en memoria; al reiniciar el server se pierde.
#[derive(Clone)]
pub struct AppState {
    pub runs: Arc<Mutex<HashMap<RunId, RunInfo>>>,
    // simulaciones paso a paso abiertas; cada una con su propio lock
    // para que un step largo no frene a las demás
    pub sims: Arc<Mutex<HashMap<SimId, SharedSim>>>,
    pub config: SimConfig,
}

impl AppState {
    pub fn new(config: SimConfig) -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            sims: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }
}
