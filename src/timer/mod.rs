pub mod commands;
pub mod controller;
pub mod engine;
pub mod state;

pub use commands::FocusOrchestrator;
pub use controller::{
    next_session_type, Collaborators, FocusSnapshot, OrchestratorOptions, TimerSnapshot,
    DEFAULT_AUTO_CHAIN_DELAY, DEFAULT_TICK_INTERVAL,
};
pub use engine::{EngineEvent, EngineSignal, TimerEngine};
pub use state::TimerState;
