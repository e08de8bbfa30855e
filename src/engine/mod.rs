pub mod simulation_loop;

pub use simulation_loop::{LoopOutcome, SimulationLoop};
