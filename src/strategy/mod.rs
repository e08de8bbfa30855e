pub mod adaptation;

pub use adaptation::{
    choose_program, AdaptationStrategy, Axis, ProgramTable, StrategyInputs,
};
