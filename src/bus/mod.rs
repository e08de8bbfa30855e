pub mod client;
pub mod messages;

pub use client::{topic, BusClient, LoopbackHub, RabbitBus};
pub use messages::{
    AnalysisMessage, PredictionMessage, TrafficInfoMessage, TurnPredictionMessage,
};
