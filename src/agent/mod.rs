pub mod traffic_light_agent;

pub use traffic_light_agent::{AgentOptions, AgentState, TrafficLightAgent};
