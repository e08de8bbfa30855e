pub mod artifacts;
pub mod traffic_predictor;
pub mod turn_predictor;

pub use artifacts::{FeatureRow, LinearModel, ModelBundle, ParsedValues};
pub use traffic_predictor::TrafficPredictor;
pub use turn_predictor::TurnPredictor;
