pub mod pattern;
pub mod router;

pub use pattern::{TurnPatternTable, TurnProbability};
pub use router::{TurnEvent, TurnRouter};

use serde::{Deserialize, Serialize};

/// Direction a vehicle takes through a signalised junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Turn {
    Right,
    Left,
    Forward,
}

impl Turn {
    pub const ALL: [Turn; 3] = [Turn::Right, Turn::Left, Turn::Forward];

    pub fn as_str(&self) -> &'static str {
        match self {
            Turn::Right => "right",
            Turn::Left => "left",
            Turn::Forward => "forward",
        }
    }
}
