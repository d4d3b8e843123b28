use crate::{investment::InvestmentAction, promise::PromiseTerms, territory::SpeakerRole, types::SessionId};
use serde::{Deserialize, Serialize};

/// One investment a governor wants made this month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentOrder {
    pub action: InvestmentAction,
    #[serde(default)]
    pub target_village: Option<String>,
}

/// A governor's monthly decision. Anything left out keeps the current
/// policy (player) or is filled by the rule-based governor (peers).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerritoryDecision {
    pub investments: Vec<InvestmentOrder>,
    pub tax_rate: Option<f64>,
}

impl TerritoryDecision {
    pub fn is_empty(&self) -> bool {
        self.investments.is_empty() && self.tax_rate.is_none()
    }
}

/// All player-issued commands.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum PlayerCommand {
    Invest {
        action: InvestmentAction,
        #[serde(default)]
        target_village: Option<String>,
    },
    SetTax {
        rate: f64,
    },
    Negotiate {
        session_id: SessionId,
        utterance: String,
        #[serde(default = "default_speaker")]
        speaker: SpeakerRole,
        /// Commitments made in this turn, recorded before the round is played.
        #[serde(default)]
        promises: Vec<PromiseTerms>,
    },
    Advance {
        #[serde(default = "default_months")]
        months: u32,
    },
}

fn default_speaker() -> SpeakerRole {
    SpeakerRole::Player
}

fn default_months() -> u32 {
    1
}
