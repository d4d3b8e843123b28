//! Territories and the people the engine negotiates with or through.
//!
//! A territory pairs one county with its counterparts (one gentry head
//! per village) and its delegates. Settlement never sees this type; it
//! only receives the county.

use crate::{
    county::CountyState,
    name_generator::NameGenerator,
    rng::{RngBank, SubsystemRng, SubsystemSlot},
    settlement::SettlementReport,
    types::TerritoryId,
};
use serde::{Deserialize, Serialize};

/// Big-five style traits used by delegate scoring, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    openness: f64,
    conscientiousness: f64,
    agreeableness: f64,
}

impl PersonalityProfile {
    pub fn new(openness: f64, conscientiousness: f64, agreeableness: f64) -> Self {
        Self {
            openness: clamp_unit(openness),
            conscientiousness: clamp_unit(conscientiousness),
            agreeableness: clamp_unit(agreeableness),
        }
    }

    pub fn random(rng: &mut SubsystemRng) -> Self {
        Self::new(rng.uniform(0.2, 0.9), rng.uniform(0.2, 0.9), rng.uniform(0.2, 0.9))
    }

    pub fn openness(&self) -> f64 {
        self.openness
    }

    pub fn conscientiousness(&self) -> f64 {
        self.conscientiousness
    }

    pub fn agreeableness(&self) -> f64 {
        self.agreeableness
    }
}

impl Default for PersonalityProfile {
    fn default() -> Self {
        Self::new(0.5, 0.5, 0.5)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

pub const AFFINITY_MIN: f64 = -99.0;
pub const AFFINITY_MAX: f64 = 99.0;

/// The gentry head of one village.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterpart {
    pub id: String,
    pub name: String,
    pub village: String,
    pub personality: PersonalityProfile,
    pub affinity: f64,
}

impl Counterpart {
    pub fn adjust_affinity(&mut self, delta: f64) {
        self.affinity = (self.affinity + delta).clamp(AFFINITY_MIN, AFFINITY_MAX);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpeakerRole {
    Player,
    Advisor,
    Deputy,
}

impl SpeakerRole {
    /// Unknown roles speak as the player.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ADVISOR" => Self::Advisor,
            "DEPUTY" => Self::Deputy,
            _ => Self::Player,
        }
    }

    pub fn is_delegate(&self) -> bool {
        !matches!(self, Self::Player)
    }
}

/// A subordinate who may stand in for the player for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegate {
    pub role: SpeakerRole,
    pub name: String,
    pub personality: PersonalityProfile,
    /// 0..=10
    pub intelligence: f64,
    pub affinity: f64,
}

/// Policy leanings of a rule-based governor; each weight in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GovernorProfile {
    pub welfare: f64,
    pub wealth: f64,
    pub reputation: f64,
}

impl Default for GovernorProfile {
    fn default() -> Self {
        Self { welfare: 0.2, wealth: 0.15, reputation: 0.2 }
    }
}

impl GovernorProfile {
    pub fn random(rng: &mut SubsystemRng) -> Self {
        Self {
            welfare: rng.uniform(0.05, 0.45),
            wealth: rng.uniform(0.05, 0.3),
            reputation: rng.uniform(0.05, 0.4),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Territory {
    pub id: TerritoryId,
    pub name: String,
    pub governor_name: String,
    pub is_player: bool,
    pub county: CountyState,
    pub profile: GovernorProfile,
    /// Governor's knowledge skill, 0..=10; feeds forced-survey quality.
    pub knowledge: f64,
    pub counterparts: Vec<Counterpart>,
    pub delegates: Vec<Delegate>,
    #[serde(skip)]
    pub last_report: Option<SettlementReport>,
    seed: u64,
}

impl Territory {
    /// Build a territory with generated people. The player's county is the
    /// standard layout; peers are varied from it.
    pub fn generate(id: &str, is_player: bool, rng_bank: RngBank) -> Self {
        let mut names = rng_bank.for_subsystem(SubsystemSlot::Names);
        let county = if is_player {
            CountyState::standard()
        } else {
            CountyState::generate(&mut names)
        };
        let counterparts = county
            .villages
            .iter()
            .map(|v| Counterpart {
                id: format!("{id}:{}", v.name),
                name: NameGenerator::gentry_name(&mut names),
                village: v.name.clone(),
                personality: PersonalityProfile::random(&mut names),
                affinity: 50.0 + names.uniform(-10.0, 10.0).round(),
            })
            .collect();
        let delegates = vec![
            Delegate {
                role: SpeakerRole::Advisor,
                name: NameGenerator::full_name(&mut names),
                personality: PersonalityProfile::random(&mut names),
                intelligence: names.uniform(5.0, 9.0).round(),
                affinity: 60.0,
            },
            Delegate {
                role: SpeakerRole::Deputy,
                name: NameGenerator::full_name(&mut names),
                personality: PersonalityProfile::random(&mut names),
                intelligence: names.uniform(3.0, 8.0).round(),
                affinity: 50.0,
            },
        ];
        Self {
            id: id.to_string(),
            name: NameGenerator::county_name(&mut names),
            governor_name: NameGenerator::full_name(&mut names),
            is_player,
            county,
            profile: if is_player { GovernorProfile::default() } else { GovernorProfile::random(&mut names) },
            knowledge: names.uniform(3.0, 8.0).round(),
            counterparts,
            delegates,
            last_report: None,
            seed: rng_bank.seed(),
        }
    }

    pub fn rng_bank(&self) -> RngBank {
        RngBank::new(self.seed)
    }

    pub fn counterpart_for_village(&self, village: &str) -> Option<&Counterpart> {
        self.counterparts.iter().find(|c| c.village == village)
    }

    pub fn counterpart_mut(&mut self, id: &str) -> Option<&mut Counterpart> {
        self.counterparts.iter_mut().find(|c| c.id == id)
    }

    pub fn delegate(&self, role: SpeakerRole) -> Option<&Delegate> {
        self.delegates.iter().find(|d| d.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personality_is_clamped_at_construction() {
        let p = PersonalityProfile::new(1.4, -0.2, f64::NAN);
        assert_eq!(p.openness(), 1.0);
        assert_eq!(p.conscientiousness(), 0.0);
        assert_eq!(p.agreeableness(), 0.5);
    }

    #[test]
    fn speaker_role_parse_defaults_to_player() {
        assert_eq!(SpeakerRole::parse("advisor"), SpeakerRole::Advisor);
        assert_eq!(SpeakerRole::parse(" DEPUTY "), SpeakerRole::Deputy);
        assert_eq!(SpeakerRole::parse("magistrate"), SpeakerRole::Player);
    }
}
