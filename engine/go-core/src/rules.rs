//! Rule variants and their validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MAX_BOARD_SIZE;

/// Errors raised when rules or board parameters are malformed. These are
/// fatal at setup time.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("komi must be a half-integer, got {0}")]
    NonHalfIntegerKomi(f32),

    #[error("board size {0} out of range 2..={MAX_BOARD_SIZE}")]
    BoardSizeOutOfRange(usize),

    #[error("unknown rule name: {0}")]
    UnknownRule(String),
}

/// Ko handling variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KoRule {
    /// Forbid only immediate single-stone recapture. Longer cycles end the
    /// game with no result.
    Simple,
    /// Forbid recreating any previous board position.
    PositionalSuperko,
    /// Forbid recreating any previous position with the same player to move.
    SituationalSuperko,
}

/// Scoring variant. Territory is accepted and stored, but the reference
/// scoring path counts area; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringRule {
    Area,
    Territory,
}

/// A complete rule set for one game.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rules {
    pub ko_rule: KoRule,
    pub scoring_rule: ScoringRule,
    /// Score compensation added to white. Must be a half-integer.
    pub komi: f32,
}

impl Rules {
    pub fn new(ko_rule: KoRule, scoring_rule: ScoringRule, komi: f32) -> Result<Rules, RulesError> {
        if !komi_is_valid(komi) {
            return Err(RulesError::NonHalfIntegerKomi(komi));
        }
        Ok(Rules {
            ko_rule,
            scoring_rule,
            komi,
        })
    }

    /// Standard rules with the given komi.
    pub fn standard(komi: f32) -> Result<Rules, RulesError> {
        Rules::new(KoRule::PositionalSuperko, ScoringRule::Area, komi)
    }

    pub fn with_komi(mut self, komi: f32) -> Result<Rules, RulesError> {
        if !komi_is_valid(komi) {
            return Err(RulesError::NonHalfIntegerKomi(komi));
        }
        self.komi = komi;
        Ok(self)
    }
}

impl Default for Rules {
    fn default() -> Rules {
        Rules {
            ko_rule: KoRule::PositionalSuperko,
            scoring_rule: ScoringRule::Area,
            komi: 7.5,
        }
    }
}

pub(crate) fn komi_is_valid(komi: f32) -> bool {
    let doubled = komi * 2.0;
    komi.is_finite() && doubled == doubled.round() && komi.abs() <= 500.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn komi_validation() {
        assert!(Rules::standard(7.5).is_ok());
        assert!(Rules::standard(0.0).is_ok());
        assert!(Rules::standard(-3.5).is_ok());
        assert!(matches!(
            Rules::standard(6.25),
            Err(RulesError::NonHalfIntegerKomi(_))
        ));
        assert!(matches!(
            Rules::standard(f32::NAN),
            Err(RulesError::NonHalfIntegerKomi(_))
        ));
    }

    #[test]
    fn with_komi_revalidates() {
        let r = Rules::default();
        assert!(r.with_komi(0.5).is_ok());
        assert!(r.with_komi(0.25).is_err());
    }
}
