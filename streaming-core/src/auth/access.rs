//! Unified access evaluator (spec §4.8).
//!
//! Creators and team members bypass tier restrictions entirely. Otherwise
//! the album's tier_restrictions gate access, with a special case for
//! Ko-fi users who can combine their subscription tier with a one-off
//! donation to clear the bar.

use streaming_common::db::TierRestrictions;

/// Minimal user-facing tier data needed for the access decision. The real
/// user/subscription record lives in the external datastore (spec §1);
/// this is the tagged-record contract this crate needs from it.
#[derive(Debug, Clone, Default)]
pub struct TierData {
    pub tier_amount_cents: i64,
    pub has_donations: bool,
    pub donation_amount_cents: i64,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub is_creator: bool,
    pub is_team: bool,
    pub is_kofi: bool,
    pub tier: TierData,
}

pub struct AccessEvaluator;

impl AccessEvaluator {
    /// Evaluate access to an album with the given tier restrictions.
    /// Returns `Ok(())` or `Err(message)` naming the required tier.
    pub fn evaluate(user: &User, restrictions: Option<&TierRestrictions>) -> Result<(), String> {
        if user.is_creator || user.is_team {
            return Ok(());
        }

        let Some(restrictions) = restrictions else {
            return Ok(());
        };
        if !restrictions.is_restricted {
            return Ok(());
        }

        let required = restrictions.minimum_tier_amount_cents;
        if user.tier.tier_amount_cents >= required {
            return Ok(());
        }

        if user.is_kofi && user.tier.has_donations {
            let total = user.tier.tier_amount_cents + user.tier.donation_amount_cents;
            if total >= required {
                return Ok(());
            }
        }

        let tier_name = restrictions.minimum_tier_name.trim();
        let message = if tier_name.is_empty() {
            "This content requires a higher tier subscription".to_string()
        } else {
            format!("This content requires the {tier_name} tier or above")
        };
        Err(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn restrictions(amount: i64) -> TierRestrictions {
        TierRestrictions {
            is_restricted: true,
            minimum_tier_amount_cents: amount,
            minimum_tier_name: "Gold".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn creator_bypasses_restrictions() {
        let user = User {
            id: 1,
            is_creator: true,
            is_team: false,
            is_kofi: false,
            tier: TierData::default(),
        };
        assert!(AccessEvaluator::evaluate(&user, Some(&restrictions(1000))).is_ok());
    }

    #[test]
    fn unrestricted_album_allows_everyone() {
        let user = User {
            id: 2,
            is_creator: false,
            is_team: false,
            is_kofi: false,
            tier: TierData::default(),
        };
        assert!(AccessEvaluator::evaluate(&user, None).is_ok());
    }

    #[test]
    fn tier_amount_below_threshold_is_denied() {
        let user = User {
            id: 3,
            is_creator: false,
            is_team: false,
            is_kofi: false,
            tier: TierData { tier_amount_cents: 100, ..Default::default() },
        };
        let err = AccessEvaluator::evaluate(&user, Some(&restrictions(1000))).unwrap_err();
        assert!(err.contains("Gold"));
    }

    #[test]
    fn kofi_donation_can_clear_the_bar() {
        let user = User {
            id: 4,
            is_creator: false,
            is_team: false,
            is_kofi: true,
            tier: TierData {
                tier_amount_cents: 500,
                has_donations: true,
                donation_amount_cents: 600,
            },
        };
        assert!(AccessEvaluator::evaluate(&user, Some(&restrictions(1000))).is_ok());
    }

    #[test]
    fn non_kofi_donation_does_not_count() {
        let user = User {
            id: 5,
            is_creator: false,
            is_team: false,
            is_kofi: false,
            tier: TierData {
                tier_amount_cents: 500,
                has_donations: true,
                donation_amount_cents: 600,
            },
        };
        assert!(AccessEvaluator::evaluate(&user, Some(&restrictions(1000))).is_err());
    }
}
