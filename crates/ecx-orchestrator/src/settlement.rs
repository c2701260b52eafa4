//! # Settlement Computation
//!
//! The final distribution of a closing, computed in integer minor units:
//!
//! - commissions are fixed basis-point shares of the purchase price,
//!   rounded half-even by [`Money::apply_bps`];
//! - closing costs are a basis-point share of the price plus the sum of
//!   the verification fee schedule;
//! - the seller's proceeds are the exact remainder.
//!
//! Computing the seller amount as the remainder makes the distribution-sum
//! invariant hold by construction; it is still asserted before anything is
//! sent to the wallet gateway.

use serde::{Deserialize, Serialize};

use ecx_core::{
    EscrowConfig, LedgerRef, Money, PartyId, SettlementId, Timestamp, TransactionId,
    ValidationError,
};
use ecx_gateways::DistributionLine;

/// A computed distribution, prior to execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementBreakdown {
    /// The settlement total (the purchase price).
    pub total: Money,
    /// Seller proceeds, the exact remainder after all other lines.
    pub seller_amount: Money,
    /// Buyer's agent commission.
    pub buyer_agent_commission: Money,
    /// Seller's agent commission.
    pub seller_agent_commission: Money,
    /// Closing costs: percentage share plus verification fees.
    pub closing_costs: Money,
    /// The itemized distribution, summing exactly to `total`.
    pub distributions: Vec<DistributionLine>,
}

/// An executed settlement, one-to-one with its transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Gateway settlement identifier.
    pub id: SettlementId,
    /// The settled transaction.
    pub transaction_id: TransactionId,
    /// The distribution that was executed.
    pub breakdown: SettlementBreakdown,
    /// Ledger reference of the settlement event.
    pub ledger_ref: Option<LedgerRef>,
    /// When the distribution executed.
    pub executed_at: Timestamp,
}

/// Compute the settlement distribution for a closing.
///
/// # Errors
///
/// [`ValidationError::NegativeAmount`] when commissions and costs exceed
/// the purchase price, and [`ValidationError::UnbalancedDistribution`] if
/// the computed lines fail the exact-sum assertion.
pub fn compute_breakdown(
    config: &EscrowConfig,
    seller: &PartyId,
    total_price: Money,
    verification_fees: Money,
) -> Result<SettlementBreakdown, ValidationError> {
    let buyer_agent_commission = total_price.apply_bps(config.buyer_agent_commission_bps)?;
    let seller_agent_commission = total_price.apply_bps(config.seller_agent_commission_bps)?;
    let closing_costs = total_price
        .apply_bps(config.closing_cost_bps)?
        .checked_add(verification_fees)?;

    let seller_amount = total_price
        .checked_sub(buyer_agent_commission)?
        .checked_sub(seller_agent_commission)?
        .checked_sub(closing_costs)?;

    let distributions = vec![
        DistributionLine {
            recipient: seller.clone(),
            purpose: "seller_proceeds".to_string(),
            amount: seller_amount,
        },
        DistributionLine {
            recipient: PartyId::new("broker:buyer-side")?,
            purpose: "buyer_agent_commission".to_string(),
            amount: buyer_agent_commission,
        },
        DistributionLine {
            recipient: PartyId::new("broker:seller-side")?,
            purpose: "seller_agent_commission".to_string(),
            amount: seller_agent_commission,
        },
        DistributionLine {
            recipient: PartyId::new("escrow:closing")?,
            purpose: "closing_costs".to_string(),
            amount: closing_costs,
        },
    ];

    let lines_total = Money::sum(
        total_price.currency(),
        distributions.iter().map(|d| d.amount),
    )?;
    if lines_total != total_price {
        return Err(ValidationError::UnbalancedDistribution {
            lines_minor: lines_total.minor_units(),
            total_minor: total_price.minor_units(),
        });
    }

    Ok(SettlementBreakdown {
        total: total_price,
        seller_amount,
        buyer_agent_commission,
        seller_agent_commission,
        closing_costs,
        distributions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecx_core::CurrencyCode;
    use proptest::prelude::*;

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, CurrencyCode::USD).expect("non-negative")
    }

    fn seller() -> PartyId {
        PartyId::new("party:seller").expect("valid")
    }

    #[test]
    fn default_config_on_400k_closing() {
        let breakdown = compute_breakdown(
            &EscrowConfig::default(),
            &seller(),
            usd(40_000_000),
            usd(135_000),
        )
        .expect("breakdown");

        assert_eq!(breakdown.buyer_agent_commission, usd(1_000_000)); // 2.5%
        assert_eq!(breakdown.seller_agent_commission, usd(1_200_000)); // 3.0%
        assert_eq!(breakdown.closing_costs, usd(535_000)); // 1% + fees
        assert_eq!(breakdown.seller_amount, usd(37_265_000));

        let lines = Money::sum(
            CurrencyCode::USD,
            breakdown.distributions.iter().map(|d| d.amount),
        )
        .expect("sum");
        assert_eq!(lines, breakdown.total);
    }

    #[test]
    fn costs_exceeding_price_are_rejected() {
        let err = compute_breakdown(
            &EscrowConfig::default(),
            &seller(),
            usd(100_000),
            usd(200_000),
        );
        assert!(matches!(err, Err(ValidationError::NegativeAmount { .. })));
    }

    proptest! {
        #[test]
        fn distribution_always_sums_to_the_total(
            // Prices large enough that fees never swamp them.
            price_minor in 10_000_000i64..2_000_000_000,
            fees_minor in 0i64..500_000,
            buyer_bps in 0u32..500,
            seller_bps in 0u32..500,
            closing_bps in 0u32..300,
        ) {
            let config = EscrowConfig {
                buyer_agent_commission_bps: buyer_bps,
                seller_agent_commission_bps: seller_bps,
                closing_cost_bps: closing_bps,
                ..EscrowConfig::default()
            };
            let breakdown = compute_breakdown(
                &config,
                &seller(),
                usd(price_minor),
                usd(fees_minor),
            ).expect("breakdown");
            let lines = Money::sum(
                CurrencyCode::USD,
                breakdown.distributions.iter().map(|d| d.amount),
            ).expect("sum");
            prop_assert_eq!(lines.minor_units(), price_minor);
        }
    }
}
