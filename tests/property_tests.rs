//! Property-based tests for the pure checkout and fulfillment rules.
//!
//! These tests use proptest to check invariants across a wide range of inputs,
//! catching edge cases that example-based tests miss.

use std::collections::HashMap;

use marketplace_api::{
    entities::FulfillmentStatus,
    services::{
        checkout::{compute_totals, TaxPolicy},
        cart_validator::ValidatedLine,
        fulfillment::{aggregate, transition, ItemAction},
        payment_split::{plan_split, SplitPlan},
    },
};
use proptest::prelude::*;
use uuid::Uuid;

fn status_strategy() -> impl Strategy<Value = FulfillmentStatus> {
    prop_oneof![
        Just(FulfillmentStatus::Pending),
        Just(FulfillmentStatus::Confirmed),
        Just(FulfillmentStatus::Processing),
        Just(FulfillmentStatus::Shipped),
        Just(FulfillmentStatus::Delivered),
        Just(FulfillmentStatus::Cancelled),
        Just(FulfillmentStatus::Refunded),
    ]
}

fn action_strategy() -> impl Strategy<Value = ItemAction> {
    prop_oneof![
        Just(ItemAction::Accept),
        Just(ItemAction::Reject),
        Just(ItemAction::StartProcessing),
        Just(ItemAction::Dispatch),
        Just(ItemAction::MarkDelivered),
        Just(ItemAction::Cancel),
        Just(ItemAction::Refund),
    ]
}

/// (store index, unit price, quantity) per line, over a handful of stores.
fn lines_strategy() -> impl Strategy<Value = Vec<(usize, i64, i32)>> {
    prop::collection::vec((0usize..4, 0i64..1_000_000, 1i32..50), 1..12)
}

fn to_lines(raw: &[(usize, i64, i32)], stores: &[Uuid]) -> Vec<ValidatedLine> {
    raw.iter()
        .map(|(store, unit_price, quantity)| ValidatedLine {
            cart_item_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: None,
            store_id: stores[*store],
            quantity: *quantity,
            unit_price: *unit_price,
            available_stock: *quantity,
            currency: "NGN".into(),
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The derived order status depends on the multiset of item statuses only.
    #[test]
    fn aggregate_ignores_item_order(
        statuses in prop::collection::vec(status_strategy(), 1..10).prop_shuffle(),
    ) {
        let mut sorted = statuses.clone();
        sorted.sort();
        let mut reversed = sorted.clone();
        reversed.reverse();
        prop_assert_eq!(aggregate(&statuses), aggregate(&sorted));
        prop_assert_eq!(aggregate(&sorted), aggregate(&reversed));
    }

    /// A uniform set of items gives the order that same status.
    #[test]
    fn uniform_items_give_their_own_status(status in status_strategy(), n in 1usize..8) {
        prop_assert_eq!(aggregate(&vec![status; n]), status);
    }

    /// Every legal move changes the status and nothing leaves refunded.
    #[test]
    fn transitions_always_move_forward(from in status_strategy(), action in action_strategy()) {
        if let Ok(to) = transition(from, action) {
            prop_assert_ne!(to, from);
        }
        prop_assert!(transition(FulfillmentStatus::Refunded, action).is_err());
    }

    /// subtotal is the sum of line totals and total = subtotal + tax + shipping.
    #[test]
    fn order_totals_conserve_money(
        raw in lines_strategy(),
        shipping in 0i64..100_000,
        bps in 0u32..3_000,
    ) {
        let stores: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let lines = to_lines(&raw, &stores);
        let totals = compute_totals(&lines, shipping, TaxPolicy::new(bps));

        let expected: i64 = lines.iter().map(|l| l.unit_price * i64::from(l.quantity)).sum();
        prop_assert_eq!(totals.subtotal, expected);
        prop_assert_eq!(totals.total, totals.subtotal + totals.tax + totals.shipping);
        prop_assert!(totals.tax >= 0);
    }

    /// With every store routable, split shares add up to the items' value.
    #[test]
    fn split_shares_sum_to_item_totals(raw in lines_strategy()) {
        let stores: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let subaccounts: HashMap<Uuid, String> = stores
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, format!("ACCT_{}", i)))
            .collect();
        let lines = to_lines(&raw, &stores);
        let item_totals: Vec<(Uuid, i64)> =
            lines.iter().map(|l| (l.store_id, l.total_price())).collect();
        let value: i64 = item_totals.iter().map(|(_, total)| total).sum();

        match plan_split(&item_totals, &subaccounts) {
            SplitPlan::Split { shares } => {
                prop_assert!(shares.len() > 1);
                prop_assert_eq!(shares.iter().map(|s| s.share).sum::<i64>(), value);
            }
            SplitPlan::Single { subaccount } => {
                prop_assert!(subaccounts.values().any(|s| *s == subaccount));
                let distinct: std::collections::HashSet<_> =
                    item_totals.iter().map(|(store, _)| store).collect();
                prop_assert_eq!(distinct.len(), 1);
            }
            SplitPlan::Platform => {
                prop_assert!(false, "every store has a subaccount");
            }
        }
    }
}
