//! Block activation state machine.
//!
//! Planning is pure: given the current blocks of a document, work out which
//! `activation_order` values change. The store then applies the changes in
//! the returned order, which never puts two active blocks on the same order
//! (the unique index on `(document_id, activation_order)` would reject it).

use crate::models::Block;

/// One `activation_order` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderChange {
    pub block_id: i64,
    pub order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationPlan {
    /// Writes to apply, in sequence. Empty for no-ops.
    pub changes: Vec<OrderChange>,
    pub renumber_required: bool,
    /// The target block's order once the plan is applied.
    pub new_order: Option<i64>,
}

impl ActivationPlan {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Plan moving `target` into `desired` state.
///
/// Activation appends at `max + 1`. Deactivation clears the target first and
/// then shifts every later block down by one, lowest order first.
pub fn plan_activation(blocks: &[Block], target: &Block, desired: bool) -> ActivationPlan {
    match (target.activation_order, desired) {
        (Some(order), true) => ActivationPlan {
            changes: Vec::new(),
            renumber_required: false,
            new_order: Some(order),
        },
        (None, false) => ActivationPlan {
            changes: Vec::new(),
            renumber_required: false,
            new_order: None,
        },
        (None, true) => {
            let max = blocks
                .iter()
                .filter_map(|b| b.activation_order)
                .max()
                .unwrap_or(0);
            let order = max + 1;
            ActivationPlan {
                changes: vec![OrderChange {
                    block_id: target.block_id,
                    order: Some(order),
                }],
                renumber_required: true,
                new_order: Some(order),
            }
        }
        (Some(removed), false) => {
            let mut later: Vec<(i64, i64)> = blocks
                .iter()
                .filter(|b| b.block_id != target.block_id)
                .filter_map(|b| b.activation_order.map(|o| (b.block_id, o)))
                .filter(|&(_, o)| o > removed)
                .collect();
            later.sort_by_key(|&(_, o)| o);

            let mut changes = vec![OrderChange {
                block_id: target.block_id,
                order: None,
            }];
            changes.extend(later.into_iter().map(|(block_id, o)| OrderChange {
                block_id,
                order: Some(o - 1),
            }));
            ActivationPlan {
                changes,
                renumber_required: true,
                new_order: None,
            }
        }
    }
}

/// Apply a plan to an in-memory block list.
pub fn apply_plan(blocks: &mut [Block], plan: &ActivationPlan) {
    for change in &plan.changes {
        if let Some(block) = blocks.iter_mut().find(|b| b.block_id == change.block_id) {
            block.activation_order = change.order;
        }
    }
}

/// Check that the non-null orders are exactly `1..=K`.
pub fn verify_contiguous(blocks: &[Block]) -> Result<(), String> {
    let mut orders: Vec<i64> = blocks.iter().filter_map(|b| b.activation_order).collect();
    orders.sort_unstable();
    for (idx, order) in orders.iter().enumerate() {
        let expected = idx as i64 + 1;
        if *order != expected {
            return Err(format!(
                "activation orders {:?} are not contiguous from 1 (expected {} at position {})",
                orders, expected, idx
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rect;

    fn blocks(n: i64) -> Vec<Block> {
        (1..=n)
            .map(|i| Block {
                block_id: i,
                page_number: 1,
                block_number: i,
                text: format!("B{}", i),
                bbox: Rect::default(),
                activation_order: None,
            })
            .collect()
    }

    fn toggle(all: &mut [Block], idx: usize, desired: bool) -> ActivationPlan {
        let target = all[idx].clone();
        let plan = plan_activation(all, &target, desired);
        apply_plan(all, &plan);
        verify_contiguous(all).unwrap();
        plan
    }

    fn orders(all: &[Block]) -> Vec<Option<i64>> {
        all.iter().map(|b| b.activation_order).collect()
    }

    #[test]
    fn activating_in_sequence_appends() {
        let mut all = blocks(3);
        for idx in 0..3 {
            let plan = toggle(&mut all, idx, true);
            assert!(plan.renumber_required);
        }
        assert_eq!(orders(&all), vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn deactivating_middle_compacts() {
        let mut all = blocks(3);
        for idx in 0..3 {
            toggle(&mut all, idx, true);
        }
        let plan = toggle(&mut all, 1, false);
        assert_eq!(plan.new_order, None);
        assert_eq!(orders(&all), vec![Some(1), None, Some(2)]);
        assert_eq!(
            plan.changes,
            vec![
                OrderChange { block_id: 2, order: None },
                OrderChange { block_id: 3, order: Some(2) },
            ]
        );
    }

    #[test]
    fn compaction_shifts_lowest_order_first() {
        let mut all = blocks(4);
        for idx in [3, 0, 2, 1] {
            toggle(&mut all, idx, true);
        }
        // block 4 holds order 1; removing it shifts 2, 3, 4 in that sequence
        let plan = toggle(&mut all, 3, false);
        let shifted: Vec<Option<i64>> = plan.changes[1..].iter().map(|c| c.order).collect();
        assert_eq!(shifted, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn repeated_requests_are_noops() {
        let mut all = blocks(2);
        toggle(&mut all, 0, true);
        let again = toggle(&mut all, 0, true);
        assert!(again.is_noop());
        assert!(!again.renumber_required);
        assert_eq!(again.new_order, Some(1));

        let off = toggle(&mut all, 1, false);
        assert!(off.is_noop());
        assert!(!off.renumber_required);
    }

    #[test]
    fn deactivate_then_reactivate_moves_to_end() {
        let mut all = blocks(3);
        for idx in 0..3 {
            toggle(&mut all, idx, true);
        }
        toggle(&mut all, 0, false);
        let plan = toggle(&mut all, 0, true);
        assert_eq!(plan.new_order, Some(3));
        assert_eq!(orders(&all), vec![Some(3), Some(1), Some(2)]);
    }

    #[test]
    fn verify_detects_gaps_and_duplicates() {
        let mut all = blocks(3);
        all[0].activation_order = Some(1);
        all[1].activation_order = Some(3);
        assert!(verify_contiguous(&all).is_err());
        all[1].activation_order = Some(1);
        assert!(verify_contiguous(&all).is_err());
    }
}
