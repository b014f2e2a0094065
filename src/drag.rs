//! Drag gesture interpretation.
//!
//! Pointer input is folded into a [`DragState`] by [`reduce_drag_state`];
//! only a completed drop that actually changes a ticket's position yields a
//! [`MoveIntent`]. Nothing here touches the store or the network.

use crate::types::{ColumnId, Identity, MoveIntent, TicketId};

/// Vertical extent of one rendered card, in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct CardBounds {
    pub ticket_id: TicketId,
    pub top: f32,
    pub height: f32,
}

impl CardBounds {
    pub fn midpoint(&self) -> f32 {
        self.top + self.height / 2.0
    }
}

/// Where the gesture started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragOrigin {
    pub ticket_id: TicketId,
    pub column: ColumnId,
    pub index: usize,
}

/// Candidate insertion point, as an index into the column as rendered
/// (the dragged card still counted in its own column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverTarget {
    pub column: ColumnId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        origin: DragOrigin,
        hover: Option<HoverTarget>,
    },
}

impl DragState {
    pub fn is_dragging(&self) -> bool {
        matches!(self, DragState::Dragging { .. })
    }
}

/// Pointer input
#[derive(Debug, Clone, PartialEq)]
pub enum PointerInput {
    /// Pressed over a ticket card.
    Down {
        ticket_id: TicketId,
        column: ColumnId,
        index: usize,
    },
    /// Moved over a column; `cards` are that column's rendered cards.
    Move {
        column: ColumnId,
        pointer_y: f32,
        cards: Vec<CardBounds>,
    },
    /// Released.
    Drop,
    Cancel,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragEffect {
    None,
    /// The local user may not move tickets.
    Refused,
    /// Released where it started, or cancelled.
    Discarded,
    Move(MoveIntent),
}

/// Insertion index for a pointer at `pointer_y`: before the nearest card if
/// above its midpoint, after it otherwise.
pub fn hover_index(cards: &[CardBounds], pointer_y: f32) -> usize {
    let nearest = cards.iter().enumerate().min_by(|(_, a), (_, b)| {
        (pointer_y - a.midpoint())
            .abs()
            .total_cmp(&(pointer_y - b.midpoint()).abs())
    });
    match nearest {
        None => 0,
        Some((i, card)) if pointer_y < card.midpoint() => i,
        Some((i, _)) => i + 1,
    }
}

/// Pure function: apply one pointer input to the drag state (reducer pattern).
pub fn reduce_drag_state(
    state: DragState,
    input: PointerInput,
    can_move: bool,
) -> (DragState, DragEffect) {
    match (state, input) {
        (
            DragState::Idle,
            PointerInput::Down {
                ticket_id,
                column,
                index,
            },
        ) => {
            if !can_move {
                return (DragState::Idle, DragEffect::Refused);
            }
            let state = DragState::Dragging {
                origin: DragOrigin {
                    ticket_id,
                    column,
                    index,
                },
                hover: None,
            };
            (state, DragEffect::None)
        }

        (
            DragState::Dragging { origin, .. },
            PointerInput::Move {
                column,
                pointer_y,
                cards,
            },
        ) => {
            let index = hover_index(&cards, pointer_y);
            let hover = Some(HoverTarget { column, index });
            (DragState::Dragging { origin, hover }, DragEffect::None)
        }

        (DragState::Dragging { origin, hover }, PointerInput::Drop) => {
            let effect = match hover {
                Some(hover) => intent_for(origin, hover)
                    .map(DragEffect::Move)
                    .unwrap_or(DragEffect::Discarded),
                None => DragEffect::Discarded,
            };
            (DragState::Idle, effect)
        }

        (DragState::Dragging { .. }, PointerInput::Cancel) => {
            (DragState::Idle, DragEffect::Discarded)
        }

        // A second press mid-drag and stray moves/releases change nothing.
        (state, _) => (state, DragEffect::None),
    }
}

/// The move a drop at `hover` means, or `None` if the ticket lands where it
/// started.
fn intent_for(origin: DragOrigin, hover: HoverTarget) -> Option<MoveIntent> {
    let same_column = origin.column == hover.column;
    if same_column && (hover.index == origin.index || hover.index == origin.index + 1) {
        return None;
    }
    // Indices below the dragged card's own slot shift once it is lifted out.
    let target_index = if same_column && hover.index > origin.index {
        hover.index - 1
    } else {
        hover.index
    };
    Some(MoveIntent {
        ticket_id: origin.ticket_id,
        source_column: origin.column,
        source_index: origin.index,
        target_column: hover.column,
        target_index,
    })
}

/// Owns the drag state for one board view.
#[derive(Debug)]
pub struct DragDropController {
    state: DragState,
    can_move: bool,
}

impl DragDropController {
    pub fn new(identity: &Identity) -> Self {
        Self {
            state: DragState::Idle,
            can_move: identity.can_move_tickets,
        }
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn handle(&mut self, input: PointerInput) -> DragEffect {
        let state = std::mem::take(&mut self.state);
        let (next, effect) = reduce_drag_state(state, input, self.can_move);
        self.state = next;
        if let DragEffect::Move(intent) = &effect {
            tracing::debug!(
                ticket = %intent.ticket_id,
                from = %intent.source_column,
                to = %intent.target_column,
                index = intent.target_index,
                "drag completed"
            );
        }
        effect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cards 40px tall stacked from y = 0.
    fn cards(ids: &[&str]) -> Vec<CardBounds> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| CardBounds {
                ticket_id: TicketId::from(*id),
                top: i as f32 * 40.0,
                height: 40.0,
            })
            .collect()
    }

    fn down(id: &str, column: &str, index: usize) -> PointerInput {
        PointerInput::Down {
            ticket_id: TicketId::from(id),
            column: ColumnId::from(column),
            index,
        }
    }

    fn over(column: &str, y: f32, ids: &[&str]) -> PointerInput {
        PointerInput::Move {
            column: ColumnId::from(column),
            pointer_y: y,
            cards: cards(ids),
        }
    }

    fn controller() -> DragDropController {
        DragDropController::new(&Identity::member("me"))
    }

    #[test]
    fn test_hover_index_uses_card_midpoint() {
        let column = cards(&["a", "b", "c"]);
        assert_eq!(hover_index(&column, 5.0), 0);
        assert_eq!(hover_index(&column, 25.0), 1);
        assert_eq!(hover_index(&column, 55.0), 1);
        assert_eq!(hover_index(&column, 65.0), 2);
        assert_eq!(hover_index(&column, 500.0), 3);
        assert_eq!(hover_index(&[], 100.0), 0);
    }

    #[test]
    fn test_drop_into_other_column_emits_intent() {
        let mut drag = controller();
        assert_eq!(drag.handle(down("t-1", "todo", 0)), DragEffect::None);
        assert!(drag.state().is_dragging());
        drag.handle(over("doing", 10.0, &[]));

        let effect = drag.handle(PointerInput::Drop);
        assert_eq!(
            effect,
            DragEffect::Move(MoveIntent {
                ticket_id: TicketId::from("t-1"),
                source_column: ColumnId::from("todo"),
                source_index: 0,
                target_column: ColumnId::from("doing"),
                target_index: 0,
            })
        );
        assert_eq!(drag.state(), &DragState::Idle);
    }

    #[test]
    fn test_drop_at_origin_is_noop() {
        let mut drag = controller();
        drag.handle(down("b", "todo", 1));
        // Just above b's midpoint: insert before b.
        drag.handle(over("todo", 55.0, &["a", "b", "c"]));
        assert_eq!(drag.handle(PointerInput::Drop), DragEffect::Discarded);

        drag.handle(down("b", "todo", 1));
        // Just below b's midpoint: insert after b.
        drag.handle(over("todo", 65.0, &["a", "b", "c"]));
        assert_eq!(drag.handle(PointerInput::Drop), DragEffect::Discarded);
    }

    #[test]
    fn test_same_column_move_down_normalizes_index() {
        let mut drag = controller();
        drag.handle(down("a", "todo", 0));
        drag.handle(over("todo", 110.0, &["a", "b", "c"]));

        let DragEffect::Move(intent) = drag.handle(PointerInput::Drop) else {
            panic!("expected a move");
        };
        assert!(!intent.changes_column());
        assert_eq!(intent.target_index, 2);
    }

    #[test]
    fn test_same_column_move_up_keeps_index() {
        let mut drag = controller();
        drag.handle(down("c", "todo", 2));
        drag.handle(over("todo", 5.0, &["a", "b", "c"]));

        let DragEffect::Move(intent) = drag.handle(PointerInput::Drop) else {
            panic!("expected a move");
        };
        assert_eq!(intent.target_index, 0);
    }

    #[test]
    fn test_drop_without_hover_is_discarded() {
        let mut drag = controller();
        drag.handle(down("a", "todo", 0));
        assert_eq!(drag.handle(PointerInput::Drop), DragEffect::Discarded);
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut drag = controller();
        drag.handle(down("a", "todo", 0));
        drag.handle(over("doing", 0.0, &[]));
        assert_eq!(drag.handle(PointerInput::Cancel), DragEffect::Discarded);
        assert_eq!(drag.handle(PointerInput::Drop), DragEffect::None);
    }

    #[test]
    fn test_viewer_cannot_start_drag() {
        let mut drag = DragDropController::new(&Identity::viewer("me"));
        assert_eq!(drag.handle(down("a", "todo", 0)), DragEffect::Refused);
        assert!(!drag.state().is_dragging());
    }

    #[test]
    fn test_move_while_idle_is_ignored() {
        let (state, effect) = reduce_drag_state(DragState::Idle, over("todo", 0.0, &["a"]), true);
        assert_eq!(state, DragState::Idle);
        assert_eq!(effect, DragEffect::None);
    }
}
