use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Place of an event in the log of its instance.
///
/// `value` is a clock reading taken from the database at commit time and
/// `in_tx_order` breaks ties between events sharing that reading. Positions
/// compare lexicographically on `(value, in_tx_order)`; `value` is compared
/// with [`f64::total_cmp`] so the order is total.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Position {
    pub value: f64,
    pub in_tx_order: u32,
}

impl Position {
    /// The origin of time: before every appended event.
    pub const ORIGIN: Position = Position {
        value: 0.0,
        in_tx_order: 0,
    };

    pub fn new(value: f64, in_tx_order: u32) -> Self {
        Self { value, in_tx_order }
    }

    /// First position at a clock reading.
    pub fn at(value: f64) -> Self {
        Self::new(value, 0)
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then(self.in_tx_order.cmp(&other.in_tx_order))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.value, self.in_tx_order)
    }
}

/// Exclusive pagination bound.
///
/// Without a tie-break the bound only compares clock readings; with one it is
/// a cursor compared on the full `(value, in_tx_order)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionBound {
    pub value: f64,
    pub in_tx_order: Option<u32>,
}

impl PositionBound {
    pub fn value(value: f64) -> Self {
        Self {
            value,
            in_tx_order: None,
        }
    }

    pub fn cursor(position: Position) -> Self {
        Self {
            value: position.value,
            in_tx_order: Some(position.in_tx_order),
        }
    }

    /// Whether `position` lies strictly after this bound.
    pub fn precedes(&self, position: &Position) -> bool {
        match self.in_tx_order {
            None => position.value > self.value,
            Some(order) => *position > Position::new(self.value, order),
        }
    }

    /// Whether `position` lies strictly before this bound.
    pub fn follows(&self, position: &Position) -> bool {
        match self.in_tx_order {
            None => position.value < self.value,
            Some(order) => *position < Position::new(self.value, order),
        }
    }
}

impl From<Position> for PositionBound {
    fn from(position: Position) -> Self {
        Self::cursor(position)
    }
}

#[cfg(test)]
mod tests {
    use super::{Position, PositionBound};

    #[test]
    fn positions_order_by_value_then_tie_break() {
        let mut positions = vec![
            Position::new(150.0, 0),
            Position::new(100.0, 1),
            Position::new(100.0, 0),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![
                Position::new(100.0, 0),
                Position::new(100.0, 1),
                Position::new(150.0, 0),
            ]
        );
    }

    #[test]
    fn cursor_bound_respects_tie_break() {
        let bound = PositionBound::cursor(Position::new(100.0, 0));
        assert!(!bound.precedes(&Position::new(100.0, 0)));
        assert!(bound.precedes(&Position::new(100.0, 1)));
        assert!(bound.precedes(&Position::new(150.0, 0)));
    }

    #[test]
    fn value_bound_excludes_whole_reading() {
        let bound = PositionBound::value(100.0);
        assert!(!bound.precedes(&Position::new(100.0, 7)));
        assert!(bound.precedes(&Position::new(100.5, 0)));
        assert!(bound.follows(&Position::new(99.0, 3)));
    }
}
