//! Rank allocation for intra-column ordering.
//!
//! Ranks are base-36 fractional keys (`0-9a-z`) read as digits after an
//! implicit radix point, so `"i"` sits at 18/36 and `"i8"` just after it.
//! A new rank between two neighbours is their digit-wise midpoint. Keys
//! never end in `0`, which keeps every pair of distinct keys separable.
//!
//! When the neighbours cannot be split within `max_len` digits, or when
//! they are not keys this allocator understands (ranks are opaque and may
//! come from elsewhere), the whole column is renumbered with evenly spaced
//! keys in its current display order.

use crate::config::RankConfig;
use crate::types::{Rank, Ticket, TicketId};

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const BASE: u8 = 36;

/// Result of placing one ticket in a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// Only the placed ticket gets a new rank.
    Between(Rank),
    /// Precision ran out; every ticket in the column, the placed one
    /// included, gets a fresh rank. Entries are in display order.
    Renumbered(Vec<(TicketId, Rank)>),
}

impl Allocation {
    /// The rank the placed ticket ends up with.
    pub fn rank_of(&self, ticket_id: &TicketId) -> Option<&Rank> {
        match self {
            Allocation::Between(rank) => Some(rank),
            Allocation::Renumbered(ranks) => ranks
                .iter()
                .find(|(id, _)| id == ticket_id)
                .map(|(_, rank)| rank),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankAllocator {
    max_len: usize,
    renumber_width: usize,
}

impl Default for RankAllocator {
    fn default() -> Self {
        Self::from_config(&RankConfig::default())
    }
}

impl RankAllocator {
    pub fn from_config(config: &RankConfig) -> Self {
        Self {
            max_len: config.max_len.max(1),
            renumber_width: config.renumber_width.max(1),
        }
    }

    /// Place `ticket_id` at `index` of `column`.
    ///
    /// `column` is the target column in display order *without* the placed
    /// ticket. `index` is clamped to the column length.
    pub fn allocate(&self, ticket_id: &TicketId, index: usize, column: &[Ticket]) -> Allocation {
        let index = index.min(column.len());
        let before = index.checked_sub(1).map(|i| &column[i].rank);
        let after = column.get(index).map(|t| &t.rank);

        if let Some(rank) = self.between(before, after) {
            return Allocation::Between(rank);
        }

        tracing::debug!(
            ticket = %ticket_id,
            column_len = column.len(),
            "rank space exhausted, renumbering column"
        );
        let mut order: Vec<&TicketId> = column.iter().map(|t| &t.id).collect();
        order.insert(index, ticket_id);
        let ranks = self.spread(order.len());
        Allocation::Renumbered(
            order
                .into_iter()
                .cloned()
                .zip(ranks)
                .collect(),
        )
    }

    /// A rank strictly between `before` and `after` (either may be open),
    /// or `None` if none fits within `max_len` digits.
    pub fn between(&self, before: Option<&Rank>, after: Option<&Rank>) -> Option<Rank> {
        let lo = match before {
            Some(rank) => parse_key(rank.as_str())?,
            None => Vec::new(),
        };
        let hi = match after {
            Some(rank) => Some(parse_key(rank.as_str())?),
            None => None,
        };
        if let Some(hi) = &hi
            && lo >= *hi
        {
            return None;
        }

        let digits = midpoint(&lo, hi.as_deref());
        if digits.len() > self.max_len {
            return None;
        }
        Some(Rank::new(render(&digits)))
    }

    /// `count` evenly spaced ranks in ascending order.
    pub fn spread(&self, count: usize) -> Vec<Rank> {
        let mut width = self.renumber_width;
        // Need at least count + 1 gaps at this width.
        while (BASE as u128).pow(width as u32) <= (count as u128 + 1) * 2 {
            width += 1;
        }
        let space = (BASE as u128).pow(width as u32);
        let step = space / (count as u128 + 1);

        (1..=count as u128)
            .map(|i| {
                let mut digits = to_digits(i * step, width);
                while digits.last() == Some(&0) {
                    digits.pop();
                }
                Rank::new(render(&digits))
            })
            .collect()
    }
}

/// Digits of a key this allocator can split, or `None` for foreign keys.
fn parse_key(key: &str) -> Option<Vec<u8>> {
    if key.is_empty() || key.ends_with('0') {
        return None;
    }
    key.bytes()
        .map(|b| ALPHABET.iter().position(|&a| a == b).map(|p| p as u8))
        .collect()
}

fn render(digits: &[u8]) -> String {
    digits.iter().map(|&d| ALPHABET[d as usize] as char).collect()
}

fn to_digits(mut value: u128, width: usize) -> Vec<u8> {
    let mut digits = vec![0u8; width];
    for slot in digits.iter_mut().rev() {
        *slot = (value % BASE as u128) as u8;
        value /= BASE as u128;
    }
    digits
}

/// Digit-wise midpoint of `lo < hi`, where a missing `hi` is 1.0 and
/// neither input ends in a zero digit. The result never ends in zero.
fn midpoint(lo: &[u8], hi: Option<&[u8]>) -> Vec<u8> {
    if let Some(hi) = hi {
        let shared = hi
            .iter()
            .enumerate()
            .take_while(|(i, d)| lo.get(*i).copied().unwrap_or(0) == **d)
            .count();
        if shared > 0 {
            let mut out = hi[..shared].to_vec();
            let rest_lo = lo.get(shared..).unwrap_or(&[]);
            out.extend(midpoint(rest_lo, Some(&hi[shared..])));
            return out;
        }
    }

    let d_lo = lo.first().copied().unwrap_or(0);
    let d_hi = hi.map(|h| h[0]).unwrap_or(BASE);

    if d_hi - d_lo > 1 {
        return vec![(d_lo + d_hi) / 2];
    }

    if let Some(hi) = hi
        && hi.len() > 1
    {
        return vec![hi[0]];
    }

    let mut out = vec![d_lo];
    out.extend(midpoint(lo.get(1..).unwrap_or(&[]), None));
    out
}
