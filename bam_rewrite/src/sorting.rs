//! Sort keys assigned to records before they enter a rewrite buffer.

use crate::record::{Record, SortKey};
use serde::{Deserialize, Serialize};

/// Which order a rewrite buffer is sorted into before it is flushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Reference id, position, then strand (forward first).
    Coordinate,
    /// Keep arrival order. Every key is absent so the stable reorder is a no-op.
    Input,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coordinate" => Ok(SortOrder::Coordinate),
            "input" => Ok(SortOrder::Input),
            _ => Err(format!("unknown sort order '{}'", s)),
        }
    }
}

const REF_BITS: u32 = 31;
const UNPLACED_REF: u64 = (1 << REF_BITS) - 1;

/// Packs (refID, pos, is_reverse) so integer order equals coordinate order.
/// Unplaced records (refID -1) sort after every placed one, but still before
/// [`SortKey::ABSENT`]. A dictionary holds at most `i32::MAX` references, so
/// `i32::MAX` is never a valid refID and is treated as unplaced too.
pub fn coordinate_key(ref_id: i32, pos: i32, is_reverse: bool) -> SortKey {
    let ref_part = if ref_id < 0 || ref_id as u64 >= UNPLACED_REF {
        UNPLACED_REF
    } else {
        ref_id as u64
    };
    // pos is -1 for unplaced records.
    let pos_part = (pos as i64 + 1).clamp(0, UNPLACED_REF as i64) as u64;
    SortKey(ref_part << 33 | pos_part << 1 | is_reverse as u64)
}

pub fn sort_key(rec: &Record, order: SortOrder) -> SortKey {
    match order {
        SortOrder::Coordinate => coordinate_key(
            rec.ref_id(),
            rec.pos(),
            rec.flags().is_reverse_complemented(),
        ),
        SortOrder::Input => SortKey::ABSENT,
    }
}
