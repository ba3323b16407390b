//! Mate information shared between the two primary records of a template.
//!
//! Follows htsjdk's `SamPairUtil.setMateInfo` for mate position, strand and
//! insert size, and adds the `ms` mate score of `samtools fixmate`.

use crate::record::tags;
use crate::record::{cigar, Flags, Record, Role};

pub const MATE_MAPQ_TAG: [u8; 2] = *b"MQ";
pub const MATE_CIGAR_TAG: [u8; 2] = *b"MC";
pub const MATE_SCORE_TAG: [u8; 2] = *b"ms";

/// Base qualities below this do not count towards the mate score.
const MIN_SCORED_QUAL: u8 = 15;

/// What one half of a pair tells the other.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MateInfo {
    ref_id: i32,
    pos: i32,
    end: i64,
    is_reverse: bool,
    is_unmapped: bool,
    mapq: u8,
    cigar: String,
    score: i64,
}

impl MateInfo {
    fn of(rec: &Record) -> Self {
        let flags = rec.flags();
        let ref_len = i64::from(cigar::reference_length(rec.raw_cigar()));
        let mut cigar_text = String::new();
        if !rec.raw_cigar().is_empty() {
            cigar::format(rec.raw_cigar(), &mut cigar_text);
        }
        MateInfo {
            ref_id: rec.ref_id(),
            pos: rec.pos(),
            end: i64::from(rec.pos()) + ref_len.max(1) - 1,
            is_reverse: flags.is_reverse_complemented(),
            is_unmapped: flags.is_unmapped(),
            mapq: rec.mapq(),
            cigar: cigar_text,
            score: quality_score(rec.qualities()),
        }
    }

    /// 5' end of the alignment.
    fn five_prime(&self) -> i64 {
        if self.is_reverse {
            self.end
        } else {
            i64::from(self.pos)
        }
    }

    fn is_placed(&self) -> bool {
        !self.is_unmapped && self.ref_id >= 0
    }

    /// Bytes the tags derived from this mate take.
    fn tags_size(&self) -> usize {
        let mut size = tags::int_tag_size(self.score);
        if self.is_placed() {
            size += tags::int_tag_size(self.mapq as i64);
            if !self.cigar.is_empty() {
                size += 2 + 1 + self.cigar.len() + 1;
            }
        }
        size
    }
}

/// Sum of the base qualities of at least `MIN_SCORED_QUAL`, 0 when qualities
/// are missing.
pub fn quality_score(qual: &[u8]) -> i64 {
    if qual.first() == Some(&0xff) {
        return 0;
    }
    qual.iter()
        .filter(|&&q| q >= MIN_SCORED_QUAL)
        .map(|&q| q as i64)
        .sum()
}

/// Signed insert size as htsjdk computes it: distance between the 5' ends,
/// positive when `other` lies downstream of `this`, clamped to `i32`. 0
/// unless both are mapped to the same reference.
fn insert_size(this: &MateInfo, other: &MateInfo) -> i32 {
    if !this.is_placed() || !other.is_placed() || this.ref_id != other.ref_id {
        return 0;
    }
    let first = this.five_prime();
    let second = other.five_prime();
    let adjustment = if second >= first { 1 } else { -1 };
    let tlen = second - first + adjustment;
    tlen.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Positions of the single First and single Second record of a group, if
/// the group holds exactly one of each.
pub fn find_pair(group: &[Record]) -> Option<(usize, usize)> {
    let mut first = None;
    let mut second = None;
    for (idx, rec) in group.iter().enumerate() {
        let slot = match rec.role() {
            Role::First => &mut first,
            Role::Second => &mut second,
            _ => continue,
        };
        if slot.replace(idx).is_some() {
            return None;
        }
    }
    first.zip(second)
}

/// Augments the complementary pair of the group, if there is one. Returns
/// true if a pair was augmented.
pub fn augment_group(group: &mut [Record]) -> bool {
    let (a, b) = match find_pair(group) {
        Some(pair) => pair,
        None => return false,
    };
    let (lo, hi) = (a.min(b), a.max(b));
    let (head, tail) = group.split_at_mut(hi);
    augment_pair(&mut head[lo], &mut tail[0]);
    true
}

/// Cross populates mate fields of two records of one template. Every derived
/// field is recomputed from scratch, so a second run changes nothing.
pub fn augment_pair(a: &mut Record, b: &mut Record) {
    let a_info = MateInfo::of(a);
    let b_info = MateInfo::of(b);
    let tlen = insert_size(&a_info, &b_info);
    apply(a, &b_info, tlen);
    apply(b, &a_info, -tlen);
}

fn apply(rec: &mut Record, mate: &MateInfo, tlen: i32) {
    rec.reserve(mate.tags_size());

    rec.set_next_ref_id(mate.ref_id);
    rec.set_next_pos(mate.pos);
    rec.set_template_length(tlen);

    let mut flags = rec.flags();
    flags.set(Flags::MATE_REVERSE_COMPLEMENTED, mate.is_reverse);
    flags.set(Flags::MATE_UNMAPPED, mate.is_unmapped);
    rec.set_flags(flags);

    let aux_start = rec.tags_offset();
    let data = rec.data_mut();
    tags::remove_tags(data, aux_start, &[MATE_MAPQ_TAG, MATE_CIGAR_TAG, MATE_SCORE_TAG]);
    if mate.is_placed() {
        tags::push_int(data, &MATE_MAPQ_TAG, mate.mapq as i64);
        if !mate.cigar.is_empty() {
            tags::push_string(data, &MATE_CIGAR_TAG, mate.cigar.as_bytes());
        }
    }
    tags::push_int(data, &MATE_SCORE_TAG, mate.score);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::builder::RecordBuilder;
    use crate::record::SlotId;

    fn record(builder: RecordBuilder) -> Record {
        let mut rec = Record::with_slot(SlotId(0));
        rec.load(&builder.build()).unwrap();
        rec
    }

    fn r1() -> RecordBuilder {
        RecordBuilder::new("pair")
            .flags(Flags::SEGMENTED | Flags::FIRST_SEGMENT)
            .ref_id(0)
            .pos(100)
            .mapq(60)
            .cigar("50M")
            .seq(&"A".repeat(50))
            .qual(&[30; 50])
            .int_tag(b"NM", 0)
    }

    fn r2() -> RecordBuilder {
        RecordBuilder::new("pair")
            .flags(Flags::SEGMENTED | Flags::LAST_SEGMENT | Flags::REVERSE_COMPLEMENTED)
            .ref_id(0)
            .pos(300)
            .mapq(20)
            .cigar("10S40M")
            .seq(&"C".repeat(50))
            .qual(&[10; 50])
    }

    fn tag_int(rec: &Record, name: &[u8; 2]) -> Option<i64> {
        rec.tag(name).and_then(|t| t.as_int())
    }

    fn tag_str<'a>(rec: &'a Record, name: &[u8; 2]) -> Option<&'a [u8]> {
        rec.tag(name).and_then(|t| t.as_str_bytes())
    }

    #[test]
    fn test_both_mapped() {
        let mut a = record(r1());
        let mut b = record(r2());
        augment_pair(&mut a, &mut b);

        assert_eq!((a.next_ref_id(), a.next_pos()), (0, 300));
        assert_eq!((b.next_ref_id(), b.next_pos()), (0, 100));
        assert!(a.flags().contains(Flags::MATE_REVERSE_COMPLEMENTED));
        assert!(!b.flags().contains(Flags::MATE_REVERSE_COMPLEMENTED));
        assert!(!a.flags().contains(Flags::MATE_UNMAPPED));

        // r2 covers 300..340 on the reverse strand, 5' end 339.
        assert_eq!(a.template_length(), 339 - 100 + 1);
        assert_eq!(b.template_length(), -(339 - 100 + 1));

        assert_eq!(tag_int(&a, b"MQ"), Some(20));
        assert_eq!(tag_str(&a, b"MC"), Some(&b"10S40M"[..]));
        assert_eq!(tag_int(&a, b"ms"), Some(0));
        assert_eq!(tag_int(&b, b"MQ"), Some(60));
        assert_eq!(tag_str(&b, b"MC"), Some(&b"50M"[..]));
        assert_eq!(tag_int(&b, b"ms"), Some(30 * 50));
        // Existing tags survive.
        assert_eq!(tag_int(&a, b"NM"), Some(0));
        assert_eq!(a.role(), Role::First);
    }

    #[test]
    fn test_augmentation_is_idempotent() {
        let mut a = record(r1());
        let mut b = record(r2());
        augment_pair(&mut a, &mut b);
        let (once_a, once_b) = (a.data().to_vec(), b.data().to_vec());
        augment_pair(&mut a, &mut b);
        assert_eq!(a.data(), &once_a[..]);
        assert_eq!(b.data(), &once_b[..]);
        assert!(a.capacity_hint() >= a.len());
    }

    #[test]
    fn test_unmapped_mate() {
        let mut a = record(r1());
        let mut b = record(
            RecordBuilder::new("pair").flags(Flags::SEGMENTED | Flags::LAST_SEGMENT | Flags::UNMAPPED),
        );
        augment_pair(&mut a, &mut b);
        assert!(a.flags().contains(Flags::MATE_UNMAPPED));
        assert_eq!(a.template_length(), 0);
        assert!(a.tag(b"MQ").is_none());
        assert!(a.tag(b"MC").is_none());
        assert_eq!(tag_int(&a, b"ms"), Some(0));
        // The unmapped half still learns where its mate is.
        assert_eq!((b.next_ref_id(), b.next_pos()), (0, 100));
        assert_eq!(tag_int(&b, b"MQ"), Some(60));
    }

    #[test]
    fn test_extreme_coordinates_saturate() {
        let mut a = record(r1().pos(0));
        let mut b = record(r2().pos(i32::MAX - 10));
        augment_pair(&mut a, &mut b);
        assert_eq!(a.template_length(), i32::MAX);
        assert_eq!(b.template_length(), i32::MIN);
        assert_eq!(b.next_pos(), 0);
        assert_eq!(a.next_pos(), i32::MAX - 10);
    }

    #[test]
    fn test_find_pair() {
        let secondary = r1().flags(Flags::SEGMENTED | Flags::FIRST_SEGMENT | Flags::SECONDARY);
        let group = vec![record(r2()), record(secondary), record(r1())];
        assert_eq!(find_pair(&group), Some((2, 0)));

        let group = vec![record(r1()), record(r1()), record(r2())];
        assert_eq!(find_pair(&group), None);

        let group = vec![record(r1())];
        assert_eq!(find_pair(&group), None);
    }

    #[test]
    fn test_augment_group_in_reverse_order() {
        let mut group = vec![record(r2()), record(r1())];
        assert!(augment_group(&mut group));
        assert_eq!(group[0].next_pos(), 100);
        assert_eq!(group[1].next_pos(), 300);
    }

    #[test]
    fn test_quality_score() {
        assert_eq!(quality_score(&[10, 15, 40]), 55);
        assert_eq!(quality_score(&[0xff, 0xff]), 0);
        assert_eq!(quality_score(&[]), 0);
    }
}
