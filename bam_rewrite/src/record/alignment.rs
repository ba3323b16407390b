use super::fields::{self, Fields};
use super::flags::Flags;
use super::tags::{self, Tag};
use crate::error::DecodeError;

/// Identity of a record slot handed out by the record pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u64);

/// Who currently holds a record. Updated on every hand-off so tests can check
/// that a record has exactly one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Free, sitting in the record pool.
    Pool,
    /// Live or stashed in the parse buffer with this id.
    Parse(u32),
    /// Taken out of a parse buffer by a running dispatch.
    Dispatcher,
    /// Held back by a lane until its next fill.
    Lane(usize),
}

/// Position of a record within its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    First,
    Second,
    Unpaired,
    Secondary,
    Supplementary,
}

impl Role {
    pub fn from_flags(flags: Flags) -> Role {
        if flags.is_secondary() {
            Role::Secondary
        } else if flags.is_supplementary() {
            Role::Supplementary
        } else if flags.is_segmented() && flags.is_first_segment() {
            Role::First
        } else if flags.is_segmented() && flags.is_last_segment() {
            Role::Second
        } else {
            Role::Unpaired
        }
    }
}

/// Key the rewrite buffer orders records by. Missing keys sort to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SortKey(pub u64);

impl SortKey {
    pub const ABSENT: SortKey = SortKey(u64::MAX);

    pub fn is_absent(self) -> bool {
        self == Self::ABSENT
    }
}

impl Default for SortKey {
    fn default() -> Self {
        Self::ABSENT
    }
}

/// A decoded alignment record. The payload is the BAM binary representation
/// without the leading `block_size`.
///
/// Records are not `Clone`: a record moves between the pool, parse buffers and
/// dispatches, and only its bytes are ever copied (into a rewrite buffer).
#[derive(Debug)]
pub struct Record {
    slot: SlotId,
    owner: Owner,
    data: Vec<u8>,
    role: Role,
    sort_key: SortKey,
    capacity_hint: usize,
}

impl Record {
    pub(crate) fn with_slot(slot: SlotId) -> Self {
        Record {
            slot,
            owner: Owner::Pool,
            data: Vec::new(),
            role: Role::Unpaired,
            sort_key: SortKey::ABSENT,
            capacity_hint: 0,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
    }

    /// Replaces the payload with a copy of `bam` and validates it.
    pub fn load(&mut self, bam: &[u8]) -> Result<(), DecodeError> {
        self.data.clear();
        self.data.extend_from_slice(bam);
        self.finish_load()
    }

    /// Buffer codecs write a freshly encoded payload into, followed by
    /// [`Record::finish_load`].
    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub(crate) fn finish_load(&mut self) -> Result<(), DecodeError> {
        fields::validate(&self.data)?;
        self.role = Role::from_flags(self.flags());
        self.sort_key = SortKey::ABSENT;
        self.capacity_hint = self.data.capacity();
        Ok(())
    }

    /// Drops the payload but keeps its allocation for reuse.
    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.role = Role::Unpaired;
        self.sort_key = SortKey::ABSENT;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes the payload may grow to without reallocation.
    pub fn capacity_hint(&self) -> usize {
        self.capacity_hint
    }

    /// Grows the payload storage so `additional` more bytes fit.
    pub(crate) fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
        self.capacity_hint = self.data.capacity();
    }

    /// Read name, the key records of one template share.
    pub fn group_key(&self) -> &[u8] {
        let name = fields::get_bytes(&self.data, Fields::ReadName);
        &name[..name.len() - 1]
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    pub fn set_sort_key(&mut self, key: SortKey) {
        self.sort_key = key;
    }

    pub fn ref_id(&self) -> i32 {
        fields::read_i32(&self.data, Fields::RefID)
    }

    pub fn pos(&self) -> i32 {
        fields::read_i32(&self.data, Fields::Pos)
    }

    pub fn mapq(&self) -> u8 {
        fields::get_bytes(&self.data, Fields::Mapq)[0]
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_retain(fields::read_u16(&self.data, Fields::Flags))
    }

    pub fn set_flags(&mut self, flags: Flags) {
        fields::write_u16(&mut self.data, Fields::Flags, flags.bits());
        self.role = Role::from_flags(flags);
    }

    pub fn next_ref_id(&self) -> i32 {
        fields::read_i32(&self.data, Fields::NextRefID)
    }

    pub fn set_next_ref_id(&mut self, ref_id: i32) {
        fields::write_i32(&mut self.data, Fields::NextRefID, ref_id);
    }

    pub fn next_pos(&self) -> i32 {
        fields::read_i32(&self.data, Fields::NextPos)
    }

    pub fn set_next_pos(&mut self, pos: i32) {
        fields::write_i32(&mut self.data, Fields::NextPos, pos);
    }

    pub fn template_length(&self) -> i32 {
        fields::read_i32(&self.data, Fields::TemplateLength)
    }

    pub fn set_template_length(&mut self, tlen: i32) {
        fields::write_i32(&mut self.data, Fields::TemplateLength, tlen);
    }

    pub fn raw_cigar(&self) -> &[u8] {
        fields::get_bytes(&self.data, Fields::RawCigar)
    }

    pub fn raw_sequence(&self) -> &[u8] {
        fields::get_bytes(&self.data, Fields::RawSequence)
    }

    pub fn sequence_len(&self) -> usize {
        fields::get_bytes(&self.data, Fields::RawQual).len()
    }

    pub fn qualities(&self) -> &[u8] {
        fields::get_bytes(&self.data, Fields::RawQual)
    }

    pub fn raw_tags(&self) -> &[u8] {
        fields::get_bytes(&self.data, Fields::RawTags)
    }

    pub fn tags_offset(&self) -> usize {
        fields::field_range(&self.data, Fields::RawTags).start
    }

    pub fn tag(&self, name: &[u8; 2]) -> Option<Tag<'_>> {
        tags::get_tag(self.raw_tags(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::builder::RecordBuilder;

    fn record(builder: RecordBuilder) -> Record {
        let mut rec = Record::with_slot(SlotId(0));
        rec.load(&builder.build()).unwrap();
        rec
    }

    #[test]
    fn test_roles_from_flags() {
        let paired = Flags::SEGMENTED;
        assert_eq!(Role::from_flags(paired | Flags::FIRST_SEGMENT), Role::First);
        assert_eq!(Role::from_flags(paired | Flags::LAST_SEGMENT), Role::Second);
        assert_eq!(
            Role::from_flags(paired | Flags::FIRST_SEGMENT | Flags::SECONDARY),
            Role::Secondary
        );
        assert_eq!(
            Role::from_flags(paired | Flags::LAST_SEGMENT | Flags::SUPPLEMENTARY),
            Role::Supplementary
        );
        assert_eq!(Role::from_flags(Flags::FIRST_SEGMENT), Role::Unpaired);
        assert_eq!(Role::from_flags(Flags::empty()), Role::Unpaired);
    }

    #[test]
    fn test_accessors() {
        let rec = record(
            RecordBuilder::new("frag7")
                .flags(Flags::SEGMENTED | Flags::LAST_SEGMENT)
                .ref_id(2)
                .pos(500)
                .mapq(37)
                .cigar("4M")
                .seq("ACGT")
                .qual(&[10, 20, 30, 40])
                .int_tag(b"NM", 0),
        );
        assert_eq!(rec.group_key(), b"frag7");
        assert_eq!(rec.role(), Role::Second);
        assert_eq!(rec.ref_id(), 2);
        assert_eq!(rec.pos(), 500);
        assert_eq!(rec.mapq(), 37);
        assert_eq!(rec.sequence_len(), 4);
        assert_eq!(rec.qualities(), &[10, 20, 30, 40]);
        assert_eq!(rec.tag(b"NM").and_then(|t| t.as_int()), Some(0));
        assert!(rec.sort_key().is_absent());
    }

    #[test]
    fn test_failed_load_reports_decode_error() {
        let mut rec = Record::with_slot(SlotId(3));
        assert!(rec.load(&[0u8; 12]).is_err());
    }

    #[test]
    fn test_set_flags_updates_role() {
        let mut rec = record(RecordBuilder::new("r").flags(Flags::empty()));
        rec.set_flags(Flags::SEGMENTED | Flags::FIRST_SEGMENT);
        assert_eq!(rec.role(), Role::First);
        assert_eq!(rec.flags(), Flags::SEGMENTED | Flags::FIRST_SEGMENT);
    }
}
