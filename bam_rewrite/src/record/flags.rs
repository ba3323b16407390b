// Flag bits of the SAM/BAM FLAG field, named after noodles.

use bitflags::bitflags;

bitflags! {
    /// SAM record flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u16 {
        /// Read is paired (0x1).
        const SEGMENTED = 0x01;
        /// Each segment is properly aligned (0x2).
        const PROPERLY_ALIGNED = 0x02;
        /// Read is unmapped (0x4).
        const UNMAPPED = 0x04;
        /// Mate is unmapped (0x8).
        const MATE_UNMAPPED = 0x08;
        /// Sequence is reverse complemented (0x10).
        const REVERSE_COMPLEMENTED = 0x10;
        /// Sequence of the mate is reverse complemented (0x20).
        const MATE_REVERSE_COMPLEMENTED = 0x20;
        /// First segment in the template (0x40).
        const FIRST_SEGMENT = 0x40;
        /// Last segment in the template (0x80).
        const LAST_SEGMENT = 0x80;
        /// Secondary alignment (0x100).
        const SECONDARY = 0x0100;
        /// Not passing quality controls (0x200).
        const QC_FAIL = 0x0200;
        /// PCR or optical duplicate (0x400).
        const DUPLICATE = 0x0400;
        /// Supplementary alignment (0x800).
        const SUPPLEMENTARY = 0x0800;
    }
}

impl Flags {
    pub fn is_segmented(self) -> bool {
        self.contains(Self::SEGMENTED)
    }

    pub fn is_unmapped(self) -> bool {
        self.contains(Self::UNMAPPED)
    }

    pub fn is_reverse_complemented(self) -> bool {
        self.contains(Self::REVERSE_COMPLEMENTED)
    }

    pub fn is_first_segment(self) -> bool {
        self.contains(Self::FIRST_SEGMENT)
    }

    pub fn is_last_segment(self) -> bool {
        self.contains(Self::LAST_SEGMENT)
    }

    pub fn is_secondary(self) -> bool {
        self.contains(Self::SECONDARY)
    }

    pub fn is_supplementary(self) -> bool {
        self.contains(Self::SUPPLEMENTARY)
    }
}
