/// A decoded alignment record, reduced to the fields splitting and
/// filtering look at.
///
/// Positions follow the on-disk convention: `position` is 0-based and `-1`
/// when the record has none, `reference_id` is `-1` for unplaced records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    pub name: Vec<u8>,
    pub flags: u16,
    pub reference_id: i32,
    pub position: i32,
    /// Reference bases covered by the CIGAR (M/D/N/=/X)
    pub reference_span: u32,
    pub mate_reference_id: i32,
    pub mate_position: i32,
}

/// SAM flag bits.
pub mod flags {
    pub const PAIRED: u16 = 0x1;
    pub const UNMAPPED: u16 = 0x4;
    pub const MATE_UNMAPPED: u16 = 0x8;
    pub const REVERSE: u16 = 0x10;
    pub const MATE_REVERSE: u16 = 0x20;
    pub const FIRST_SEGMENT: u16 = 0x40;
    pub const LAST_SEGMENT: u16 = 0x80;
    pub const SECONDARY: u16 = 0x100;
    pub const SUPPLEMENTARY: u16 = 0x800;
}

impl AlignmentRecord {
    pub fn is_paired(&self) -> bool {
        self.flags & flags::PAIRED != 0
    }

    pub fn is_unmapped(&self) -> bool {
        self.flags & flags::UNMAPPED != 0
    }

    pub fn is_first_of_pair(&self) -> bool {
        self.flags & flags::FIRST_SEGMENT != 0
    }

    pub fn is_second_of_pair(&self) -> bool {
        self.flags & flags::LAST_SEGMENT != 0
    }

    pub fn is_secondary_or_supplementary(&self) -> bool {
        self.flags & (flags::SECONDARY | flags::SUPPLEMENTARY) != 0
    }

    /// No reference sequence at all (the trailing unplaced, unmapped block of a sorted file)
    pub fn is_unplaced(&self) -> bool {
        self.reference_id < 0
    }

    pub fn is_primary(&self) -> bool {
        !self.is_secondary_or_supplementary()
    }

    /// Sort key of this record in a coordinate-sorted file. Unplaced records
    /// sort last.
    pub fn placement_key(&self) -> (u32, i32) {
        placement(self.reference_id, self.position)
    }

    /// Where the mate sorts, by the same rule as [`placement_key`](Self::placement_key)
    pub fn mate_placement_key(&self) -> (u32, i32) {
        placement(self.mate_reference_id, self.mate_position)
    }

    /// 1-based inclusive start, if the record is placed
    pub fn alignment_start(&self) -> Option<u32> {
        if self.reference_id < 0 || self.position < 0 {
            None
        } else {
            Some(self.position as u32 + 1)
        }
    }

    /// 1-based inclusive end. Records without reference span cover one base.
    pub fn alignment_end(&self) -> Option<u32> {
        self.alignment_start()
            .map(|start| start + self.reference_span.max(1) - 1)
    }

    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

fn placement(reference_id: i32, position: i32) -> (u32, i32) {
    if reference_id < 0 {
        (u32::MAX, i32::MAX)
    } else {
        (reference_id as u32, position)
    }
}
