/// Maximum number of LEB128 groups accepted before a read is treated as
/// malformed.
pub const MAX_LEB128_BYTES: usize = 8;

/// MSB-first bit cursor over a byte slice.
///
/// The plain `read_*`/`skip_*` methods panic when asked to read past the end
/// of the range. Parsers that must survive arbitrary input use the `try_*`
/// variants, which return `None` instead and leave the cursor untouched.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
    limit: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            limit: data.len() * 8,
        }
    }

    /// Reader over `data[start..end]`, positioned at `start`. Offsets are in
    /// bytes and are clamped to the slice.
    pub fn with_range(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        let start = start.min(end);
        Self {
            data,
            position: start * 8,
            limit: end * 8,
        }
    }

    /// Current bit position relative to the start of the slice.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Byte containing the next unread bit.
    pub fn byte_position(&self) -> usize {
        self.position / 8
    }

    pub fn bits_left(&self) -> usize {
        self.limit - self.position
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.position % 8 == 0
    }

    /// Advances to the next byte boundary.
    pub fn byte_align(&mut self) {
        self.position = ((self.position + 7) / 8 * 8).min(self.limit);
    }

    /// Reads `n` bits, most significant first.
    ///
    /// # Panics
    ///
    /// If `n` is not in `1..=32` or fewer than `n` bits remain.
    pub fn read_bits(&mut self, n: u32) -> u32 {
        assert!((1..=32).contains(&n), "cannot read {} bits at once", n);
        assert!(
            n as usize <= self.bits_left(),
            "read of {} bits past end ({} left)",
            n,
            self.bits_left()
        );
        let mut value: u64 = 0;
        let mut remaining = n as usize;
        while remaining > 0 {
            let byte = self.data[self.position / 8];
            let bit_offset = self.position % 8;
            let take = remaining.min(8 - bit_offset);
            let shift = 8 - bit_offset - take;
            let bits = (byte >> shift) & ((1u16 << take) - 1) as u8;
            value = (value << take) | bits as u64;
            self.position += take;
            remaining -= take;
        }
        value as u32
    }

    pub fn read_bit(&mut self) -> bool {
        self.read_bits(1) == 1
    }

    pub fn skip_bit(&mut self) {
        self.skip_bits(1);
    }

    /// # Panics
    ///
    /// If fewer than `n` bits remain.
    pub fn skip_bits(&mut self, n: usize) {
        assert!(
            n <= self.bits_left(),
            "skip of {} bits past end ({} left)",
            n,
            self.bits_left()
        );
        self.position += n;
    }

    pub fn try_read_bits(&mut self, n: u32) -> Option<u32> {
        if n == 0 || n > 32 || n as usize > self.bits_left() {
            return None;
        }
        Some(self.read_bits(n))
    }

    pub fn try_read_flag(&mut self) -> Option<bool> {
        self.try_read_bits(1).map(|bit| bit == 1)
    }

    pub fn try_skip_bits(&mut self, n: usize) -> Option<()> {
        if n > self.bits_left() {
            return None;
        }
        self.position += n;
        Some(())
    }

    /// Reads an unsigned LEB128 value: 7 value bits per byte, least
    /// significant group first, high bit set on every group but the last.
    ///
    /// Returns `None` if the data ends mid-value or the value does not
    /// terminate within [`MAX_LEB128_BYTES`] groups. The cursor is left
    /// unchanged on failure.
    pub fn read_uleb128(&mut self) -> Option<u64> {
        let start = self.position;
        let mut value: u64 = 0;
        for i in 0..MAX_LEB128_BYTES {
            let Some(byte) = self.try_read_bits(8) else {
                self.position = start;
                return None;
            };
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        self.position = start;
        None
    }

    /// Reads the AV1 `uvlc()` descriptor: a run of leading zero bits, a
    /// marker bit, then as many value bits as there were zeros.
    ///
    /// Runs of 32 or more zeros decode to `u32::MAX`.
    pub fn read_uvlc(&mut self) -> Option<u32> {
        let start = self.position;
        let mut leading_zeros = 0u32;
        loop {
            match self.try_read_flag() {
                Some(true) => break,
                Some(false) => leading_zeros += 1,
                None => {
                    self.position = start;
                    return None;
                }
            }
        }
        if leading_zeros >= 32 {
            return Some(u32::MAX);
        }
        let value = if leading_zeros == 0 {
            0
        } else {
            match self.try_read_bits(leading_zeros) {
                Some(v) => v,
                None => {
                    self.position = start;
                    return None;
                }
            }
        };
        Some(((1u64 << leading_zeros) - 1 + u64::from(value)) as u32)
    }
}
