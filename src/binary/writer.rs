use super::BinaryError;

/// Growable little-endian write cursor.
///
/// Writes at or past the end zero-extend the buffer first; nothing ever
/// truncates it. The `_at` variants are positional and leave the live
/// cursor alone — they exist for backpatching already-written regions.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    data: Vec<u8>,
    offset: usize,
}

/// Handle for a header written before its field values are known.
///
/// Produced by [`BinaryWriter::reserve`], consumed exactly once by
/// [`BinaryWriter::finalize`]; the move prevents double-finalizing.
#[derive(Debug)]
#[must_use = "a reserved header must be finalized"]
pub struct Reservation {
    offset: usize,
    size: usize,
}

impl Reservation {
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            offset: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn ensure(&mut self, end: usize) {
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) {
        self.ensure(offset + bytes.len());
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.put(self.offset, bytes);
        self.offset += bytes.len();
    }

    pub fn write_bytes_at(&mut self, offset: usize, bytes: &[u8]) {
        self.put(offset, bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32_at(&mut self, offset: usize, v: u32) {
        self.write_bytes_at(offset, &v.to_le_bytes());
    }

    /// Write `u32(items.len() * divisor)` followed by the items.
    ///
    /// The divisor covers formats whose on-disk count is in a different
    /// unit than the element count — flattened triangle index triples are
    /// counted as individual scalars (divisor 3).
    pub fn write_len_prefixed<T, F>(&mut self, items: &[T], divisor: u32, mut write_element: F)
    where
        F: FnMut(&mut Self, &T),
    {
        self.write_u32(items.len() as u32 * divisor);
        for item in items {
            write_element(self, item);
        }
    }

    /// Zero-pad up to the next multiple of `boundary`.
    pub fn pad_to(&mut self, boundary: usize) {
        debug_assert!(boundary.is_power_of_two());
        while self.offset % boundary != 0 {
            self.write_u8(0);
        }
    }

    /// Reserve `size` zero bytes at the cursor for a header whose values
    /// are not yet known.
    pub fn reserve(&mut self, size: usize) -> Reservation {
        let offset = self.offset;
        self.write_bytes(&vec![0u8; size]);
        Reservation { offset, size }
    }

    /// Rewrite a reserved header with its real values.
    ///
    /// `encode` runs with the cursor at the reserved offset and must write
    /// exactly the reserved size through the same encoding path used for
    /// live headers; anything else corrupts every later offset and fails
    /// with [`BinaryError::HeaderSizeMismatch`]. The cursor is restored to
    /// the previous end afterwards so sibling data writing resumes.
    pub fn finalize<F>(&mut self, reservation: Reservation, encode: F) -> Result<(), BinaryError>
    where
        F: FnOnce(&mut Self),
    {
        let end = self.offset;
        self.offset = reservation.offset;
        encode(self);
        let written = self.offset - reservation.offset;
        self.offset = end;
        if written != reservation.size {
            return Err(BinaryError::HeaderSizeMismatch {
                offset: reservation.offset,
                reserved: reservation.size,
                written,
            });
        }
        Ok(())
    }
}
