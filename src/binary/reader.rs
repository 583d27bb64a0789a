use super::{BinaryError, COUNT_SANITY_CEILING};

/// Bounds-checked little-endian read cursor.
///
/// Maintains `offset <= limit <= data.len()` for the whole session. The
/// limit starts at the buffer length and is narrowed with [`set_limit`]
/// while parsing a known-size embedded section, so an offset bug fails at
/// the section boundary rather than reading adjacent unrelated data.
///
/// [`set_limit`]: BinaryReader::set_limit
#[derive(Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    offset: usize,
    limit: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            limit: data.len(),
        }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.offset
    }

    /// Narrow (or restore) the overflow boundary. Returns the old limit.
    pub fn set_limit(&mut self, limit: usize) -> Result<usize, BinaryError> {
        if limit < self.offset || limit > self.data.len() {
            return Err(BinaryError::Overflow {
                offset: self.offset,
                requested: 0,
                limit,
            });
        }
        Ok(std::mem::replace(&mut self.limit, limit))
    }

    pub fn seek(&mut self, offset: usize) -> Result<(), BinaryError> {
        if offset > self.limit {
            return Err(BinaryError::Overflow {
                offset,
                requested: 0,
                limit: self.limit,
            });
        }
        self.offset = offset;
        Ok(())
    }

    fn take(&mut self, size: usize) -> Result<&'a [u8], BinaryError> {
        if size == 0 {
            return Ok(&[]);
        }
        let end = self.offset.checked_add(size).ok_or(BinaryError::Overflow {
            offset: self.offset,
            requested: size,
            limit: self.limit,
        })?;
        if end > self.limit {
            return Err(BinaryError::Overflow {
                offset: self.offset,
                requested: size,
                limit: self.limit,
            });
        }
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    pub fn read_bytes(&mut self, size: usize) -> Result<&'a [u8], BinaryError> {
        self.take(size)
    }

    /// Positional read; does not move the live cursor.
    pub fn read_bytes_at(&self, offset: usize, size: usize) -> Result<&'a [u8], BinaryError> {
        if size == 0 {
            return Ok(&[]);
        }
        let end = offset.checked_add(size).ok_or(BinaryError::Overflow {
            offset,
            requested: size,
            limit: self.limit,
        })?;
        if end > self.limit {
            return Err(BinaryError::Overflow {
                offset,
                requested: size,
                limit: self.limit,
            });
        }
        Ok(&self.data[offset..end])
    }

    pub fn read_u8(&mut self) -> Result<u8, BinaryError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, BinaryError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, BinaryError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&mut self) -> Result<f32, BinaryError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Single bytes until NUL, decoded as Latin-1. The terminator is
    /// consumed but excluded from the result.
    pub fn read_cstr(&mut self) -> Result<String, BinaryError> {
        let mut out = String::new();
        loop {
            let byte = self.read_u8()?;
            if byte == 0 {
                return Ok(out);
            }
            out.push(byte as char);
        }
    }

    /// Read a `u32` count, validate it against the sanity ceiling and the
    /// unit divisor, then decode `count / divisor` elements.
    pub fn read_len_prefixed<T, F>(
        &mut self,
        divisor: u32,
        mut read_element: F,
    ) -> Result<Vec<T>, BinaryError>
    where
        F: FnMut(&mut Self) -> Result<T, BinaryError>,
    {
        debug_assert!(divisor > 0);
        let prefix_offset = self.offset;
        let count = self.read_u32()?;
        if count > COUNT_SANITY_CEILING {
            return Err(BinaryError::SuspiciousCount {
                offset: prefix_offset,
                count,
            });
        }
        if count % divisor != 0 {
            return Err(BinaryError::MisalignedCount {
                offset: prefix_offset,
                count,
                divisor,
            });
        }
        let element_count = (count / divisor) as usize;
        let mut out = Vec::with_capacity(element_count);
        for _ in 0..element_count {
            out.push(read_element(self)?);
        }
        Ok(out)
    }

    /// Consume padding up to the next multiple of `boundary`, requiring
    /// every padding byte to be zero.
    pub fn skip_padding(&mut self, boundary: usize) -> Result<(), BinaryError> {
        debug_assert!(boundary.is_power_of_two());
        while self.offset % boundary != 0 {
            let offset = self.offset;
            let value = self.read_u8()?;
            if value != 0 {
                return Err(BinaryError::NonZeroPadding { offset, value });
            }
        }
        Ok(())
    }
}
