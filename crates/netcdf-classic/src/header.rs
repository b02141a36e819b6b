//! Structural check of a NetCDF-3 header before it reaches the decoder.
//!
//! Every element count in the header is bounded by the bytes that remain
//! after it, so a corrupt count is reported as `InvalidFormat` instead of
//! driving a huge allocation.

use crate::error::{NetCdfError, NetCdfResult};
use crate::types::NcType;

const NC_DIMENSION: u32 = 0x0A;
const NC_VARIABLE: u32 = 0x0B;
const NC_ATTRIBUTE: u32 = 0x0C;

/// Smallest encoding of one list entry: a zero-length name plus the fixed fields.
const MIN_DIMENSION: usize = 8;
const MIN_ATTRIBUTE: usize = 12;
const MIN_VARIABLE: usize = 28;

/// Walk the header and return the format version byte (1 or 2).
pub(crate) fn check(data: &[u8]) -> NetCdfResult<u8> {
    let mut cursor = Cursor { data, pos: 0 };

    let magic = cursor.take(4)?;
    if &magic[..3] != b"CDF" {
        return Err(NetCdfError::InvalidFormat(
            "not a NetCDF classic file".to_string(),
        ));
    }
    let version = magic[3];
    if version != 1 && version != 2 {
        return Err(NetCdfError::InvalidFormat(format!(
            "unsupported NetCDF version byte {}",
            version
        )));
    }
    cursor.u32()?; // numrecs

    let dims = cursor.list(NC_DIMENSION, MIN_DIMENSION)?;
    for _ in 0..dims {
        cursor.name()?;
        cursor.u32()?;
    }

    cursor.attributes()?;

    let vars = cursor.list(NC_VARIABLE, MIN_VARIABLE)?;
    for _ in 0..vars {
        cursor.name()?;
        let ndims = cursor.count(4)?;
        for _ in 0..ndims {
            let id = cursor.u32()? as usize;
            if id >= dims {
                return Err(NetCdfError::InvalidFormat(format!(
                    "variable references unknown dimension {}",
                    id
                )));
            }
        }
        cursor.attributes()?;
        NcType::from_code(cursor.u32()?)?;
        cursor.u32()?; // vsize
        cursor.take(if version == 1 { 4 } else { 8 })?; // begin
    }

    Ok(version)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> NetCdfResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(NetCdfError::InvalidFormat(format!(
                "header truncated at byte {}",
                self.pos
            ))),
        }
    }

    fn u32(&mut self) -> NetCdfResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a count of elements that take at least `min_size` bytes each.
    fn count(&mut self, min_size: usize) -> NetCdfResult<usize> {
        let at = self.pos;
        let count = self.u32()? as usize;
        if count.saturating_mul(min_size) > self.remaining() {
            return Err(NetCdfError::InvalidFormat(format!(
                "count {} at byte {} exceeds the file size",
                count, at
            )));
        }
        Ok(count)
    }

    fn name(&mut self) -> NetCdfResult<()> {
        let len = self.count(1)?;
        self.take(padded(len))?;
        Ok(())
    }

    /// Read a list tag and count. ABSENT yields zero.
    fn list(&mut self, expected: u32, min_size: usize) -> NetCdfResult<usize> {
        let tag = self.u32()?;
        let count = self.count(min_size)?;
        if tag == 0 && count == 0 {
            return Ok(0);
        }
        if tag != expected {
            return Err(NetCdfError::InvalidFormat(format!(
                "expected list tag {:#x}, found {:#x}",
                expected, tag
            )));
        }
        Ok(count)
    }

    fn attributes(&mut self) -> NetCdfResult<()> {
        let count = self.list(NC_ATTRIBUTE, MIN_ATTRIBUTE)?;
        for _ in 0..count {
            self.name()?;
            let nc_type = NcType::from_code(self.u32()?)?;
            let nelems = self.count(nc_type.size())?;
            self.take(padded(nelems * nc_type.size()))?;
        }
        Ok(())
    }
}

/// Round `n` up to the next multiple of four.
fn padded(n: usize) -> usize {
    n.saturating_add(3) & !3
}
