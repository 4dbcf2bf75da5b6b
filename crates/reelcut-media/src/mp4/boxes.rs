//! ISO-BMFF box serialization and a small reader for inspecting output.

use reelcut_core::{ReelError, Result};

/// Writes nested boxes into a byte vector, patching sizes on close.
#[derive(Debug, Default)]
pub struct BoxWriter {
    pub buf: Vec<u8>,
    open: Vec<usize>,
}

impl BoxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a plain box.
    pub fn begin(&mut self, kind: &[u8; 4]) {
        self.open.push(self.buf.len());
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        self.buf.extend_from_slice(kind);
    }

    /// Open a full box (version + 24-bit flags).
    pub fn begin_full(&mut self, kind: &[u8; 4], version: u8, flags: u32) {
        self.begin(kind);
        self.u8(version);
        self.buf.extend_from_slice(&flags.to_be_bytes()[1..]);
    }

    /// Close the innermost open box.
    pub fn end(&mut self) {
        if let Some(start) = self.open.pop() {
            let size = (self.buf.len() - start) as u32;
            self.buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
        }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    /// The unity transformation matrix used by mvhd and tkhd.
    pub fn unity_matrix(&mut self) {
        for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            self.u32(v);
        }
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        while !self.open.is_empty() {
            self.end();
        }
        self.buf
    }
}

/// A box located in a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxRef<'a> {
    pub kind: [u8; 4],
    /// Payload after the header
    pub body: &'a [u8],
}

impl<'a> BoxRef<'a> {
    pub fn kind_str(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }

    /// Child boxes, skipping `skip` bytes of the payload first (8 for the
    /// fields preceding `stsd` entries, for example).
    pub fn children_after(&self, skip: usize) -> Result<Vec<BoxRef<'a>>> {
        parse_boxes(self.body.get(skip..).unwrap_or(&[]))
    }

    pub fn children(&self) -> Result<Vec<BoxRef<'a>>> {
        self.children_after(0)
    }

    /// First child of the given kind.
    pub fn child(&self, kind: &[u8; 4]) -> Result<Option<BoxRef<'a>>> {
        Ok(self.children()?.into_iter().find(|b| &b.kind == kind))
    }

    /// Descend through container boxes along `path`.
    pub fn find(&self, path: &[&[u8; 4]]) -> Result<Option<BoxRef<'a>>> {
        let mut current = *self;
        for kind in path {
            match current.child(kind)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Big-endian u32 at `offset` within the payload.
    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let b = self.body.get(offset..offset + 4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Split `data` into its top-level boxes. Handles 64-bit sizes and
/// size-zero "to end of file" boxes.
pub fn parse_boxes(data: &[u8]) -> Result<Vec<BoxRef<'_>>> {
    let mut boxes = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < 8 {
            return Err(ReelError::Media(format!(
                "truncated box header at offset {}",
                offset
            )));
        }
        let size32 = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as u64;
        let kind = [rest[4], rest[5], rest[6], rest[7]];
        let (header, size) = match size32 {
            0 => (8usize, rest.len() as u64),
            1 => {
                if rest.len() < 16 {
                    return Err(ReelError::Media("truncated largesize".into()));
                }
                let mut b = [0u8; 8];
                b.copy_from_slice(&rest[8..16]);
                (16usize, u64::from_be_bytes(b))
            }
            n => (8usize, n),
        };
        if size < header as u64 || size > rest.len() as u64 {
            return Err(ReelError::Media(format!(
                "box '{}' at offset {} has invalid size {}",
                String::from_utf8_lossy(&kind),
                offset,
                size
            )));
        }
        let size = size as usize;
        boxes.push(BoxRef {
            kind,
            body: &rest[header..size],
        });
        offset += size;
    }
    Ok(boxes)
}
