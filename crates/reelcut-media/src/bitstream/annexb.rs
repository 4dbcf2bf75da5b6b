//! H.264 Annex-B byte streams.
//!
//! Encoders emit NAL units separated by `00 00 01` / `00 00 00 01` start
//! codes. MP4 stores the same units length-prefixed (AVCC) with the parameter
//! sets moved into the `avcC` box.

/// NAL unit types used by the muxing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    Other(u8),
}

impl NalType {
    pub fn of(nal: &[u8]) -> Option<Self> {
        let header = *nal.first()?;
        Some(match header & 0x1f {
            1 => NalType::Slice,
            5 => NalType::Idr,
            6 => NalType::Sei,
            7 => NalType::Sps,
            8 => NalType::Pps,
            9 => NalType::AccessUnitDelimiter,
            other => NalType::Other(other),
        })
    }
}

/// Find the next start code at or after `from`. Returns (position, length).
fn next_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 3 < data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex-B buffer into NAL units (without start codes).
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let Some((mut pos, mut len)) = next_start_code(data, 0) else {
        return units;
    };
    loop {
        let start = pos + len;
        match next_start_code(data, start) {
            Some((next, next_len)) => {
                if next > start {
                    units.push(&data[start..next]);
                }
                pos = next;
                len = next_len;
            }
            None => {
                let mut end = data.len();
                while end > start && data[end - 1] == 0 {
                    end -= 1;
                }
                if end > start {
                    units.push(&data[start..end]);
                }
                return units;
            }
        }
    }
}

/// Whether the access unit contains an IDR slice.
pub fn contains_idr(data: &[u8]) -> bool {
    split_nal_units(data)
        .iter()
        .any(|n| NalType::of(n) == Some(NalType::Idr))
}

/// The first SPS and PPS found in `data`.
pub fn parameter_sets(data: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut sps = None;
    let mut pps = None;
    for nal in split_nal_units(data) {
        match NalType::of(nal) {
            Some(NalType::Sps) if sps.is_none() => sps = Some(nal.to_vec()),
            Some(NalType::Pps) if pps.is_none() => pps = Some(nal.to_vec()),
            _ => {}
        }
    }
    Some((sps?, pps?))
}

/// Annex-B SPS + PPS, each with a 4-byte start code.
pub fn encode_parameter_sets(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sps.len() + pps.len() + 8);
    out.extend_from_slice(&[0, 0, 0, 1]);
    out.extend_from_slice(sps);
    out.extend_from_slice(&[0, 0, 0, 1]);
    out.extend_from_slice(pps);
    out
}

/// Convert an Annex-B access unit to 4-byte length-prefixed NAL units,
/// dropping delimiters and parameter sets. Input that carries no start code
/// is assumed to already be length-prefixed and is returned unchanged.
pub fn to_avcc(data: &[u8]) -> Vec<u8> {
    if next_start_code(data, 0).is_none() {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    for nal in split_nal_units(data) {
        match NalType::of(nal) {
            Some(NalType::AccessUnitDelimiter | NalType::Sps | NalType::Pps) => continue,
            _ => {
                out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
                out.extend_from_slice(nal);
            }
        }
    }
    out
}

/// Reassembles access units from an AUD-delimited Annex-B stream that
/// arrives in arbitrary chunks.
#[derive(Debug, Default)]
pub struct AccessUnitSplitter {
    buffer: Vec<u8>,
    /// Position of the current AU's delimiter start code, once seen
    au_start: Option<usize>,
    scan_from: usize,
}

impl AccessUnitSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, returning every access unit completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        let mut units = Vec::new();
        let mut waiting = false;

        while let Some((pos, len)) = next_start_code(&self.buffer, self.scan_from) {
            // The NAL header byte has not arrived yet.
            if pos + len >= self.buffer.len() {
                self.scan_from = pos;
                waiting = true;
                break;
            }
            let is_aud = NalType::of(&self.buffer[pos + len..])
                == Some(NalType::AccessUnitDelimiter);
            if is_aud {
                match self.au_start {
                    Some(start) if pos > start => {
                        units.push(self.buffer[start..pos].to_vec());
                        self.buffer.drain(..pos);
                        self.au_start = Some(0);
                        self.scan_from = len + 1;
                        continue;
                    }
                    None => {
                        // Bytes before the first delimiter belong to no AU.
                        self.buffer.drain(..pos);
                        self.au_start = Some(0);
                        self.scan_from = len + 1;
                        continue;
                    }
                    _ => {}
                }
            }
            self.scan_from = pos + len + 1;
        }
        if !waiting {
            // Only the last three bytes can still begin a start code.
            self.scan_from = self.scan_from.max(self.buffer.len().saturating_sub(3));
        }
        units
    }

    /// Return the trailing access unit at end of stream.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let start = self.au_start.take().unwrap_or(0);
        self.scan_from = 0;
        let rest: Vec<u8> = self.buffer.drain(..).skip(start).collect();
        if split_nal_units(&rest).is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}
