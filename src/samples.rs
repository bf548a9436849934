/// One decoded accelerometer sample in physical units (g).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub magnitude: f64,
}

/// Decode a flat buffer of fixed-width sensor records.
///
/// `range` is the sensor full-scale range (2 or 4 g), `width` the bits per
/// axis (16, 24 or 32). Records are little-endian; the optional leading
/// 2-byte timestamp is a free-running logger counter. 24-bit records always
/// carry the timestamp and their axis values are sign-extended from bit 23.
/// When no timestamp field is present, a zero-based record index is
/// synthesized instead.
///
/// A buffer whose length is not a whole number of records decodes to an
/// empty vector; that is a local, non-fatal failure for the caller to log.
pub fn decode_samples(data: &[u8], range: u8, width: u8, timestamp_field: bool) -> Vec<Sample> {
    let axis_bytes = match width {
        16 => 2,
        24 => 3,
        32 => 4,
        _ => return Vec::new(),
    };
    let ts_bytes = if width == 24 || timestamp_field { 2 } else { 0 };
    let record_len = ts_bytes + 3 * axis_bytes;

    if data.is_empty() || data.len() % record_len != 0 {
        return Vec::new();
    }

    let scale = f64::from(range) / (1u64 << (width - 1)) as f64;
    let mut samples = Vec::with_capacity(data.len() / record_len);

    for (index, record) in data.chunks_exact(record_len).enumerate() {
        let timestamp = if ts_bytes == 2 {
            u32::from(u16::from_le_bytes([record[0], record[1]]))
        } else {
            index as u32
        };

        let mut axes = [0f64; 3];
        for (axis, slot) in axes.iter_mut().enumerate() {
            let at = ts_bytes + axis * axis_bytes;
            let raw = match width {
                16 => i64::from(i16::from_le_bytes([record[at], record[at + 1]])),
                24 => i64::from(sign_extend_24(record[at], record[at + 1], record[at + 2])),
                _ => i64::from(i32::from_le_bytes([
                    record[at],
                    record[at + 1],
                    record[at + 2],
                    record[at + 3],
                ])),
            };
            *slot = raw as f64 * scale;
        }

        let [x, y, z] = axes;
        samples.push(Sample {
            timestamp,
            x,
            y,
            z,
            magnitude: (x * x + y * y + z * z).sqrt(),
        });
    }

    samples
}

/// Widen a 3-byte little-endian value by replicating bit 7 of its most
/// significant byte into a synthesized fourth byte.
fn sign_extend_24(b0: u8, b1: u8, b2: u8) -> i32 {
    let ext = if b2 & 0x80 != 0 { 0xFF } else { 0x00 };
    i32::from_le_bytes([b0, b1, b2, ext])
}
