use thiserror::Error;

/// Magic tag identifying a compressed container payload.
pub const CONTAINER_MAGIC: &[u8; 4] = b"MLZO";

const HEADER_LEN: usize = 8;
const BLOCK_HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container truncated in block {block} at offset {offset}")]
    Truncated { block: usize, offset: usize },

    #[error("checksum mismatch in block {block} (stored {stored:#04x}, computed {computed:#04x})")]
    Checksum {
        block: usize,
        stored: u8,
        computed: u8,
    },

    #[error("failed to expand block {block}: {source}")]
    Codec {
        block: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// External block-compression capability. The container format only records
/// a per-block "compressed" flag; the algorithm itself is injected.
pub trait BlockCodec: Send + Sync {
    /// Expand one compressed block. `max_uncompressed` is an upper bound on
    /// the expanded size (the container's declared total size).
    fn decompress(&self, block: &[u8], max_uncompressed: usize) -> anyhow::Result<Vec<u8>>;
}

/// LZ4 block codec, the production implementation of [`BlockCodec`].
pub struct Lz4Codec;

impl BlockCodec for Lz4Codec {
    fn decompress(&self, block: &[u8], max_uncompressed: usize) -> anyhow::Result<Vec<u8>> {
        lz4_flex::block::decompress(block, max_uncompressed)
            .map_err(|err| anyhow::anyhow!("lz4 block decompression failed: {err}"))
    }
}

/// Expand a compressed container, or pass the buffer through unchanged when
/// the magic tag is absent.
///
/// Layout after the 4-byte magic: a 4-byte LE declared uncompressed size
/// (informational only), then repeated blocks of
/// `[flag u8][checksum u8][length u16 LE][payload][pad to 4-byte alignment]`
/// until the buffer is exhausted. Decoding is all-or-nothing: any checksum
/// mismatch or codec failure fails the whole decode with no partial output.
pub fn decode_container(data: &[u8], codec: &dyn BlockCodec) -> Result<Vec<u8>, ContainerError> {
    if data.len() < 4 || &data[..4] != CONTAINER_MAGIC {
        return Ok(data.to_vec());
    }
    if data.len() < HEADER_LEN {
        return Err(ContainerError::Truncated { block: 0, offset: 4 });
    }

    let declared = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    tracing::debug!(declared, "expanding compressed container");

    let mut out = Vec::with_capacity(declared.min(data.len().saturating_mul(8)));
    let mut offset = HEADER_LEN;
    let mut block = 0usize;

    while offset < data.len() {
        let Some(header) = data.get(offset..offset + BLOCK_HEADER_LEN) else {
            return Err(ContainerError::Truncated { block, offset });
        };
        let compressed = header[0] != 0;
        let stored = header[1];
        let length = u16::from_le_bytes([header[2], header[3]]) as usize;
        offset += BLOCK_HEADER_LEN;

        let Some(payload) = data.get(offset..offset + length) else {
            return Err(ContainerError::Truncated { block, offset });
        };

        let computed = payload
            .iter()
            .fold(0u32, |sum, byte| sum.wrapping_add(u32::from(*byte)))
            as u8;
        if computed != stored {
            return Err(ContainerError::Checksum {
                block,
                stored,
                computed,
            });
        }

        if compressed {
            let expanded = codec
                .decompress(payload, declared)
                .map_err(|source| ContainerError::Codec { block, source })?;
            out.extend_from_slice(&expanded);
        } else {
            out.extend_from_slice(payload);
        }

        // Payloads are padded out to the next 4-byte boundary.
        offset += length + (4 - length % 4) % 4;
        block += 1;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum(payload: &[u8]) -> u8 {
        payload
            .iter()
            .fold(0u32, |sum, b| sum.wrapping_add(u32::from(*b))) as u8
    }

    fn push_block(container: &mut Vec<u8>, flag: u8, sum: u8, payload: &[u8]) {
        container.push(flag);
        container.push(sum);
        container.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        container.extend_from_slice(payload);
        let pad = (4 - payload.len() % 4) % 4;
        container.extend_from_slice(&vec![0u8; pad]);
    }

    fn container_with(blocks: &[(u8, u8, &[u8])], declared: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(CONTAINER_MAGIC);
        out.extend_from_slice(&declared.to_le_bytes());
        for (flag, sum, payload) in blocks {
            push_block(&mut out, *flag, *sum, payload);
        }
        out
    }

    #[test]
    fn non_container_passes_through() {
        let raw = [1u8, 2, 3, 4, 5];
        let decoded = decode_container(&raw, &Lz4Codec).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn single_uncompressed_block_decodes_to_payload() {
        let payload = [10u8, 20, 30, 40, 50];
        let data = container_with(&[(0, checksum(&payload), &payload)], payload.len() as u32);
        let decoded = decode_container(&data, &Lz4Codec).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn blocks_concatenate_in_order() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5, 6, 7, 8];
        let data = container_with(
            &[(0, checksum(&a), &a), (0, checksum(&b), &b)],
            (a.len() + b.len()) as u32,
        );
        let decoded = decode_container(&data, &Lz4Codec).unwrap();
        assert_eq!(decoded, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn any_bad_checksum_fails_the_whole_decode() {
        let good = [1u8, 2, 3, 4];
        let bad = [9u8, 9, 9, 9];
        let data = container_with(
            &[
                (0, checksum(&good), &good),
                (0, checksum(&bad).wrapping_add(1), &bad),
            ],
            8,
        );
        let err = decode_container(&data, &Lz4Codec).unwrap_err();
        assert!(matches!(err, ContainerError::Checksum { block: 1, .. }));
    }

    #[test]
    fn checksum_wraps_modulo_256() {
        let payload = [0xFFu8, 0xFF, 0x02];
        assert_eq!(checksum(&payload), 0x00);
        let data = container_with(&[(0, 0x00, &payload)], 3);
        assert_eq!(decode_container(&data, &Lz4Codec).unwrap(), payload);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut data = container_with(&[(0, checksum(&payload), &payload)], 8);
        data.truncate(data.len() - 5);
        let err = decode_container(&data, &Lz4Codec).unwrap_err();
        assert!(matches!(err, ContainerError::Truncated { .. }));
    }

    #[test]
    fn compressed_block_round_trips_through_lz4() {
        let raw: Vec<u8> = (0..200u16).map(|v| (v % 7) as u8).collect();
        let compressed = lz4_flex::block::compress(&raw);
        let data = container_with(&[(1, checksum(&compressed), &compressed)], raw.len() as u32);
        let decoded = decode_container(&data, &Lz4Codec).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn garbage_compressed_block_fails_decode() {
        let junk = [0xAAu8; 16];
        let data = container_with(&[(1, checksum(&junk), &junk)], 4096);
        let err = decode_container(&data, &Lz4Codec).unwrap_err();
        assert!(matches!(err, ContainerError::Codec { block: 0, .. }));
    }
}
