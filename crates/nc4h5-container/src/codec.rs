//! Built-in codecs applied to stored dataset blocks: shuffle, deflate and
//! fletcher32.
//!
//! Encoding runs the pipeline forward, decoding runs it in reverse. Filters
//! without a built-in codec are recorded in the pipeline but pass data
//! through unchanged, so a file stays readable whichever plugins were
//! present when it was written.

use tracing::trace;

use crate::error::{ContainerError, Result};
use crate::filter_pipeline::{FilterPipeline, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE};

/// Encode a block of raw element bytes through `pipeline`.
pub fn encode_block(data: &[u8], pipeline: &FilterPipeline, element_size: usize) -> Result<Vec<u8>> {
    let mut block = data.to_vec();
    for filter in &pipeline.filters {
        block = match filter.filter_id {
            FILTER_SHUFFLE => shuffle(&block, element_size)?,
            FILTER_DEFLATE => {
                let level = filter.client_data.first().copied().unwrap_or(6).min(9);
                deflate_compress(&block, level)?
            }
            FILTER_FLETCHER32 => fletcher32_append(&block),
            other => {
                trace!(filter_id = other, "no built-in codec, passing block through");
                block
            }
        };
    }
    Ok(block)
}

/// Decode a stored block back into raw element bytes.
pub fn decode_block(data: &[u8], pipeline: &FilterPipeline, element_size: usize) -> Result<Vec<u8>> {
    let mut block = data.to_vec();
    for filter in pipeline.filters.iter().rev() {
        block = match filter.filter_id {
            FILTER_SHUFFLE => unshuffle(&block, element_size)?,
            FILTER_DEFLATE => deflate_decompress(&block)?,
            FILTER_FLETCHER32 => fletcher32_verify(&block)?,
            _ => block,
        };
    }
    Ok(block)
}

// ---------------------------------------------------------------------------
// Deflate
// ---------------------------------------------------------------------------

#[cfg(feature = "deflate")]
fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    use std::io::Write;
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| ContainerError::Codec(format!("deflate: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ContainerError::Codec(format!("deflate: {e}")))
}

#[cfg(feature = "deflate")]
fn deflate_decompress(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ContainerError::Codec(format!("inflate: {e}")))?;
    Ok(out)
}

#[cfg(not(feature = "deflate"))]
fn deflate_compress(_data: &[u8], _level: u32) -> Result<Vec<u8>> {
    Err(ContainerError::Codec("deflate support not compiled in".into()))
}

#[cfg(not(feature = "deflate"))]
fn deflate_decompress(_data: &[u8]) -> Result<Vec<u8>> {
    Err(ContainerError::Codec("deflate support not compiled in".into()))
}

// ---------------------------------------------------------------------------
// Shuffle
// ---------------------------------------------------------------------------

/// Group byte `j` of every element together, for each `j`.
fn shuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    if data.len() % element_size != 0 {
        return Err(ContainerError::Codec(
            "shuffle: block length not a multiple of element size".into(),
        ));
    }
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, elem) in data.chunks_exact(element_size).enumerate() {
        for (j, &b) in elem.iter().enumerate() {
            out[j * n + i] = b;
        }
    }
    Ok(out)
}

fn unshuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    if data.len() % element_size != 0 {
        return Err(ContainerError::Codec(
            "unshuffle: block length not a multiple of element size".into(),
        ));
    }
    let n = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for (i, elem) in out.chunks_exact_mut(element_size).enumerate() {
        for (j, b) in elem.iter_mut().enumerate() {
            *b = data[j * n + i];
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Fletcher32
// ---------------------------------------------------------------------------

/// Fletcher32 over big-endian 16-bit words, odd trailing byte zero-padded.
fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u64 = 0;
    let mut sum2: u64 = 0;
    for pair in data.chunks(2) {
        let word = match pair {
            [hi, lo] => (u64::from(*hi) << 8) | u64::from(*lo),
            [hi] => u64::from(*hi) << 8,
            _ => 0,
        };
        sum1 = (sum1 + word) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }
    ((sum2 as u32) << 16) | sum1 as u32
}

fn fletcher32_append(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.extend_from_slice(&fletcher32(data).to_le_bytes());
    out
}

fn fletcher32_verify(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(ContainerError::Codec("fletcher32: block shorter than checksum".into()));
    }
    let (payload, tail) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let computed = fletcher32(payload);
    if stored != computed {
        return Err(ContainerError::Codec(format!(
            "fletcher32 mismatch: stored {stored:#010x}, computed {computed:#010x}"
        )));
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_pipeline::FilterDescription;

    fn pipeline(ids: &[(u32, &[u32])]) -> FilterPipeline {
        FilterPipeline {
            filters: ids.iter().map(|(id, cd)| FilterDescription::new(*id, cd)).collect(),
        }
    }

    #[test]
    fn shuffle_groups_bytes() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(shuffle(&data, 4).unwrap(), vec![1, 5, 2, 6, 3, 7, 4, 8]);
        assert_eq!(unshuffle(&[1, 5, 2, 6, 3, 7, 4, 8], 4).unwrap(), data.to_vec());
    }

    #[test]
    fn shuffle_rejects_ragged_block() {
        assert!(shuffle(&[1, 2, 3], 2).is_err());
    }

    #[test]
    fn fletcher32_detects_corruption() {
        let mut block = fletcher32_append(b"netcdf");
        assert_eq!(fletcher32_verify(&block).unwrap(), b"netcdf".to_vec());
        block[0] ^= 0xff;
        assert!(fletcher32_verify(&block).is_err());
    }

    #[test]
    #[cfg(feature = "deflate")]
    fn full_pipeline_restores_data() {
        let data: Vec<u8> = (0..4096u32).flat_map(|v| (v as f32).to_le_bytes()).collect();
        let p = pipeline(&[(FILTER_SHUFFLE, &[]), (FILTER_DEFLATE, &[5]), (FILTER_FLETCHER32, &[])]);
        let stored = encode_block(&data, &p, 4).unwrap();
        assert!(stored.len() < data.len());
        assert_eq!(decode_block(&stored, &p, 4).unwrap(), data);
    }

    #[test]
    fn unknown_filter_passes_through() {
        let p = pipeline(&[(32015, &[3])]);
        let data = vec![9u8; 32];
        assert_eq!(encode_block(&data, &p, 1).unwrap(), data);
        assert_eq!(decode_block(&data, &p, 1).unwrap(), data);
    }
}
