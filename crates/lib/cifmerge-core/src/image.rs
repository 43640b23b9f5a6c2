use std::fmt::{Debug, Formatter};

use crate::error::DataError;

pub const IMAGE_HEIGHT: usize = 32;
pub const IMAGE_WIDTH: usize = 32;
pub const CHANNELS: usize = 3;
pub const PLANE_SIZE: usize = IMAGE_HEIGHT * IMAGE_WIDTH;
pub const RECORD_SIZE: usize = PLANE_SIZE * CHANNELS;

/// A 32x32 RGB image stored channel-last, i.e. `[row][col][channel]`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ImagePixels {
    pixels: Vec<u8>,
}

impl ImagePixels {
    pub fn zeroed() -> Self {
        Self {
            pixels: vec![0; RECORD_SIZE],
        }
    }

    /// Wraps bytes that are already in channel-last order.
    pub fn from_channel_last(pixels: Vec<u8>) -> Result<Self, DataError> {
        if pixels.len() != RECORD_SIZE {
            return Err(DataError::RecordLength {
                found: pixels.len(),
            });
        }
        Ok(Self { pixels })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, row: usize, col: usize, channel: usize) -> u8 {
        self.pixels[Self::offset(row, col, channel)]
    }

    pub fn set_pixel(&mut self, row: usize, col: usize, channel: usize, value: u8) {
        self.pixels[Self::offset(row, col, channel)] = value;
    }

    /// Returns the planar layout the archives use: all red, then green, then blue.
    pub fn to_planar(&self) -> Vec<u8> {
        let mut planar = vec![0; RECORD_SIZE];
        for (idx, rgb) in self.pixels.chunks_exact(CHANNELS).enumerate() {
            for (channel, value) in rgb.iter().enumerate() {
                planar[channel * PLANE_SIZE + idx] = *value;
            }
        }
        planar
    }

    fn offset(row: usize, col: usize, channel: usize) -> usize {
        (row * IMAGE_WIDTH + col) * CHANNELS + channel
    }
}

impl Debug for ImagePixels {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ImagePixels({}x{}x{})",
            IMAGE_HEIGHT, IMAGE_WIDTH, CHANNELS
        )
    }
}

/// Decodes one planar record into a channel-last image.
///
/// Bytes `[0, 1024)` hold the red plane, `[1024, 2048)` the green plane and
/// `[2048, 3072)` the blue plane, each 32x32 in row-major order.
pub fn decode_record(record: &[u8]) -> Result<ImagePixels, DataError> {
    if record.len() != RECORD_SIZE {
        return Err(DataError::RecordLength {
            found: record.len(),
        });
    }
    let (red, rest) = record.split_at(PLANE_SIZE);
    let (green, blue) = rest.split_at(PLANE_SIZE);

    let mut pixels = Vec::with_capacity(RECORD_SIZE);
    for ((r, g), b) in red.iter().zip(green).zip(blue) {
        pixels.extend_from_slice(&[*r, *g, *b]);
    }
    Ok(ImagePixels { pixels })
}

/// Decodes a flat buffer of `N` consecutive records.
///
/// This is the `(N, 3, 32, 32) -> (N, 32, 32, 3)` rearrangement done one
/// record at a time through [decode_record].
pub fn decode_records(buffer: &[u8]) -> Result<Vec<ImagePixels>, DataError> {
    if buffer.len() % RECORD_SIZE != 0 {
        return Err(DataError::BufferLength {
            found: buffer.len(),
        });
    }
    buffer.chunks_exact(RECORD_SIZE).map(decode_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planar_record(seed: u8) -> Vec<u8> {
        (0..RECORD_SIZE)
            .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed))
            .collect()
    }

    #[test]
    fn planes_land_in_their_channels() {
        let record = planar_record(3);
        let image = decode_record(&record).expect("valid record");
        for row in 0..IMAGE_HEIGHT {
            for col in 0..IMAGE_WIDTH {
                let idx = row * IMAGE_WIDTH + col;
                assert_eq!(image.pixel(row, col, 0), record[idx]);
                assert_eq!(image.pixel(row, col, 1), record[PLANE_SIZE + idx]);
                assert_eq!(image.pixel(row, col, 2), record[2 * PLANE_SIZE + idx]);
            }
        }
    }

    #[test]
    fn planar_conversion_is_inverse_of_decode() {
        let record = planar_record(11);
        let image = decode_record(&record).expect("valid record");
        assert_eq!(image.to_planar(), record);
    }

    #[test]
    fn short_record_is_rejected() {
        let error = decode_record(&[0; 3071]).unwrap_err();
        assert_eq!(error, DataError::RecordLength { found: 3071 });
    }

    #[test]
    fn ragged_buffer_is_rejected() {
        let error = decode_records(&vec![0; RECORD_SIZE + 5]).unwrap_err();
        assert_eq!(
            error,
            DataError::BufferLength {
                found: RECORD_SIZE + 5
            }
        );
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        assert!(decode_records(&[]).expect("empty is fine").is_empty());
    }

    #[test]
    fn channel_last_wrapper_checks_length() {
        assert!(ImagePixels::from_channel_last(vec![0; RECORD_SIZE]).is_ok());
        assert!(ImagePixels::from_channel_last(vec![0; 12]).is_err());
    }
}
