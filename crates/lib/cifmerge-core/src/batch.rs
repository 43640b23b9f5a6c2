use typed_builder::TypedBuilder;

use crate::error::DataError;
use crate::image::{decode_records, ImagePixels, RECORD_SIZE};

/// Contents of one archive file: flat planar records, labels and file names.
#[derive(Clone, Debug, Default, TypedBuilder)]
pub struct RawBatch {
    data: Vec<u8>,
    labels: Vec<i64>,
    #[builder(default)]
    filenames: Vec<String>,
    #[builder(default)]
    batch_label: Option<String>,
    #[builder(default)]
    coarse_labels: Option<Vec<i64>>,
}

impl RawBatch {
    /// Checks that records, labels and file names line up.
    pub fn validated(self) -> Result<Self, DataError> {
        if self.data.len() % RECORD_SIZE != 0 {
            return Err(DataError::BufferLength {
                found: self.data.len(),
            });
        }
        let records = self.data.len() / RECORD_SIZE;
        let context = self
            .batch_label
            .clone()
            .unwrap_or_else(|| "archive batch".to_string());
        if records != self.labels.len() {
            return Err(DataError::CountMismatch {
                context,
                images: records,
                labels: self.labels.len(),
            });
        }
        if !self.filenames.is_empty() && self.filenames.len() != records {
            return Err(DataError::CountMismatch {
                context: format!("{} filenames", context),
                images: records,
                labels: self.filenames.len(),
            });
        }
        if let Some(coarse) = &self.coarse_labels {
            if coarse.len() != records {
                return Err(DataError::CountMismatch {
                    context: format!("{} coarse labels", context),
                    images: records,
                    labels: coarse.len(),
                });
            }
        }
        Ok(self)
    }

    /// Joins shards in the given order into one batch.
    pub fn concat(batches: Vec<RawBatch>) -> RawBatch {
        let mut joined = RawBatch::default();
        let mut coarse: Option<Vec<i64>> = Some(Vec::new());
        for batch in batches {
            joined.data.extend(batch.data);
            joined.labels.extend(batch.labels);
            joined.filenames.extend(batch.filenames);
            coarse = match (coarse, batch.coarse_labels) {
                (Some(mut all), Some(part)) => {
                    all.extend(part);
                    Some(all)
                }
                _ => None,
            };
        }
        joined.coarse_labels = coarse.filter(|all| !all.is_empty());
        joined
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn batch_label(&self) -> Option<&str> {
        self.batch_label.as_deref()
    }

    pub fn coarse_labels(&self) -> Option<&[i64]> {
        self.coarse_labels.as_deref()
    }

    pub fn record(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(RECORD_SIZE)?;
        self.data.get(start..start + RECORD_SIZE)
    }

    pub fn decode_images(&self) -> Result<Vec<ImagePixels>, DataError> {
        decode_records(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(records: usize, label: i64) -> RawBatch {
        RawBatch::builder()
            .data(vec![label as u8; records * RECORD_SIZE])
            .labels(vec![label; records])
            .filenames((0..records).map(|i| format!("img_{}.png", i)).collect())
            .build()
    }

    #[test]
    fn validation_accepts_consistent_batch() {
        assert!(batch(3, 1).validated().is_ok());
    }

    #[test]
    fn validation_rejects_label_count_mismatch() {
        let broken = RawBatch::builder()
            .data(vec![0; 2 * RECORD_SIZE])
            .labels(vec![0; 3])
            .build();
        assert!(matches!(
            broken.validated(),
            Err(DataError::CountMismatch {
                images: 2,
                labels: 3,
                ..
            })
        ));
    }

    #[test]
    fn concat_keeps_shard_order() {
        let joined = RawBatch::concat(vec![batch(2, 4), batch(1, 9)]);
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.labels(), &[4, 4, 9]);
        assert_eq!(joined.record(2).expect("third record")[0], 9);
        assert!(joined.record(3).is_none());
        assert!(joined.coarse_labels().is_none());
    }
}
