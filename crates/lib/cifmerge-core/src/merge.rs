use std::collections::BTreeMap;

use hashbrown::HashSet;

use crate::error::DataError;
use crate::image::ImagePixels;

/// Parallel image and label sequences of one split.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedDataset {
    images: Vec<ImagePixels>,
    labels: Vec<u8>,
}

impl MergedDataset {
    pub fn new(images: Vec<ImagePixels>, labels: Vec<u8>) -> Result<Self, DataError> {
        if images.len() != labels.len() {
            return Err(DataError::CountMismatch {
                context: "merged dataset".to_string(),
                images: images.len(),
                labels: labels.len(),
            });
        }
        Ok(Self { images, labels })
    }

    /// Builds a split from archive labels, each of which must name one of the
    /// `classes` entries of the archive taxonomy.
    pub fn from_archive(
        images: Vec<ImagePixels>,
        labels: &[i64],
        classes: usize,
    ) -> Result<Self, DataError> {
        let labels = labels
            .iter()
            .map(|&label| {
                if usize::try_from(label).map_or(true, |idx| idx >= classes) {
                    return Err(DataError::UnknownBaseLabel { label, classes });
                }
                u8::try_from(label).map_err(|_| DataError::LabelOutOfRange { label })
            })
            .collect::<Result<Vec<u8>, DataError>>()?;
        Self::new(images, labels)
    }

    /// Appends `other` after the samples of `self`.
    pub fn concat(mut self, other: MergedDataset) -> Self {
        self.images.extend(other.images);
        self.labels.extend(other.labels);
        self
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn images(&self) -> &[ImagePixels] {
        &self.images
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn get(&self, index: usize) -> Option<(&ImagePixels, u8)> {
        let image = self.images.get(index)?;
        Some((image, self.labels[index]))
    }

    /// Number of samples per label, ordered by label.
    pub fn label_counts(&self) -> BTreeMap<u8, usize> {
        let mut counts = BTreeMap::new();
        for label in self.labels.iter() {
            *counts.entry(*label).or_insert(0) += 1;
        }
        counts
    }
}

/// Keeps the images whose fine label is selected, in archive order,
/// and gives all of them the `synthetic` label.
pub fn relabel_subset(
    images: &[ImagePixels],
    fine_labels: &[i64],
    selected: &HashSet<usize>,
    synthetic: u8,
) -> Result<MergedDataset, DataError> {
    if images.len() != fine_labels.len() {
        return Err(DataError::CountMismatch {
            context: "fine-grained split".to_string(),
            images: images.len(),
            labels: fine_labels.len(),
        });
    }
    let picked: Vec<ImagePixels> = images
        .iter()
        .zip(fine_labels)
        .filter(|(_, fine)| usize::try_from(**fine).is_ok_and(|fine| selected.contains(&fine)))
        .map(|(image, _)| image.clone())
        .collect();
    let labels = vec![synthetic; picked.len()];
    MergedDataset::new(picked, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::RECORD_SIZE;

    fn image(fill: u8) -> ImagePixels {
        ImagePixels::from_channel_last(vec![fill; RECORD_SIZE]).expect("valid size")
    }

    #[test]
    fn subset_keeps_order_and_relabels() {
        let images: Vec<ImagePixels> = (0..6).map(image).collect();
        let fine = [4, 7, 4, 1, 9, 7];
        let subset =
            relabel_subset(&images, &fine, &HashSet::from([7, 9]), 10).expect("aligned input");
        assert_eq!(subset.labels(), &[10, 10, 10]);
        assert_eq!(subset.images(), &[image(1), image(4), image(5)]);
    }

    #[test]
    fn negative_fine_labels_never_match() {
        let images = vec![image(0), image(1)];
        let subset =
            relabel_subset(&images, &[-1, 0], &HashSet::from([0]), 10).expect("aligned input");
        assert_eq!(subset.images(), &[image(1)]);
    }

    #[test]
    fn misaligned_subset_input_is_rejected() {
        let error = relabel_subset(&[image(0)], &[1, 2], &HashSet::new(), 10).unwrap_err();
        assert!(matches!(error, DataError::CountMismatch { .. }));
    }

    #[test]
    fn archive_labels_outside_u8_are_rejected() {
        let error = MergedDataset::from_archive(vec![image(0)], &[300], 400).unwrap_err();
        assert_eq!(error, DataError::LabelOutOfRange { label: 300 });
    }

    #[test]
    fn archive_labels_outside_taxonomy_are_rejected() {
        let error = MergedDataset::from_archive(vec![image(0), image(1)], &[9, 10], 10).unwrap_err();
        assert_eq!(error, DataError::UnknownBaseLabel { label: 10, classes: 10 });
        let error = MergedDataset::from_archive(vec![image(0)], &[-1], 10).unwrap_err();
        assert_eq!(error, DataError::UnknownBaseLabel { label: -1, classes: 10 });
    }

    #[test]
    fn concat_appends_after_base() {
        let base = MergedDataset::new(vec![image(0), image(1)], vec![3, 5]).expect("aligned");
        let extra = MergedDataset::new(vec![image(2)], vec![10]).expect("aligned");
        let merged = base.concat(extra);
        assert_eq!(merged.labels(), &[3, 5, 10]);
        assert_eq!(merged.get(2), Some((&image(2), 10)));
        assert_eq!(merged.get(3), None);
        assert_eq!(merged.label_counts().get(&10), Some(&1));
    }
}
