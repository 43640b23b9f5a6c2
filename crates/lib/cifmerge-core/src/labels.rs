use hashbrown::HashSet;
use log::{debug, warn};
use serde::Deserialize;

use crate::error::DataError;
use crate::image::ImagePixels;
use crate::merge::{relabel_subset, MergedDataset};

/// Ordered class names of an archive. The position of a name is its label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTaxonomy {
    names: Vec<String>,
}

impl LabelTaxonomy {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, label: usize) -> Option<&str> {
        self.names.get(label).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|known| known == name)
    }
}

/// Indices of the taxonomy entries whose name is one of `names`.
///
/// Names that are not part of the taxonomy are ignored.
pub fn select_indices<S: AsRef<str>>(taxonomy: &LabelTaxonomy, names: &[S]) -> HashSet<usize> {
    let wanted: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
    taxonomy
        .names()
        .iter()
        .enumerate()
        .filter(|(_, name)| wanted.contains(name.as_str()))
        .map(|(idx, _)| idx)
        .collect()
}

#[derive(Deserialize, Debug, Clone)]
pub struct SuperclassSettings {
    pub name: String,
    pub labels: Vec<String>,
    pub synthetic_label: u8,
}

/// A named group of fine classes resolved against a taxonomy.
#[derive(Clone, Debug)]
pub struct SuperclassSelection {
    name: String,
    synthetic_label: u8,
    indices: HashSet<usize>,
}

impl SuperclassSelection {
    pub fn resolve(settings: &SuperclassSettings, taxonomy: &LabelTaxonomy) -> Self {
        let indices = select_indices(taxonomy, &settings.labels);
        settings
            .labels
            .iter()
            .filter(|name| taxonomy.index_of(name).is_none())
            .for_each(|name| debug!("'{}' is not part of the taxonomy, skipping", name));
        if indices.is_empty() {
            warn!(
                "Superclass '{}' matched no class names, it will contribute no samples",
                settings.name
            );
        }
        Self {
            name: settings.name.clone(),
            synthetic_label: settings.synthetic_label,
            indices,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn synthetic_label(&self) -> u8 {
        self.synthetic_label
    }

    pub fn indices(&self) -> &HashSet<usize> {
        &self.indices
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// The superclass selections to carve out of a fine-grained archive.
///
/// Every selection is resolved on its own. A fine class claimed by an earlier
/// selection is removed from the later ones, so the union of all selections
/// decides which images are taken and each image is taken once.
#[derive(Clone, Debug)]
pub struct SelectionPlan {
    selections: Vec<SuperclassSelection>,
}

impl SelectionPlan {
    pub fn new(
        settings: &[SuperclassSettings],
        taxonomy: &LabelTaxonomy,
        base_classes: usize,
    ) -> Result<Self, DataError> {
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut selections = Vec::with_capacity(settings.len());
        for superclass in settings {
            if (superclass.synthetic_label as usize) < base_classes {
                return Err(DataError::LabelCollision {
                    superclass: superclass.name.clone(),
                    label: superclass.synthetic_label,
                    base_classes,
                });
            }
            let mut selection = SuperclassSelection::resolve(superclass, taxonomy);
            let overlap: Vec<usize> = selection.indices.intersection(&claimed).copied().collect();
            if !overlap.is_empty() {
                warn!(
                    "Superclass '{}' shares {} classes with earlier superclasses, keeping the earlier claim",
                    selection.name,
                    overlap.len()
                );
                overlap.iter().for_each(|idx| {
                    selection.indices.remove(idx);
                });
            }
            claimed.extend(selection.indices.iter().copied());
            selections.push(selection);
        }
        Ok(Self { selections })
    }

    pub fn selections(&self) -> &[SuperclassSelection] {
        &self.selections
    }

    /// All fine classes taken by any selection.
    pub fn union(&self) -> HashSet<usize> {
        self.selections
            .iter()
            .flat_map(|selection| selection.indices.iter().copied())
            .collect()
    }

    /// Distinct synthetic labels in order of first appearance.
    pub fn synthetic_labels(&self) -> Vec<u8> {
        let mut labels: Vec<u8> = Vec::new();
        for selection in self.selections.iter() {
            if !labels.contains(&selection.synthetic_label) {
                labels.push(selection.synthetic_label);
            }
        }
        labels
    }

    /// Carves the selected images out, one block per selection in plan order.
    pub fn apply(
        &self,
        images: &[ImagePixels],
        fine_labels: &[i64],
    ) -> Result<MergedDataset, DataError> {
        let mut subset = MergedDataset::default();
        for selection in self.selections.iter() {
            let block = relabel_subset(
                images,
                fine_labels,
                &selection.indices,
                selection.synthetic_label,
            )?;
            debug!(
                "Superclass '{}' contributed {} samples as label {}",
                selection.name,
                block.len(),
                selection.synthetic_label
            );
            subset = subset.concat(block);
        }
        Ok(subset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> LabelTaxonomy {
        LabelTaxonomy::new(
            ["apple", "orchid", "oak_tree", "rose", "bus", "pine_tree"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
        )
    }

    fn settings(name: &str, labels: &[&str], synthetic_label: u8) -> SuperclassSettings {
        SuperclassSettings {
            name: name.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            synthetic_label,
        }
    }

    #[test]
    fn indices_follow_taxonomy_positions() {
        let indices = select_indices(&taxonomy(), &["rose", "orchid"]);
        assert_eq!(indices, HashSet::from([1, 3]));
    }

    #[test]
    fn unknown_names_are_ignored() {
        let indices = select_indices(&taxonomy(), &["tulip", "oak_tree", "willow_tree"]);
        assert_eq!(indices, HashSet::from([2]));
    }

    #[test]
    fn no_known_names_gives_empty_selection() {
        let selection =
            SuperclassSelection::resolve(&settings("flowers", &["tulip", "poppy"], 10), &taxonomy());
        assert!(selection.is_empty());
    }

    #[test]
    fn plan_unions_independent_selections() {
        let plan = SelectionPlan::new(
            &[
                settings("flowers", &["orchid", "rose"], 10),
                settings("trees", &["oak_tree", "pine_tree"], 10),
            ],
            &taxonomy(),
            4,
        )
        .expect("valid plan");
        assert_eq!(plan.union(), HashSet::from([1, 2, 3, 5]));
        assert_eq!(plan.synthetic_labels(), vec![10]);
    }

    #[test]
    fn overlapping_class_is_claimed_once() {
        let plan = SelectionPlan::new(
            &[
                settings("flowers", &["orchid", "rose"], 10),
                settings("pink", &["rose", "apple"], 11),
            ],
            &taxonomy(),
            4,
        )
        .expect("valid plan");
        assert_eq!(plan.selections()[1].indices(), &HashSet::from([0]));
        assert_eq!(plan.synthetic_labels(), vec![10, 11]);
    }

    #[test]
    fn synthetic_label_must_not_reuse_base_label() {
        let error = SelectionPlan::new(&[settings("flowers", &["rose"], 3)], &taxonomy(), 10)
            .unwrap_err();
        assert!(matches!(error, DataError::LabelCollision { label: 3, .. }));
    }
}
