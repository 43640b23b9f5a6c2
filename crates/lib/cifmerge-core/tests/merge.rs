use cifmerge_core::image::{ImagePixels, RECORD_SIZE};
use cifmerge_core::labels::{LabelTaxonomy, SelectionPlan, SuperclassSettings};
use cifmerge_core::merge::MergedDataset;

const FLOWERS: [&str; 5] = ["orchid", "poppy", "rose", "sunflower", "tulip"];
const TREES: [&str; 5] = ["maple_tree", "oak_tree", "palm_tree", "pine_tree", "willow_tree"];

fn fine_taxonomy() -> LabelTaxonomy {
    let names = [
        "apple", "maple_tree", "orchid", "bus", "oak_tree", "poppy", "rose", "palm_tree",
        "sunflower", "pine_tree", "tulip", "willow_tree", "whale",
    ];
    LabelTaxonomy::new(names.iter().map(|n| n.to_string()).collect())
}

fn superclasses() -> Vec<SuperclassSettings> {
    vec![
        SuperclassSettings {
            name: "flowers".to_string(),
            labels: FLOWERS.iter().map(|n| n.to_string()).collect(),
            synthetic_label: 10,
        },
        SuperclassSettings {
            name: "trees".to_string(),
            labels: TREES.iter().map(|n| n.to_string()).collect(),
            synthetic_label: 10,
        },
    ]
}

fn image(fill: u8) -> ImagePixels {
    ImagePixels::from_channel_last(vec![fill; RECORD_SIZE]).expect("valid size")
}

fn base_split(samples: usize) -> MergedDataset {
    let images = (0..samples).map(|i| image(i as u8)).collect();
    let labels: Vec<i64> = (0..samples).map(|i| (i % 10) as i64).collect();
    MergedDataset::from_archive(images, &labels, 10).expect("base labels fit")
}

fn fine_split() -> (Vec<ImagePixels>, Vec<i64>) {
    let fine_labels: Vec<i64> = (0..130).map(|i| i % 13).collect();
    let images = fine_labels.iter().map(|&l| image(100 + l as u8)).collect();
    (images, fine_labels)
}

#[test]
fn test_merge_appends_selected_fine_images() {
    let base = base_split(50);
    let (images, fine_labels) = fine_split();
    let plan = SelectionPlan::new(&superclasses(), &fine_taxonomy(), 10).expect("valid plan");

    let extra = plan.apply(&images, &fine_labels).expect("aligned split");
    // Ten of the thirteen fine classes are flowers or trees, ten images each.
    assert_eq!(extra.len(), 100);

    let merged = base.clone().concat(extra);
    assert_eq!(merged.len(), 150);
    assert_eq!(merged.images().len(), merged.labels().len());
    assert_eq!(&merged.images()[..50], base.images());
    assert_eq!(&merged.labels()[..50], base.labels());
    assert!(merged.labels()[50..].iter().all(|&l| l == 10));
    assert!(merged.labels().iter().all(|&l| l <= 10));
}

#[test]
fn test_flower_block_precedes_tree_block() {
    let (images, fine_labels) = fine_split();
    let taxonomy = fine_taxonomy();
    let plan = SelectionPlan::new(&superclasses(), &taxonomy, 10).expect("valid plan");
    let extra = plan.apply(&images, &fine_labels).expect("aligned split");

    let fine_of = |img: &ImagePixels| (img.pixel(0, 0, 0) - 100) as usize;
    let names: Vec<&str> = extra
        .images()
        .iter()
        .map(|img| taxonomy.name(fine_of(img)).expect("known class"))
        .collect();
    assert!(names[..50].iter().all(|n| FLOWERS.contains(n)));
    assert!(names[50..].iter().all(|n| TREES.contains(n)));
}

#[test]
fn test_unmatched_superclasses_add_nothing() {
    let base = base_split(20);
    let (images, fine_labels) = fine_split();
    let taxonomy = LabelTaxonomy::new(vec!["bus".to_string(), "whale".to_string()]);
    let plan = SelectionPlan::new(&superclasses(), &taxonomy, 10).expect("valid plan");
    assert!(plan.union().is_empty());

    let extra = plan.apply(&images, &fine_labels).expect("aligned split");
    assert!(extra.is_empty());
    let merged = base.clone().concat(extra);
    assert_eq!(merged, base);
}

#[test]
fn test_empty_plan_keeps_lengths_aligned() {
    let (images, fine_labels) = fine_split();
    let plan = SelectionPlan::new(&[], &fine_taxonomy(), 10).expect("empty plan");
    let extra = plan.apply(&images, &fine_labels).expect("aligned split");
    assert_eq!(extra.images().len(), extra.labels().len());
    assert!(extra.is_empty());
}
