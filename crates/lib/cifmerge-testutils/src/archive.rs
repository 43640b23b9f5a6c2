use std::fs;
use std::io;
use std::path::Path;

use cifmerge_core::image::{PLANE_SIZE, RECORD_SIZE};

use crate::pickler::{dumps, Pickled, Protocol};

pub const CIFAR10_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// A small fine-grained taxonomy holding every flower and tree class.
pub const FINE_NAMES: [&str; 14] = [
    "apple",
    "maple_tree",
    "orchid",
    "bus",
    "oak_tree",
    "poppy",
    "rose",
    "palm_tree",
    "sunflower",
    "pine_tree",
    "tulip",
    "willow_tree",
    "whale",
    "lamp",
];

pub const FLOWERS: [&str; 5] = ["orchid", "poppy", "rose", "sunflower", "tulip"];
pub const TREES: [&str; 5] = ["maple_tree", "oak_tree", "palm_tree", "pine_tree", "willow_tree"];

/// A planar record whose red plane is filled with the low byte of `tag`,
/// the green plane with the high byte and the blue plane with its offset.
pub fn fixture_record(tag: u16) -> Vec<u8> {
    let [low, high] = tag.to_le_bytes();
    let mut record = Vec::with_capacity(RECORD_SIZE);
    record.extend(std::iter::repeat(low).take(PLANE_SIZE));
    record.extend(std::iter::repeat(high).take(PLANE_SIZE));
    record.extend((0..PLANE_SIZE).map(|offset| (offset % 256) as u8));
    record
}

/// Reads back the tag written by [fixture_record] from channel-last pixels.
pub fn record_tag(red: u8, green: u8) -> u16 {
    u16::from_le_bytes([red, green])
}

fn records(first_tag: u16, count: usize) -> Vec<u8> {
    (0..count)
        .flat_map(|idx| fixture_record(first_tag + idx as u16))
        .collect()
}

fn text_list(names: &[&str]) -> Pickled {
    Pickled::List(names.iter().map(|name| Pickled::bytes(name)).collect())
}

fn filenames(first_tag: u16, count: usize) -> Pickled {
    Pickled::List(
        (0..count)
            .map(|idx| Pickled::Bytes(format!("img_{}.png", first_tag + idx as u16).into_bytes()))
            .collect(),
    )
}

/// A CIFAR-10 style data batch with records tagged from `first_tag`.
pub fn cifar10_batch(batch_label: &str, labels: &[i64], first_tag: u16) -> Pickled {
    Pickled::Dict(vec![
        (Pickled::bytes("batch_label"), Pickled::bytes(batch_label)),
        (Pickled::bytes("labels"), Pickled::int_list(labels)),
        (
            Pickled::bytes("data"),
            Pickled::u8_matrix(labels.len(), RECORD_SIZE, records(first_tag, labels.len())),
        ),
        (Pickled::bytes("filenames"), filenames(first_tag, labels.len())),
    ])
}

/// A CIFAR-100 style split. Coarse labels are the fine label divided by five.
pub fn cifar100_batch(batch_label: &str, fine_labels: &[i64], first_tag: u16) -> Pickled {
    let coarse: Vec<i64> = fine_labels.iter().map(|label| label / 5).collect();
    Pickled::Dict(vec![
        (Pickled::bytes("filenames"), filenames(first_tag, fine_labels.len())),
        (Pickled::bytes("batch_label"), Pickled::bytes(batch_label)),
        (Pickled::bytes("fine_labels"), Pickled::int_list(fine_labels)),
        (Pickled::bytes("coarse_labels"), Pickled::int_list(&coarse)),
        (
            Pickled::bytes("data"),
            Pickled::u8_matrix(
                fine_labels.len(),
                RECORD_SIZE,
                records(first_tag, fine_labels.len()),
            ),
        ),
    ])
}

pub fn write_pickle(path: &Path, value: &Pickled, protocol: Protocol) -> io::Result<()> {
    fs::write(path, dumps(value, protocol))
}

/// Writes `batches.meta`, one `data_batch_<n>` per shard and `test_batch`.
/// Train records are tagged 0.. across the shards, test records 0.. as well.
pub fn write_cifar10(dir: &Path, shards: &[Vec<i64>], test: &[i64]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let meta = Pickled::Dict(vec![
        (Pickled::bytes("num_cases_per_batch"), Pickled::Int(10000)),
        (Pickled::bytes("label_names"), text_list(&CIFAR10_NAMES)),
        (Pickled::bytes("num_vis"), Pickled::Int(RECORD_SIZE as i64)),
    ]);
    write_pickle(&dir.join("batches.meta"), &meta, Protocol::Two)?;

    let mut first_tag = 0;
    for (idx, labels) in shards.iter().enumerate() {
        let label = format!("training batch {} of {}", idx + 1, shards.len());
        let batch = cifar10_batch(&label, labels, first_tag);
        write_pickle(
            &dir.join(format!("data_batch_{}", idx + 1)),
            &batch,
            Protocol::Two,
        )?;
        first_tag += labels.len() as u16;
    }
    let batch = cifar10_batch("testing batch 1 of 1", test, 0);
    write_pickle(&dir.join("test_batch"), &batch, Protocol::Two)
}

/// Writes `meta`, `train` and `test` over [FINE_NAMES]. Records are tagged
/// from `first_tag` in both splits.
pub fn write_cifar100(
    dir: &Path,
    train: &[i64],
    test: &[i64],
    first_tag: u16,
    protocol: Protocol,
) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let meta = Pickled::Dict(vec![
        (Pickled::bytes("fine_label_names"), text_list(&FINE_NAMES)),
        (
            Pickled::bytes("coarse_label_names"),
            text_list(&["fruit", "trees", "flowers"]),
        ),
    ]);
    write_pickle(&dir.join("meta"), &meta, protocol)?;
    write_pickle(
        &dir.join("train"),
        &cifar100_batch("training", train, first_tag),
        protocol,
    )?;
    write_pickle(
        &dir.join("test"),
        &cifar100_batch("testing", test, first_tag),
        protocol,
    )
}
