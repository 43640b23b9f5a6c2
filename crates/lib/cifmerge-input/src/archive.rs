use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use cifmerge_core::batch::RawBatch;
use cifmerge_core::error::DataError;
use cifmerge_core::image::RECORD_SIZE;
use cifmerge_core::labels::LabelTaxonomy;
use log::{debug, info};

use crate::error::LoadError;
use crate::numpy::{DType, NumpyArray};
use crate::pickle::{read_pickle, PickleValue};

/// Which of the two python archive layouts a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Cifar10,
    Cifar100,
}

impl ArchiveKind {
    pub fn label_key(&self) -> &'static str {
        match self {
            ArchiveKind::Cifar10 => "labels",
            ArchiveKind::Cifar100 => "fine_labels",
        }
    }

    pub fn names_key(&self) -> &'static str {
        match self {
            ArchiveKind::Cifar10 => "label_names",
            ArchiveKind::Cifar100 => "fine_label_names",
        }
    }

    pub fn meta_file(&self) -> &'static str {
        match self {
            ArchiveKind::Cifar10 => "batches.meta",
            ArchiveKind::Cifar100 => "meta",
        }
    }
}

/// Taxonomy and both splits of one archive directory.
#[derive(Debug, Clone)]
pub struct CifarArchive {
    pub taxonomy: LabelTaxonomy,
    pub train: RawBatch,
    pub test: RawBatch,
}

/// Unpickles a whole archive file.
pub fn read_archive(path: &Path) -> Result<PickleValue, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    read_pickle(&mut reader).map_err(|source| LoadError::Pickle {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads one data batch: image records, labels and file names.
pub fn load_batch(path: &Path, kind: ArchiveKind) -> Result<RawBatch, LoadError> {
    let archive = read_archive(path)?;
    let fields = Fields { archive: &archive, path };

    let data = fields.image_data("data")?;
    let labels = fields.int_list(kind.label_key())?;
    let filenames = match fields.optional("filenames") {
        Some(_) => fields.text_list("filenames")?,
        None => Vec::new(),
    };
    let batch_label = fields
        .optional("batch_label")
        .and_then(PickleValue::to_text);
    let coarse_labels = match fields.optional("coarse_labels") {
        Some(_) => Some(fields.int_list("coarse_labels")?),
        None => None,
    };

    let batch = RawBatch::builder()
        .data(data)
        .labels(labels)
        .filenames(filenames)
        .batch_label(batch_label)
        .coarse_labels(coarse_labels)
        .build()
        .validated()
        .map_err(|source| fields.data_error(source))?;
    debug!("Read {} records from {}", batch.len(), path.display());
    Ok(batch)
}

/// Reads the ordered class names from a metadata file.
pub fn load_taxonomy(path: &Path, kind: ArchiveKind) -> Result<LabelTaxonomy, LoadError> {
    let archive = read_archive(path)?;
    let fields = Fields { archive: &archive, path };
    let names = fields.text_list(kind.names_key())?;
    debug!("Read {} class names from {}", names.len(), path.display());
    Ok(LabelTaxonomy::new(names))
}

/// Loads `batches.meta`, `data_batch_1..=train_batches` and `test_batch`.
/// Training shards are joined in file order.
pub fn load_cifar10(dir: &Path, train_batches: usize) -> Result<CifarArchive, LoadError> {
    let kind = ArchiveKind::Cifar10;
    let taxonomy = load_taxonomy(&dir.join(kind.meta_file()), kind)?;
    let shards = (1..=train_batches)
        .map(|idx| load_batch(&dir.join(format!("data_batch_{}", idx)), kind))
        .collect::<Result<Vec<RawBatch>, LoadError>>()?;
    let train = RawBatch::concat(shards);
    let test = load_batch(&dir.join("test_batch"), kind)?;
    info!(
        "CIFAR-10 at {}: {} classes, {} train and {} test images",
        dir.display(),
        taxonomy.len(),
        train.len(),
        test.len()
    );
    Ok(CifarArchive {
        taxonomy,
        train,
        test,
    })
}

/// Loads `meta`, `train` and `test`.
pub fn load_cifar100(dir: &Path) -> Result<CifarArchive, LoadError> {
    let kind = ArchiveKind::Cifar100;
    let taxonomy = load_taxonomy(&dir.join(kind.meta_file()), kind)?;
    let train = load_batch(&dir.join("train"), kind)?;
    let test = load_batch(&dir.join("test"), kind)?;
    info!(
        "CIFAR-100 at {}: {} fine classes, {} train and {} test images",
        dir.display(),
        taxonomy.len(),
        train.len(),
        test.len()
    );
    Ok(CifarArchive {
        taxonomy,
        train,
        test,
    })
}

/// Typed access to the entries of an unpickled archive dictionary.
struct Fields<'a> {
    archive: &'a PickleValue,
    path: &'a Path,
}

impl<'a> Fields<'a> {
    fn optional(&self, key: &str) -> Option<&'a PickleValue> {
        self.archive.get(key)
    }

    fn required(&self, key: &str) -> Result<&'a PickleValue, LoadError> {
        self.optional(key).ok_or_else(|| LoadError::MissingKey {
            path: self.path_buf(),
            key: key.to_string(),
        })
    }

    fn path_buf(&self) -> PathBuf {
        self.path.to_path_buf()
    }

    fn wrong_type(&self, key: &str, expected: &str) -> LoadError {
        LoadError::UnexpectedType {
            path: self.path_buf(),
            key: key.to_string(),
            expected: expected.to_string(),
        }
    }

    fn data_error(&self, source: DataError) -> LoadError {
        LoadError::Data {
            path: self.path_buf(),
            source,
        }
    }

    fn numpy(&self, key: &str, value: &PickleValue) -> Result<Option<NumpyArray>, LoadError> {
        NumpyArray::from_pickle(value).map_err(|source| {
            debug!("'{}' looked like an ndarray but failed to decode: {}", key, source);
            LoadError::Pickle {
                path: self.path_buf(),
                source,
            }
        })
    }

    /// Flat record bytes from a `(N, 3072)` uint8 array or a raw byte string.
    fn image_data(&self, key: &str) -> Result<Vec<u8>, LoadError> {
        let value = self.required(key)?;
        if let Some(array) = self.numpy(key, value)? {
            if array.dtype() != DType::U8 {
                return Err(self.wrong_type(key, "a uint8 array"));
            }
            match array.shape() {
                [_, width] if *width != RECORD_SIZE => {
                    return Err(self.data_error(DataError::RecordLength { found: *width }));
                }
                [_, _] | [_] => {}
                _ => return Err(self.wrong_type(key, "a one or two dimensional array")),
            }
            return Ok(array.bytes().to_vec());
        }
        match value {
            PickleValue::Bytes(bytes) => Ok(bytes.to_vec()),
            _ => Err(self.wrong_type(key, "an image array or byte string")),
        }
    }

    fn int_list(&self, key: &str) -> Result<Vec<i64>, LoadError> {
        let value = self.required(key)?;
        if let Some(array) = self.numpy(key, value)? {
            return Ok(array.to_i64_vec());
        }
        value
            .as_sequence()
            .ok_or_else(|| self.wrong_type(key, "a list of integers"))?
            .iter()
            .map(|item| {
                item.as_int()
                    .ok_or_else(|| self.wrong_type(key, "a list of integers"))
            })
            .collect()
    }

    fn text_list(&self, key: &str) -> Result<Vec<String>, LoadError> {
        self.required(key)?
            .as_sequence()
            .ok_or_else(|| self.wrong_type(key, "a list of strings"))?
            .iter()
            .map(|item| {
                item.to_text()
                    .ok_or_else(|| self.wrong_type(key, "a list of strings"))
            })
            .collect()
    }
}
