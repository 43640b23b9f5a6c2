use thiserror::Error;

/// Fatal problems found while shaping archive contents into datasets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("image record holds {found} bytes, expected 3072")]
    RecordLength { found: usize },

    #[error("image buffer of {found} bytes is not a whole number of 3072-byte records")]
    BufferLength { found: usize },

    #[error("{context}: {images} images but {labels} labels")]
    CountMismatch {
        context: String,
        images: usize,
        labels: usize,
    },

    #[error("label {label} cannot be stored as a class index")]
    LabelOutOfRange { label: i64 },

    #[error("label {label} is not one of the {classes} base classes")]
    UnknownBaseLabel { label: i64, classes: usize },

    #[error("synthetic label {label} of superclass '{superclass}' collides with the {base_classes} base classes")]
    LabelCollision {
        superclass: String,
        label: u8,
        base_classes: usize,
    },
}
