//! numpy arrays as they appear inside a pickle.
//!
//! Up to protocol 4 `pickle.dumps(ndarray)` writes a call to
//! `numpy.core.multiarray._reconstruct` followed by a BUILD whose state is
//! `(version, shape, dtype, is_fortran, raw_bytes)`. Protocol 5 instead reduces
//! to `numpy.core.numeric._frombuffer(buffer, dtype, shape, order)` with the
//! buffer stored in-band. In both forms the dtype is a reduced
//! `numpy.dtype("u1", 0, 1)` whose own state carries the byte order.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::pickle::{PickleError, PickleValue};

const RECONSTRUCT_MODULES: [&str; 2] = ["numpy.core.multiarray", "numpy._core.multiarray"];
const FROMBUFFER_MODULES: [&str; 2] = ["numpy.core.numeric", "numpy._core.numeric"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    U8,
    I8,
    I16,
    I32,
    I64,
}

impl DType {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "u1" => Some(DType::U8),
            "i1" => Some(DType::I8),
            "i2" => Some(DType::I16),
            "i4" => Some(DType::I32),
            "i8" => Some(DType::I64),
            _ => None,
        }
    }

    pub fn item_size(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 => 4,
            DType::I64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NumpyArray {
    shape: Vec<usize>,
    dtype: DType,
    data: Arc<[u8]>,
}

fn invalid(message: impl Into<String>) -> PickleError {
    PickleError::InvalidData(message.into())
}

fn payload(value: &PickleValue) -> Result<Arc<[u8]>, PickleError> {
    match value {
        PickleValue::Bytes(bytes) => Ok(Arc::clone(bytes)),
        PickleValue::String(text) => Ok(Arc::from(text.as_bytes())),
        other => Err(invalid(format!(
            "ndarray payload is {}, expected bytes",
            other.type_name()
        ))),
    }
}

fn parse_shape(value: &PickleValue) -> Result<Vec<usize>, PickleError> {
    value
        .as_sequence()
        .ok_or_else(|| invalid("ndarray shape is not a tuple"))?
        .iter()
        .map(|dim| {
            dim.as_int()
                .and_then(|dim| usize::try_from(dim).ok())
                .ok_or_else(|| invalid("ndarray dimension is not a size"))
        })
        .collect()
}

impl NumpyArray {
    /// Recognizes a reconstructed ndarray. Returns `Ok(None)` for any other value.
    pub fn from_pickle(value: &PickleValue) -> Result<Option<Self>, PickleError> {
        let PickleValue::Object {
            callable,
            args,
            state,
        } = value
        else {
            return Ok(None);
        };
        if RECONSTRUCT_MODULES
            .iter()
            .any(|module| callable.is_global(module, "_reconstruct"))
        {
            let state = state
                .as_deref()
                .ok_or_else(|| invalid("ndarray is missing its BUILD state"))?;
            return Self::from_state(state).map(Some);
        }
        if FROMBUFFER_MODULES
            .iter()
            .any(|module| callable.is_global(module, "_frombuffer"))
        {
            return Self::from_buffer_args(args).map(Some);
        }
        Ok(None)
    }

    fn from_state(state: &PickleValue) -> Result<Self, PickleError> {
        let fields = state
            .as_sequence()
            .filter(|fields| fields.len() == 5)
            .ok_or_else(|| invalid("ndarray state is not a 5-tuple"))?;
        let shape = parse_shape(&fields[1])?;
        let dtype = parse_dtype(&fields[2])?;
        if matches!(fields[3], PickleValue::Bool(true)) {
            return Err(invalid("fortran-ordered arrays are not supported"));
        }
        Self::new(shape, dtype, payload(&fields[4])?)
    }

    fn from_buffer_args(args: &PickleValue) -> Result<Self, PickleError> {
        let fields = args
            .as_sequence()
            .filter(|fields| fields.len() == 4)
            .ok_or_else(|| invalid("_frombuffer arguments are not a 4-tuple"))?;
        let data = payload(&fields[0])?;
        let dtype = parse_dtype(&fields[1])?;
        let shape = parse_shape(&fields[2])?;
        match fields[3].to_text().as_deref() {
            Some("C") => {}
            Some("F") => return Err(invalid("fortran-ordered arrays are not supported")),
            _ => return Err(invalid("_frombuffer order is not 'C' or 'F'")),
        }
        Self::new(shape, dtype, data)
    }

    fn new(shape: Vec<usize>, dtype: DType, data: Arc<[u8]>) -> Result<Self, PickleError> {
        let expected = shape
            .iter()
            .try_fold(dtype.item_size(), |bytes, &dim| bytes.checked_mul(dim))
            .ok_or_else(|| invalid(format!("ndarray shape {:?} overflows", shape)))?;
        if data.len() != expected {
            return Err(invalid(format!(
                "ndarray of shape {:?} needs {} bytes, found {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, dtype, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.item_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Widens every element to `i64`, reading little-endian words.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        self.data
            .chunks_exact(self.dtype.item_size())
            .map(|chunk| match self.dtype {
                DType::U8 => i64::from(chunk[0]),
                DType::I8 => i64::from(chunk[0] as i8),
                DType::I16 => i64::from(LittleEndian::read_i16(chunk)),
                DType::I32 => i64::from(LittleEndian::read_i32(chunk)),
                DType::I64 => LittleEndian::read_i64(chunk),
            })
            .collect()
    }
}

fn parse_dtype(value: &PickleValue) -> Result<DType, PickleError> {
    let (callable, args, state) = match value {
        PickleValue::Object {
            callable,
            args,
            state,
        } => (callable, args, state),
        other => {
            return Err(invalid(format!(
                "ndarray dtype is {}, expected a numpy.dtype",
                other.type_name()
            )))
        }
    };
    if !callable.is_global("numpy", "dtype") {
        return Err(invalid("ndarray dtype is not built by numpy.dtype"));
    }
    let code = args
        .as_sequence()
        .and_then(|args| args.first())
        .and_then(PickleValue::to_text)
        .ok_or_else(|| invalid("numpy.dtype without a type code"))?;
    let dtype =
        DType::from_code(&code).ok_or_else(|| invalid(format!("unsupported dtype '{}'", code)))?;

    let order = state
        .as_deref()
        .and_then(PickleValue::as_sequence)
        .and_then(|fields| fields.get(1))
        .and_then(PickleValue::to_text);
    if dtype.item_size() > 1 && order.as_deref() == Some(">") {
        return Err(invalid(format!("big-endian dtype '{}' is not supported", code)));
    }
    Ok(dtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(module: &str, name: &str) -> Box<PickleValue> {
        Box::new(PickleValue::Global {
            module: module.to_string(),
            name: name.to_string(),
        })
    }

    fn dtype(code: &str, order: &str) -> PickleValue {
        PickleValue::Object {
            callable: global("numpy", "dtype"),
            args: Box::new(PickleValue::Tuple(vec![
                PickleValue::Bytes(Arc::from(code.as_bytes())),
                PickleValue::Int(0),
                PickleValue::Int(1),
            ])),
            state: Some(Box::new(PickleValue::Tuple(vec![
                PickleValue::Int(3),
                PickleValue::String(order.to_string()),
            ]))),
        }
    }

    fn array(shape: &[i64], dtype: PickleValue, fortran: bool, data: &[u8]) -> PickleValue {
        PickleValue::Object {
            callable: global("numpy.core.multiarray", "_reconstruct"),
            args: Box::new(PickleValue::Tuple(Vec::new())),
            state: Some(Box::new(PickleValue::Tuple(vec![
                PickleValue::Int(1),
                PickleValue::Tuple(shape.iter().map(|&d| PickleValue::Int(d)).collect()),
                dtype,
                PickleValue::Bool(fortran),
                PickleValue::Bytes(Arc::from(data)),
            ]))),
        }
    }

    fn array_of_i16() -> PickleValue {
        array(&[2], dtype("i2", "<"), false, &[0xfe, 0xff, 0x2c, 0x01])
    }

    #[test]
    fn reads_uint8_matrix() {
        let value = array(&[2, 3], dtype("u1", "|"), false, &[1, 2, 3, 4, 5, 6]);
        let array = NumpyArray::from_pickle(&value).expect("valid").expect("ndarray");
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.dtype(), DType::U8);
        assert_eq!(array.bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn widens_little_endian_ints() {
        let value = array(&[2], dtype("i4", "<"), false, &[7, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
        let array = NumpyArray::from_pickle(&value).expect("valid").expect("ndarray");
        assert_eq!(array.to_i64_vec(), vec![7, -1]);

        let value = array_of_i16();
        let array = NumpyArray::from_pickle(&value).expect("valid").expect("ndarray");
        assert_eq!(array.to_i64_vec(), vec![-2, 300]);
    }

    #[test]
    fn rejects_fortran_order() {
        let value = array(&[1, 1], dtype("u1", "|"), true, &[0]);
        assert!(NumpyArray::from_pickle(&value).is_err());
    }

    #[test]
    fn rejects_short_payload() {
        let value = array(&[4], dtype("u1", "|"), false, &[0, 1]);
        assert!(NumpyArray::from_pickle(&value).is_err());
    }

    #[test]
    fn rejects_shape_overflowing_usize() {
        let value = array(&[i64::MAX, 4], dtype("u1", "|"), false, &[0; 4]);
        assert!(matches!(
            NumpyArray::from_pickle(&value),
            Err(PickleError::InvalidData(_))
        ));
    }

    fn frombuffer(data: &[u8], dtype: PickleValue, shape: &[i64], order: &str) -> PickleValue {
        PickleValue::Object {
            callable: global("numpy.core.numeric", "_frombuffer"),
            args: Box::new(PickleValue::Tuple(vec![
                PickleValue::Bytes(Arc::from(data)),
                dtype,
                PickleValue::Tuple(shape.iter().map(|&d| PickleValue::Int(d)).collect()),
                PickleValue::String(order.to_string()),
            ])),
            state: None,
        }
    }

    #[test]
    fn reads_in_band_buffer() {
        let value = frombuffer(&[9, 8, 7, 6], dtype("u1", "|"), &[2, 2], "C");
        let array = NumpyArray::from_pickle(&value).expect("valid").expect("ndarray");
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.len(), 4);
        assert_eq!(array.bytes(), &[9, 8, 7, 6]);
    }

    #[test]
    fn in_band_buffer_checks_order_and_size() {
        let fortran = frombuffer(&[0; 4], dtype("u1", "|"), &[2, 2], "F");
        assert!(NumpyArray::from_pickle(&fortran).is_err());
        let short = frombuffer(&[0; 3], dtype("u1", "|"), &[2, 2], "C");
        assert!(NumpyArray::from_pickle(&short).is_err());
        let huge = frombuffer(&[0; 8], dtype("i8", "<"), &[i64::MAX, 2], "C");
        assert!(NumpyArray::from_pickle(&huge).is_err());
    }

    #[test]
    fn other_values_are_not_arrays() {
        let value = PickleValue::List(vec![PickleValue::Int(1)]);
        assert!(NumpyArray::from_pickle(&value).expect("not an error").is_none());
    }
}
