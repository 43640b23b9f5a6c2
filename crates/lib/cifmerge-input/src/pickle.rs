//! A pickle reader covering what the CIFAR python archives and numpy arrays use.
//!
//! Values are decoded the way `pickle.load(f, encoding="bytes")` would: python 2
//! strings stay raw bytes while unicode strings become [PickleValue::String].
//! Class references and reductions are kept symbolic; nothing is executed.

use std::io::{self, BufRead, Read};
use std::sync::Arc;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use hashbrown::HashMap;
use thiserror::Error;

const HIGHEST_PROTOCOL: u8 = 5;

#[derive(Debug, Error)]
pub enum PickleError {
    #[error("failed to read pickle stream: {0}")]
    Io(#[from] io::Error),

    #[error("unknown pickle opcode 0x{0:02x}")]
    UnknownOpCode(u8),

    #[error("unsupported pickle protocol {0}")]
    UnsupportedProtocol(u8),

    #[error("pickle stack underflow")]
    StackUnderflow,

    #[error("pickle mark expected but not found")]
    MissingMark,

    #[error("pickle memo entry {0} not found")]
    MemoNotFound(u32),

    #[error("invalid pickle data: {0}")]
    InvalidData(String),
}

/// A decoded pickle value.
#[derive(Debug, Clone, PartialEq)]
pub enum PickleValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Arc<[u8]>),
    String(String),
    List(Vec<PickleValue>),
    Tuple(Vec<PickleValue>),
    Dict(Vec<(PickleValue, PickleValue)>),
    Global {
        module: String,
        name: String,
    },
    Object {
        callable: Box<PickleValue>,
        args: Box<PickleValue>,
        state: Option<Box<PickleValue>>,
    },
}

impl PickleValue {
    /// Looks up a dictionary entry by a byte-string or unicode key.
    pub fn get(&self, key: &str) -> Option<&PickleValue> {
        match self {
            PickleValue::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.key_matches(key))
                .map(|(_, value)| value),
            _ => None,
        }
    }

    fn key_matches(&self, key: &str) -> bool {
        match self {
            PickleValue::Bytes(bytes) => &bytes[..] == key.as_bytes(),
            PickleValue::String(text) => text == key,
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PickleValue::Int(value) => Some(*value),
            PickleValue::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PickleValue::Bytes(bytes) => Some(&bytes[..]),
            PickleValue::String(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Text of a unicode string, or of a byte string read as UTF-8.
    pub fn to_text(&self) -> Option<String> {
        match self {
            PickleValue::String(text) => Some(text.clone()),
            PickleValue::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[PickleValue]> {
        match self {
            PickleValue::List(items) | PickleValue::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_global(&self, module: &str, name: &str) -> bool {
        matches!(self, PickleValue::Global { module: m, name: n } if m == module && n == name)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PickleValue::None => "None",
            PickleValue::Bool(_) => "bool",
            PickleValue::Int(_) => "int",
            PickleValue::Float(_) => "float",
            PickleValue::Bytes(_) => "bytes",
            PickleValue::String(_) => "str",
            PickleValue::List(_) => "list",
            PickleValue::Tuple(_) => "tuple",
            PickleValue::Dict(_) => "dict",
            PickleValue::Global { .. } => "global",
            PickleValue::Object { .. } => "object",
        }
    }
}

#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
enum OpCode {
    Proto = 0x80,
    Frame = 0x95,
    Stop = b'.',
    Mark = b'(',
    Pop = b'0',
    PopMark = b'1',
    Dup = b'2',
    None = b'N',
    NewTrue = 0x88,
    NewFalse = 0x89,
    Int = b'I',
    BinInt = b'J',
    BinInt1 = b'K',
    BinInt2 = b'M',
    Long1 = 0x8a,
    Long4 = 0x8b,
    BinFloat = b'G',
    BinString = b'T',
    ShortBinString = b'U',
    BinUnicode = b'X',
    ShortBinUnicode = 0x8c,
    BinUnicode8 = 0x8d,
    BinBytes = b'B',
    ShortBinBytes = b'C',
    BinBytes8 = 0x8e,
    ByteArray8 = 0x96,
    EmptyTuple = b')',
    Tuple = b't',
    Tuple1 = 0x85,
    Tuple2 = 0x86,
    Tuple3 = 0x87,
    EmptyList = b']',
    List = b'l',
    Append = b'a',
    Appends = b'e',
    EmptyDict = b'}',
    Dict = b'd',
    SetItem = b's',
    SetItems = b'u',
    EmptySet = 0x8f,
    AddItems = 0x90,
    FrozenSet = 0x91,
    Put = b'p',
    BinPut = b'q',
    LongBinPut = b'r',
    Memoize = 0x94,
    Get = b'g',
    BinGet = b'h',
    LongBinGet = b'j',
    Global = b'c',
    StackGlobal = 0x93,
    Reduce = b'R',
    NewObj = 0x81,
    NewObjEx = 0x92,
    Build = b'b',
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let op = match value {
            0x80 => Self::Proto,
            0x95 => Self::Frame,
            b'.' => Self::Stop,
            b'(' => Self::Mark,
            b'0' => Self::Pop,
            b'1' => Self::PopMark,
            b'2' => Self::Dup,
            b'N' => Self::None,
            0x88 => Self::NewTrue,
            0x89 => Self::NewFalse,
            b'I' => Self::Int,
            b'J' => Self::BinInt,
            b'K' => Self::BinInt1,
            b'M' => Self::BinInt2,
            0x8a => Self::Long1,
            0x8b => Self::Long4,
            b'G' => Self::BinFloat,
            b'T' => Self::BinString,
            b'U' => Self::ShortBinString,
            b'X' => Self::BinUnicode,
            0x8c => Self::ShortBinUnicode,
            0x8d => Self::BinUnicode8,
            b'B' => Self::BinBytes,
            b'C' => Self::ShortBinBytes,
            0x8e => Self::BinBytes8,
            0x96 => Self::ByteArray8,
            b')' => Self::EmptyTuple,
            b't' => Self::Tuple,
            0x85 => Self::Tuple1,
            0x86 => Self::Tuple2,
            0x87 => Self::Tuple3,
            b']' => Self::EmptyList,
            b'l' => Self::List,
            b'a' => Self::Append,
            b'e' => Self::Appends,
            b'}' => Self::EmptyDict,
            b'd' => Self::Dict,
            b's' => Self::SetItem,
            b'u' => Self::SetItems,
            0x8f => Self::EmptySet,
            0x90 => Self::AddItems,
            0x91 => Self::FrozenSet,
            b'p' => Self::Put,
            b'q' => Self::BinPut,
            b'r' => Self::LongBinPut,
            0x94 => Self::Memoize,
            b'g' => Self::Get,
            b'h' => Self::BinGet,
            b'j' => Self::LongBinGet,
            b'c' => Self::Global,
            0x93 => Self::StackGlobal,
            b'R' => Self::Reduce,
            0x81 => Self::NewObj,
            0x92 => Self::NewObjEx,
            b'b' => Self::Build,
            other => return Err(other),
        };
        Ok(op)
    }
}

#[derive(Default)]
struct Machine {
    stack: Vec<PickleValue>,
    marks: Vec<usize>,
    memo: HashMap<u32, PickleValue>,
}

impl Machine {
    fn push(&mut self, value: PickleValue) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<PickleValue, PickleError> {
        self.stack.pop().ok_or(PickleError::StackUnderflow)
    }

    fn top(&mut self) -> Result<&mut PickleValue, PickleError> {
        self.stack.last_mut().ok_or(PickleError::StackUnderflow)
    }

    fn pop_mark(&mut self) -> Result<Vec<PickleValue>, PickleError> {
        let mark = self.marks.pop().ok_or(PickleError::MissingMark)?;
        if mark > self.stack.len() {
            return Err(PickleError::StackUnderflow);
        }
        Ok(self.stack.split_off(mark))
    }

    fn memo_put(&mut self, idx: u32) -> Result<(), PickleError> {
        let value = self.stack.last().ok_or(PickleError::StackUnderflow)?.clone();
        self.memo.insert(idx, value);
        Ok(())
    }

    fn memo_get(&mut self, idx: u32) -> Result<(), PickleError> {
        let value = self
            .memo
            .get(&idx)
            .cloned()
            .ok_or(PickleError::MemoNotFound(idx))?;
        self.push(value);
        Ok(())
    }

    fn extend_list(&mut self, items: Vec<PickleValue>) -> Result<(), PickleError> {
        match self.top()? {
            PickleValue::List(list) => {
                list.extend(items);
                Ok(())
            }
            other => Err(PickleError::InvalidData(format!(
                "cannot append to {}",
                other.type_name()
            ))),
        }
    }

    fn set_items(&mut self, items: Vec<PickleValue>) -> Result<(), PickleError> {
        if items.len() % 2 != 0 {
            return Err(PickleError::InvalidData(
                "odd number of dictionary items".to_string(),
            ));
        }
        let entries = match self.top()? {
            PickleValue::Dict(entries) => entries,
            other => {
                return Err(PickleError::InvalidData(format!(
                    "cannot set items on {}",
                    other.type_name()
                )))
            }
        };
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        }
        Ok(())
    }

    fn build(&mut self, new_state: PickleValue) -> Result<(), PickleError> {
        let top = self.top()?;
        if let PickleValue::Object { state, .. } = top {
            *state = Some(Box::new(new_state));
            return Ok(());
        }
        if !matches!(top, PickleValue::Dict(_)) {
            return Err(PickleError::InvalidData(format!(
                "cannot build {}",
                top.type_name()
            )));
        }
        match new_state {
            PickleValue::Dict(entries) => {
                let flat = entries.into_iter().flat_map(|(k, v)| [k, v]).collect();
                self.set_items(flat)
            }
            other => Err(PickleError::InvalidData(format!(
                "cannot build dict from {}",
                other.type_name()
            ))),
        }
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, PickleError> {
    let mut line = Vec::with_capacity(32);
    reader.read_until(b'\n', &mut line)?;
    if line.pop() != Some(b'\n') {
        return Err(PickleError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|e| PickleError::InvalidData(format!("invalid UTF-8: {}", e)))
}

fn read_exact_vec<R: BufRead>(reader: &mut R, len: u64) -> Result<Vec<u8>, PickleError> {
    let mut buffer = Vec::new();
    reader.take(len).read_to_end(&mut buffer)?;
    if (buffer.len() as u64) != len {
        return Err(PickleError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(buffer)
}

fn read_bytes<R: BufRead>(reader: &mut R, len: u64) -> Result<PickleValue, PickleError> {
    Ok(PickleValue::Bytes(Arc::from(read_exact_vec(reader, len)?)))
}

fn read_unicode<R: BufRead>(reader: &mut R, len: u64) -> Result<PickleValue, PickleError> {
    let raw = read_exact_vec(reader, len)?;
    String::from_utf8(raw)
        .map(PickleValue::String)
        .map_err(|e| PickleError::InvalidData(format!("invalid UTF-8: {}", e)))
}

/// Decodes a little-endian two's complement integer of up to eight bytes.
fn decode_long(raw: &[u8]) -> Result<PickleValue, PickleError> {
    if raw.len() > 8 {
        return Err(PickleError::InvalidData(format!(
            "integer of {} bytes does not fit in 64 bits",
            raw.len()
        )));
    }
    if raw.is_empty() {
        return Ok(PickleValue::Int(0));
    }
    let negative = raw[raw.len() - 1] & 0x80 != 0;
    let mut padded = if negative { [0xff; 8] } else { [0; 8] };
    padded[..raw.len()].copy_from_slice(raw);
    Ok(PickleValue::Int(i64::from_le_bytes(padded)))
}

fn read_text_int<R: BufRead>(reader: &mut R) -> Result<PickleValue, PickleError> {
    let line = read_line(reader)?;
    match line.as_str() {
        "00" => Ok(PickleValue::Bool(false)),
        "01" => Ok(PickleValue::Bool(true)),
        text => text
            .parse::<i64>()
            .map(PickleValue::Int)
            .map_err(|e| PickleError::InvalidData(format!("invalid integer '{}': {}", text, e))),
    }
}

fn read_memo_index<R: BufRead>(reader: &mut R) -> Result<u32, PickleError> {
    let line = read_line(reader)?;
    line.parse::<u32>()
        .map_err(|e| PickleError::InvalidData(format!("invalid memo index '{}': {}", line, e)))
}

/// Reads one pickled value from `reader`, stopping at the STOP opcode.
pub fn read_pickle<R: BufRead>(reader: &mut R) -> Result<PickleValue, PickleError> {
    let mut machine = Machine::default();
    loop {
        let code = reader.read_u8()?;
        let op = OpCode::try_from(code).map_err(PickleError::UnknownOpCode)?;
        match op {
            OpCode::Proto => {
                let version = reader.read_u8()?;
                if version > HIGHEST_PROTOCOL {
                    return Err(PickleError::UnsupportedProtocol(version));
                }
            }
            OpCode::Frame => {
                reader.read_u64::<LittleEndian>()?;
            }
            OpCode::Stop => return machine.pop(),
            OpCode::Mark => machine.marks.push(machine.stack.len()),
            OpCode::Pop => {
                machine.pop()?;
            }
            OpCode::PopMark => {
                machine.pop_mark()?;
            }
            OpCode::Dup => {
                let top = machine.top()?.clone();
                machine.push(top);
            }
            OpCode::None => machine.push(PickleValue::None),
            OpCode::NewTrue => machine.push(PickleValue::Bool(true)),
            OpCode::NewFalse => machine.push(PickleValue::Bool(false)),
            OpCode::Int => machine.push(read_text_int(reader)?),
            OpCode::BinInt => {
                let value = reader.read_i32::<LittleEndian>()?;
                machine.push(PickleValue::Int(i64::from(value)));
            }
            OpCode::BinInt1 => {
                let value = reader.read_u8()?;
                machine.push(PickleValue::Int(i64::from(value)));
            }
            OpCode::BinInt2 => {
                let value = reader.read_u16::<LittleEndian>()?;
                machine.push(PickleValue::Int(i64::from(value)));
            }
            OpCode::Long1 => {
                let len = reader.read_u8()?;
                let raw = read_exact_vec(reader, u64::from(len))?;
                machine.push(decode_long(&raw)?);
            }
            OpCode::Long4 => {
                let len = reader.read_u32::<LittleEndian>()?;
                let raw = read_exact_vec(reader, u64::from(len))?;
                machine.push(decode_long(&raw)?);
            }
            OpCode::BinFloat => {
                let value = reader.read_f64::<BigEndian>()?;
                machine.push(PickleValue::Float(value));
            }
            OpCode::BinString | OpCode::BinBytes => {
                let len = reader.read_u32::<LittleEndian>()?;
                machine.push(read_bytes(reader, u64::from(len))?);
            }
            OpCode::ShortBinString | OpCode::ShortBinBytes => {
                let len = reader.read_u8()?;
                machine.push(read_bytes(reader, u64::from(len))?);
            }
            OpCode::BinBytes8 | OpCode::ByteArray8 => {
                let len = reader.read_u64::<LittleEndian>()?;
                machine.push(read_bytes(reader, len)?);
            }
            OpCode::BinUnicode => {
                let len = reader.read_u32::<LittleEndian>()?;
                machine.push(read_unicode(reader, u64::from(len))?);
            }
            OpCode::ShortBinUnicode => {
                let len = reader.read_u8()?;
                machine.push(read_unicode(reader, u64::from(len))?);
            }
            OpCode::BinUnicode8 => {
                let len = reader.read_u64::<LittleEndian>()?;
                machine.push(read_unicode(reader, len)?);
            }
            OpCode::EmptyTuple => machine.push(PickleValue::Tuple(Vec::new())),
            OpCode::Tuple => {
                let items = machine.pop_mark()?;
                machine.push(PickleValue::Tuple(items));
            }
            OpCode::Tuple1 => {
                let first = machine.pop()?;
                machine.push(PickleValue::Tuple(vec![first]));
            }
            OpCode::Tuple2 => {
                let second = machine.pop()?;
                let first = machine.pop()?;
                machine.push(PickleValue::Tuple(vec![first, second]));
            }
            OpCode::Tuple3 => {
                let third = machine.pop()?;
                let second = machine.pop()?;
                let first = machine.pop()?;
                machine.push(PickleValue::Tuple(vec![first, second, third]));
            }
            OpCode::EmptyList | OpCode::EmptySet => machine.push(PickleValue::List(Vec::new())),
            OpCode::List | OpCode::FrozenSet => {
                let items = machine.pop_mark()?;
                machine.push(PickleValue::List(items));
            }
            OpCode::Append => {
                let item = machine.pop()?;
                machine.extend_list(vec![item])?;
            }
            OpCode::Appends | OpCode::AddItems => {
                let items = machine.pop_mark()?;
                machine.extend_list(items)?;
            }
            OpCode::EmptyDict => machine.push(PickleValue::Dict(Vec::new())),
            OpCode::Dict => {
                let items = machine.pop_mark()?;
                machine.push(PickleValue::Dict(Vec::new()));
                machine.set_items(items)?;
            }
            OpCode::SetItem => {
                let value = machine.pop()?;
                let key = machine.pop()?;
                machine.set_items(vec![key, value])?;
            }
            OpCode::SetItems => {
                let items = machine.pop_mark()?;
                machine.set_items(items)?;
            }
            OpCode::Put => {
                let idx = read_memo_index(reader)?;
                machine.memo_put(idx)?;
            }
            OpCode::BinPut => {
                let idx = reader.read_u8()?;
                machine.memo_put(u32::from(idx))?;
            }
            OpCode::LongBinPut => {
                let idx = reader.read_u32::<LittleEndian>()?;
                machine.memo_put(idx)?;
            }
            OpCode::Memoize => {
                let idx = machine.memo.len() as u32;
                machine.memo_put(idx)?;
            }
            OpCode::Get => {
                let idx = read_memo_index(reader)?;
                machine.memo_get(idx)?;
            }
            OpCode::BinGet => {
                let idx = reader.read_u8()?;
                machine.memo_get(u32::from(idx))?;
            }
            OpCode::LongBinGet => {
                let idx = reader.read_u32::<LittleEndian>()?;
                machine.memo_get(idx)?;
            }
            OpCode::Global => {
                let module = read_line(reader)?;
                let name = read_line(reader)?;
                machine.push(PickleValue::Global { module, name });
            }
            OpCode::StackGlobal => {
                let name = machine.pop()?;
                let module = machine.pop()?;
                match (module, name) {
                    (PickleValue::String(module), PickleValue::String(name)) => {
                        machine.push(PickleValue::Global { module, name })
                    }
                    (module, name) => {
                        return Err(PickleError::InvalidData(format!(
                            "global needs two strings, found {} and {}",
                            module.type_name(),
                            name.type_name()
                        )))
                    }
                }
            }
            OpCode::Reduce | OpCode::NewObj => {
                let args = machine.pop()?;
                let callable = machine.pop()?;
                machine.push(PickleValue::Object {
                    callable: Box::new(callable),
                    args: Box::new(args),
                    state: None,
                });
            }
            OpCode::NewObjEx => {
                let _kwargs = machine.pop()?;
                let args = machine.pop()?;
                let callable = machine.pop()?;
                machine.push(PickleValue::Object {
                    callable: Box::new(callable),
                    args: Box::new(args),
                    state: None,
                });
            }
            OpCode::Build => {
                let state = machine.pop()?;
                machine.build(state)?;
            }
        }
    }
}
