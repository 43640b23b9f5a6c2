use byteorder::{LittleEndian, WriteBytesExt};
use hashbrown::HashMap;

const BATCH: usize = 1000;

/// Values the fixture writer knows how to pickle.
#[derive(Debug, Clone)]
pub enum Pickled {
    None,
    Int(i64),
    /// A python 2 `str`, or `bytes` under protocol 4.
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<Pickled>),
    Dict(Vec<(Pickled, Pickled)>),
    /// A C-ordered numpy array with the given dtype code (`u1`, `i8`, ...).
    Array {
        shape: Vec<usize>,
        dtype: String,
        data: Vec<u8>,
    },
}

impl Pickled {
    pub fn bytes(text: &str) -> Self {
        Pickled::Bytes(text.as_bytes().to_vec())
    }

    pub fn int_list(values: &[i64]) -> Self {
        Pickled::List(values.iter().map(|&v| Pickled::Int(v)).collect())
    }

    pub fn u8_matrix(rows: usize, cols: usize, data: Vec<u8>) -> Self {
        assert_eq!(rows * cols, data.len(), "matrix payload does not match its shape");
        Pickled::Array {
            shape: vec![rows, cols],
            dtype: "u1".to_string(),
            data,
        }
    }
}

/// Protocol flavours as written by python 2 `cPickle` and python 3.
///
/// Under `Five` arrays are reduced to `_frombuffer` over an in-band
/// `bytearray`, as numpy does when pickling with protocol 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Two,
    Four,
    Five,
}

impl Protocol {
    fn framed(&self) -> bool {
        !matches!(self, Protocol::Two)
    }
}

/// Serializes `value` the way python's pickler would for the given protocol.
pub fn dumps(value: &Pickled, protocol: Protocol) -> Vec<u8> {
    let mut pickler = Pickler {
        protocol,
        out: Vec::new(),
        memo_len: 0,
        globals: HashMap::new(),
    };
    pickler.value(value);
    pickler.out.push(b'.');

    let mut stream = vec![0x80];
    match protocol {
        Protocol::Two => stream.push(2),
        Protocol::Four | Protocol::Five => {
            stream.push(if protocol == Protocol::Four { 4 } else { 5 });
            stream.push(0x95);
            stream
                .write_u64::<LittleEndian>(pickler.out.len() as u64)
                .expect("writing to a vec");
        }
    }
    stream.extend(pickler.out);
    stream
}

struct Pickler {
    protocol: Protocol,
    out: Vec<u8>,
    memo_len: u32,
    globals: HashMap<(String, String), u32>,
}

impl Pickler {
    fn memoize(&mut self) -> u32 {
        let idx = self.memo_len;
        match self.protocol {
            Protocol::Two => {
                if idx < 256 {
                    self.out.push(b'q');
                    self.out.push(idx as u8);
                } else {
                    self.out.push(b'r');
                    self.put_u32(idx);
                }
            }
            Protocol::Four | Protocol::Five => self.out.push(0x94),
        }
        self.memo_len += 1;
        idx
    }

    fn memo_get(&mut self, idx: u32) {
        if idx < 256 {
            self.out.push(b'h');
            self.out.push(idx as u8);
        } else {
            self.out.push(b'j');
            self.put_u32(idx);
        }
    }

    fn put_u32(&mut self, value: u32) {
        self.out.write_u32::<LittleEndian>(value).expect("writing to a vec");
    }

    fn value(&mut self, value: &Pickled) {
        match value {
            Pickled::None => self.out.push(b'N'),
            Pickled::Int(v) => self.int(*v),
            Pickled::Bytes(raw) => self.raw_bytes(raw),
            Pickled::Text(text) => self.text(text),
            Pickled::List(items) => {
                self.out.push(b']');
                self.memoize();
                for chunk in items.chunks(BATCH) {
                    self.out.push(b'(');
                    chunk.iter().for_each(|item| self.value(item));
                    self.out.push(b'e');
                }
            }
            Pickled::Dict(entries) => {
                self.out.push(b'}');
                self.memoize();
                for chunk in entries.chunks(BATCH) {
                    self.out.push(b'(');
                    for (key, item) in chunk {
                        self.value(key);
                        self.value(item);
                    }
                    self.out.push(b'u');
                }
            }
            Pickled::Array { shape, dtype, data } => self.array(shape, dtype, data),
        }
    }

    fn int(&mut self, value: i64) {
        match value {
            0..=0xff => {
                self.out.push(b'K');
                self.out.push(value as u8);
            }
            0x100..=0xffff => {
                self.out.push(b'M');
                self.out
                    .write_u16::<LittleEndian>(value as u16)
                    .expect("writing to a vec");
            }
            _ if i32::try_from(value).is_ok() => {
                self.out.push(b'J');
                self.out
                    .write_i32::<LittleEndian>(value as i32)
                    .expect("writing to a vec");
            }
            _ => {
                self.out.push(0x8a);
                self.out.push(8);
                self.out.extend(value.to_le_bytes());
            }
        }
    }

    fn raw_bytes(&mut self, raw: &[u8]) {
        let (short, long) = if self.protocol.framed() {
            (b'C', b'B')
        } else {
            (b'U', b'T')
        };
        if raw.len() < 256 {
            self.out.push(short);
            self.out.push(raw.len() as u8);
        } else {
            self.out.push(long);
            self.put_u32(raw.len() as u32);
        }
        self.out.extend_from_slice(raw);
        self.memoize();
    }

    fn text(&mut self, text: &str) {
        if self.protocol.framed() && text.len() < 256 {
            self.out.push(0x8c);
            self.out.push(text.len() as u8);
        } else {
            self.out.push(b'X');
            self.put_u32(text.len() as u32);
        }
        self.out.extend_from_slice(text.as_bytes());
        self.memoize();
    }

    fn global(&mut self, module: &str, name: &str) {
        let key = (module.to_string(), name.to_string());
        if let Some(&idx) = self.globals.get(&key) {
            self.memo_get(idx);
            return;
        }
        if self.protocol.framed() {
            self.text(module);
            self.text(name);
            self.out.push(0x93);
        } else {
            self.out.push(b'c');
            self.out.extend_from_slice(format!("{}\n{}\n", module, name).as_bytes());
        }
        let idx = self.memoize();
        self.globals.insert(key, idx);
    }

    fn array(&mut self, shape: &[usize], dtype: &str, data: &[u8]) {
        if self.protocol == Protocol::Five {
            self.buffer_array(shape, dtype, data);
            return;
        }
        self.global("numpy.core.multiarray", "_reconstruct");
        self.global("numpy", "ndarray");
        self.int(0);
        self.out.push(0x85);
        self.raw_bytes(b"b");
        self.out.push(0x87);
        self.out.push(b'R');
        self.memoize();

        self.out.push(b'(');
        self.int(1);
        self.out.push(b'(');
        shape.iter().for_each(|&dim| self.int(dim as i64));
        self.out.push(b't');
        self.dtype(dtype);
        self.out.push(0x89);
        self.raw_bytes(data);
        self.out.push(b't');
        self.out.push(b'b');
    }

    fn buffer_array(&mut self, shape: &[usize], dtype: &str, data: &[u8]) {
        self.global("numpy.core.numeric", "_frombuffer");
        self.out.push(b'(');
        self.out.push(0x96);
        self.out
            .write_u64::<LittleEndian>(data.len() as u64)
            .expect("writing to a vec");
        self.out.extend_from_slice(data);
        self.memoize();
        self.dtype(dtype);
        self.out.push(b'(');
        shape.iter().for_each(|&dim| self.int(dim as i64));
        self.out.push(b't');
        self.text("C");
        self.out.push(b't');
        self.out.push(b'R');
        self.memoize();
    }

    fn dtype(&mut self, code: &str) {
        self.global("numpy", "dtype");
        self.raw_bytes(code.as_bytes());
        self.int(0);
        self.int(1);
        self.out.push(0x87);
        self.out.push(b'R');
        self.memoize();

        let order: &[u8] = if code.ends_with('1') { b"|" } else { b"<" };
        self.out.push(b'(');
        self.int(3);
        self.raw_bytes(order);
        self.out.push(b'N');
        self.out.push(b'N');
        self.out.push(b'N');
        self.int(-1);
        self.int(-1);
        self.int(0);
        self.out.push(b't');
        self.out.push(b'b');
    }
}
