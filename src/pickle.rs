//! A small pickle virtual machine.
//!
//! Turns a pickle stream into a [`Value`] tree without constructing any Python
//! objects. Class instances become [`Value::Object`] records carrying the
//! dotted class name, the constructor arguments and whatever state `BUILD`
//! attached, which is all that is needed to read a line_profiler snapshot.

use std::collections::HashMap;
use thiserror::Error;

/// Deepest container nesting accepted. Line profiler snapshots stay under ten.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Key/value pairs in stream order.
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Global {
        module: String,
        name: String,
    },
    Object {
        class: String,
        args: Vec<Value>,
        state: Option<Box<Value>>,
        /// Items pushed with SETITEM(S), present for dict subclasses.
        items: Vec<(Value, Value)>,
    },
}

#[derive(Error, Debug, PartialEq)]
pub enum PickleError {
    #[error("unexpected end of pickle stream at byte {0}")]
    UnexpectedEof(usize),

    #[error("unknown opcode 0x{opcode:02x} at byte {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("unsupported opcode {name} at byte {offset}")]
    UnsupportedOpcode { name: &'static str, offset: usize },

    #[error("stack underflow at byte {0}")]
    StackUnderflow(usize),

    #[error("no MARK on the stack at byte {0}")]
    MissingMark(usize),

    #[error("memo key {0} not found")]
    MissingMemo(u32),

    #[error("malformed {what} literal {literal:?}")]
    BadLiteral { what: &'static str, literal: String },

    #[error("integer wider than 64 bits ({0} bytes)")]
    IntegerTooWide(usize),

    #[error("invalid UTF-8 in text opcode at byte {0}")]
    InvalidUtf8(usize),

    #[error("{message} at byte {offset}")]
    InvalidOperand { message: &'static str, offset: usize },

    #[error("stack holds {0} values at STOP, expected 1")]
    TrailingStack(usize),

    #[error("values nested past the depth limit at byte {0}")]
    TooDeep(usize),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Global { .. } => "global",
            Value::Object { .. } => "object",
        }
    }

    /// Levels of containers, counting this value. Scalars are 1.
    pub fn depth(&self) -> usize {
        let pair_depth = |(key, value): &(Value, Value)| key.depth().max(value.depth());
        let children = match self {
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                items.iter().map(Value::depth).max()
            }
            Value::Dict(pairs) => pairs.iter().map(pair_depth).max(),
            Value::Object {
                args, state, items, ..
            } => args
                .iter()
                .map(Value::depth)
                .chain(state.iter().map(|state| state.depth()))
                .chain(items.iter().map(pair_depth))
                .max(),
            _ => None,
        };
        1 + children.unwrap_or(0)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integers, with Python's bool-is-int rule.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => self.as_int().map(|i| i as f64),
        }
    }

    /// Elements of a list or tuple.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Looks up a string key in a dict.
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(self.as_dict()?, key)
    }

    /// Looks up an instance attribute of an unpickled object.
    ///
    /// Handles both the plain `__dict__` state and the `(__dict__, slots)` pair.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        let Value::Object { state: Some(state), .. } = self else {
            return None;
        };
        match state.as_ref() {
            Value::Dict(pairs) => lookup(pairs, name),
            Value::Tuple(parts) => parts.iter().find_map(|part| part.get(name)),
            _ => None,
        }
    }

    /// The pairs of a dict, and nothing else.
    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(pairs) => Some(pairs.as_slice()),
            _ => None,
        }
    }

    /// A mapping-like view: a dict, or an object that carries dict items.
    pub fn as_mapping(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(pairs) => Some(pairs.as_slice()),
            Value::Object { items, args, .. } => {
                if !items.is_empty() {
                    return Some(items.as_slice());
                }
                args.first().and_then(Value::as_dict)
            }
            _ => None,
        }
    }
}

fn lookup<'a>(pairs: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    pairs
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

/// Decodes one pickled value from the start of `data`.
pub fn loads(data: &[u8]) -> Result<Value, PickleError> {
    Machine::new(data).run()
}

struct Machine<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Machine {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value, PickleError> {
        loop {
            let offset = self.pos;
            let opcode = self.read_u8()?;
            match opcode {
                b'.' => return self.stop(),
                0x80 => {
                    self.read_u8()?;
                }
                0x95 => {
                    self.read_bytes(8)?;
                }
                b'(' => self.marks.push(self.stack.len()),
                b'0' => {
                    let floor = self.marks.last().copied().unwrap_or(0);
                    if self.stack.len() > floor {
                        self.stack.pop();
                    } else {
                        self.pop_mark(offset)?;
                    }
                }
                b'1' => {
                    self.pop_mark(offset)?;
                }
                b'2' => {
                    let top = self.top(offset)?.clone();
                    self.stack.push(top);
                }

                b'N' => self.stack.push(Value::None),
                0x88 => self.stack.push(Value::Bool(true)),
                0x89 => self.stack.push(Value::Bool(false)),
                b'I' => {
                    let line = self.read_line()?;
                    let value = match line {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        _ => Value::Int(parse_int(line, "INT")?),
                    };
                    self.stack.push(value);
                }
                b'L' => {
                    let line = self.read_line()?;
                    let digits = line.strip_suffix('L').unwrap_or(line);
                    self.stack.push(Value::Int(parse_int(digits, "LONG")?));
                }
                b'J' => {
                    let raw = self.read_array::<4>()?;
                    self.stack.push(Value::Int(i64::from(i32::from_le_bytes(raw))));
                }
                b'K' => {
                    let value = self.read_u8()?;
                    self.stack.push(Value::Int(i64::from(value)));
                }
                b'M' => {
                    let raw = self.read_array::<2>()?;
                    self.stack.push(Value::Int(i64::from(u16::from_le_bytes(raw))));
                }
                0x8a => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Int(decode_long(bytes)?));
                }
                0x8b => {
                    let len = self.read_len4(offset)?;
                    let bytes = self.read_bytes(len)?;
                    self.stack.push(Value::Int(decode_long(bytes)?));
                }
                b'F' => {
                    let line = self.read_line()?;
                    let value = line.trim().parse::<f64>().map_err(|_| PickleError::BadLiteral {
                        what: "FLOAT",
                        literal: line.to_string(),
                    })?;
                    self.stack.push(Value::Float(value));
                }
                b'G' => {
                    let raw = self.read_array::<8>()?;
                    self.stack.push(Value::Float(f64::from_be_bytes(raw)));
                }

                b'S' => {
                    let line = self.read_line()?;
                    let bytes = unquote_string(line)?;
                    self.stack.push(text_or_bytes(bytes));
                }
                b'T' => {
                    let len = self.read_len4(offset)?;
                    let bytes = self.read_bytes(len)?.to_vec();
                    self.stack.push(text_or_bytes(bytes));
                }
                b'U' => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?.to_vec();
                    self.stack.push(text_or_bytes(bytes));
                }
                b'V' => {
                    let line = self.read_raw_line()?;
                    self.stack.push(Value::Str(raw_unicode_unescape(line)?));
                }
                b'X' => {
                    let len = self.read_len4(offset)?;
                    let text = self.read_utf8(len, offset)?;
                    self.stack.push(Value::Str(text));
                }
                0x8c => {
                    let len = usize::from(self.read_u8()?);
                    let text = self.read_utf8(len, offset)?;
                    self.stack.push(Value::Str(text));
                }
                0x8d => {
                    let len = self.read_len8(offset)?;
                    let text = self.read_utf8(len, offset)?;
                    self.stack.push(Value::Str(text));
                }
                b'B' => {
                    let len = self.read_len4(offset)?;
                    let bytes = self.read_bytes(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                }
                b'C' => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.read_bytes(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                }
                0x8e | 0x96 => {
                    let len = self.read_len8(offset)?;
                    let bytes = self.read_bytes(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                }

                b']' => self.stack.push(Value::List(Vec::new())),
                b')' => self.stack.push(Value::Tuple(Vec::new())),
                b'}' => self.stack.push(Value::Dict(Vec::new())),
                0x8f => self.stack.push(Value::Set(Vec::new())),
                b'l' => {
                    let items = self.pop_nested(offset)?;
                    self.stack.push(Value::List(items));
                }
                b't' => {
                    let items = self.pop_nested(offset)?;
                    self.stack.push(Value::Tuple(items));
                }
                0x85..=0x87 => {
                    let arity = usize::from(opcode - 0x84);
                    let floor = self.marks.last().copied().unwrap_or(0);
                    if self.stack.len() < floor + arity {
                        return Err(PickleError::StackUnderflow(offset));
                    }
                    let items = self.stack.split_off(self.stack.len() - arity);
                    check_depth(&items, offset)?;
                    self.stack.push(Value::Tuple(items));
                }
                b'd' => {
                    let items = self.pop_nested(offset)?;
                    let pairs = pair_up(items, offset)?;
                    self.stack.push(Value::Dict(pairs));
                }
                0x91 => {
                    let items = self.pop_nested(offset)?;
                    self.stack.push(Value::Set(items));
                }
                b'a' => {
                    let item = self.pop(offset)?;
                    self.extend_list(vec![item], offset)?;
                }
                b'e' => {
                    let items = self.pop_mark(offset)?;
                    self.extend_list(items, offset)?;
                }
                b's' => {
                    let value = self.pop(offset)?;
                    let key = self.pop(offset)?;
                    self.extend_dict(vec![(key, value)], offset)?;
                }
                b'u' => {
                    let items = self.pop_mark(offset)?;
                    let pairs = pair_up(items, offset)?;
                    self.extend_dict(pairs, offset)?;
                }
                0x90 => {
                    let items = self.pop_nested(offset)?;
                    match self.top_mut(offset)? {
                        Value::Set(set) => set.extend(items),
                        _ => {
                            return Err(PickleError::InvalidOperand {
                                message: "ADDITEMS target is not a set",
                                offset,
                            })
                        }
                    }
                }

                b'p' => {
                    let key = parse_memo_key(self.read_line()?)?;
                    self.put(key, offset)?;
                }
                b'q' => {
                    let key = u32::from(self.read_u8()?);
                    self.put(key, offset)?;
                }
                b'r' => {
                    let key = u32::from_le_bytes(self.read_array::<4>()?);
                    self.put(key, offset)?;
                }
                0x94 => {
                    let key = u32::try_from(self.memo.len()).map_err(|_| {
                        PickleError::InvalidOperand {
                            message: "memo is full",
                            offset,
                        }
                    })?;
                    self.put(key, offset)?;
                }
                b'g' => {
                    let key = parse_memo_key(self.read_line()?)?;
                    self.get(key)?;
                }
                b'h' => {
                    let key = u32::from(self.read_u8()?);
                    self.get(key)?;
                }
                b'j' => {
                    let key = u32::from_le_bytes(self.read_array::<4>()?);
                    self.get(key)?;
                }

                b'c' => {
                    let module = self.read_line()?.to_string();
                    let name = self.read_line()?.to_string();
                    self.stack.push(Value::Global { module, name });
                }
                0x93 => {
                    let name = self.pop(offset)?;
                    let module = self.pop(offset)?;
                    match (module, name) {
                        (Value::Str(module), Value::Str(name)) => {
                            self.stack.push(Value::Global { module, name })
                        }
                        _ => {
                            return Err(PickleError::InvalidOperand {
                                message: "STACK_GLOBAL operands are not strings",
                                offset,
                            })
                        }
                    }
                }
                b'R' => {
                    let args = self.pop(offset)?;
                    let callable = self.pop(offset)?;
                    let args = into_args(args, offset)?;
                    let value = reduce(callable, args, offset)?;
                    self.stack.push(value);
                }
                0x81 => {
                    let args = self.pop(offset)?;
                    let class = self.pop(offset)?;
                    let args = into_args(args, offset)?;
                    let value = instantiate(class, args, offset)?;
                    self.stack.push(value);
                }
                0x92 => {
                    self.pop(offset)?;
                    let args = self.pop(offset)?;
                    let class = self.pop(offset)?;
                    let args = into_args(args, offset)?;
                    let value = instantiate(class, args, offset)?;
                    self.stack.push(value);
                }
                b'o' => {
                    let mut items = self.pop_mark(offset)?;
                    if items.is_empty() {
                        return Err(PickleError::StackUnderflow(offset));
                    }
                    let args = items.split_off(1);
                    let class = items.remove(0);
                    let value = instantiate(class, args, offset)?;
                    self.stack.push(value);
                }
                b'i' => {
                    let module = self.read_line()?.to_string();
                    let name = self.read_line()?.to_string();
                    let args = self.pop_mark(offset)?;
                    let value = instantiate(Value::Global { module, name }, args, offset)?;
                    self.stack.push(value);
                }
                b'b' => {
                    let new_state = self.pop(offset)?;
                    build(self.top_mut(offset)?, new_state, offset)?;
                }

                b'P' => return Err(unsupported("PERSID", offset)),
                b'Q' => return Err(unsupported("BINPERSID", offset)),
                0x82..=0x84 => return Err(unsupported("EXT", offset)),
                0x97 => return Err(unsupported("NEXT_BUFFER", offset)),
                0x98 => return Err(unsupported("READONLY_BUFFER", offset)),
                _ => return Err(PickleError::UnknownOpcode { opcode, offset }),
            }
        }
    }

    fn stop(mut self) -> Result<Value, PickleError> {
        match self.stack.len() {
            1 => self.stack.pop().ok_or(PickleError::StackUnderflow(self.pos)),
            0 => Err(PickleError::StackUnderflow(self.pos)),
            n => Err(PickleError::TrailingStack(n)),
        }
    }

    fn read_u8(&mut self) -> Result<u8, PickleError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(PickleError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PickleError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(PickleError::UnexpectedEof(self.data.len()))?;
        let data = self.data;
        let bytes = &data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_len4(&mut self, offset: usize) -> Result<usize, PickleError> {
        let len = i32::from_le_bytes(self.read_array::<4>()?);
        usize::try_from(len).map_err(|_| PickleError::InvalidOperand {
            message: "negative length",
            offset,
        })
    }

    fn read_len8(&mut self, offset: usize) -> Result<usize, PickleError> {
        let len = u64::from_le_bytes(self.read_array::<8>()?);
        usize::try_from(len).map_err(|_| PickleError::InvalidOperand {
            message: "length does not fit in memory",
            offset,
        })
    }

    fn read_utf8(&mut self, len: usize, offset: usize) -> Result<String, PickleError> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PickleError::InvalidUtf8(offset))
    }

    /// Bytes up to (not including) the next newline.
    fn read_raw_line(&mut self) -> Result<&'a [u8], PickleError> {
        let data = self.data;
        let rest = &data[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or(PickleError::UnexpectedEof(self.data.len()))?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn read_line(&mut self) -> Result<&'a str, PickleError> {
        let offset = self.pos;
        let raw = self.read_raw_line()?;
        std::str::from_utf8(raw).map_err(|_| PickleError::InvalidUtf8(offset))
    }

    fn pop(&mut self, offset: usize) -> Result<Value, PickleError> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() <= floor {
            return Err(PickleError::StackUnderflow(offset));
        }
        self.stack.pop().ok_or(PickleError::StackUnderflow(offset))
    }

    fn pop_mark(&mut self, offset: usize) -> Result<Vec<Value>, PickleError> {
        let mark = self.marks.pop().ok_or(PickleError::MissingMark(offset))?;
        if mark > self.stack.len() {
            return Err(PickleError::StackUnderflow(offset));
        }
        Ok(self.stack.split_off(mark))
    }

    /// Pops everything above the last MARK as the children of a new container.
    fn pop_nested(&mut self, offset: usize) -> Result<Vec<Value>, PickleError> {
        let items = self.pop_mark(offset)?;
        check_depth(&items, offset)?;
        Ok(items)
    }

    fn top(&self, offset: usize) -> Result<&Value, PickleError> {
        self.stack.last().ok_or(PickleError::StackUnderflow(offset))
    }

    fn top_mut(&mut self, offset: usize) -> Result<&mut Value, PickleError> {
        self.stack
            .last_mut()
            .ok_or(PickleError::StackUnderflow(offset))
    }

    fn put(&mut self, key: u32, offset: usize) -> Result<(), PickleError> {
        let value = self.top(offset)?.clone();
        self.memo.insert(key, value);
        Ok(())
    }

    fn get(&mut self, key: u32) -> Result<(), PickleError> {
        let value = self
            .memo
            .get(&key)
            .cloned()
            .ok_or(PickleError::MissingMemo(key))?;
        self.stack.push(value);
        Ok(())
    }

    fn extend_list(&mut self, items: Vec<Value>, offset: usize) -> Result<(), PickleError> {
        check_depth(&items, offset)?;
        match self.top_mut(offset)? {
            Value::List(list) => {
                list.extend(items);
                Ok(())
            }
            _ => Err(PickleError::InvalidOperand {
                message: "APPEND target is not a list",
                offset,
            }),
        }
    }

    fn extend_dict(&mut self, pairs: Vec<(Value, Value)>, offset: usize) -> Result<(), PickleError> {
        for (key, value) in &pairs {
            check_depth([key, value], offset)?;
        }
        match self.top_mut(offset)? {
            Value::Dict(dict) => {
                dict.extend(pairs);
                Ok(())
            }
            Value::Object { items, .. } => {
                items.extend(pairs);
                Ok(())
            }
            _ => Err(PickleError::InvalidOperand {
                message: "SETITEM target is not a dict",
                offset,
            }),
        }
    }
}

/// Fails before `items` are placed inside a container that would exceed
/// [`MAX_DEPTH`].
fn check_depth<'v>(
    items: impl IntoIterator<Item = &'v Value>,
    offset: usize,
) -> Result<(), PickleError> {
    if items.into_iter().any(|item| item.depth() >= MAX_DEPTH) {
        return Err(PickleError::TooDeep(offset));
    }
    Ok(())
}

fn unsupported(name: &'static str, offset: usize) -> PickleError {
    PickleError::UnsupportedOpcode { name, offset }
}

fn parse_int(text: &str, what: &'static str) -> Result<i64, PickleError> {
    text.trim().parse::<i64>().map_err(|_| PickleError::BadLiteral {
        what,
        literal: text.to_string(),
    })
}

fn parse_memo_key(text: &str) -> Result<u32, PickleError> {
    text.trim().parse::<u32>().map_err(|_| PickleError::BadLiteral {
        what: "memo key",
        literal: text.to_string(),
    })
}

/// Little-endian two's complement, as written by LONG1/LONG4.
fn decode_long(bytes: &[u8]) -> Result<i64, PickleError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(PickleError::IntegerTooWide(bytes.len()));
    }
    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut raw = [fill; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    Ok(i64::from_le_bytes(raw))
}

fn text_or_bytes(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::Str(text),
        Err(err) => Value::Bytes(err.into_bytes()),
    }
}

/// Decodes the quoted repr written by the protocol 0 STRING opcode.
fn unquote_string(line: &str) -> Result<Vec<u8>, PickleError> {
    let bad = || PickleError::BadLiteral {
        what: "STRING",
        literal: line.to_string(),
    };
    let bytes = line.as_bytes();
    if bytes.len() < 2 || bytes[0] != bytes[bytes.len() - 1] || !matches!(bytes[0], b'\'' | b'"') {
        return Err(bad());
    }
    let inner = &bytes[1..bytes.len() - 1];
    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] != b'\\' {
            out.push(inner[i]);
            i += 1;
            continue;
        }
        let escaped = *inner.get(i + 1).ok_or_else(bad)?;
        i += 2;
        match escaped {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'0' => out.push(0),
            b'\\' | b'\'' | b'"' => out.push(escaped),
            b'x' => {
                let hex = inner.get(i..i + 2).ok_or_else(bad)?;
                let hex = std::str::from_utf8(hex).map_err(|_| bad())?;
                out.push(u8::from_str_radix(hex, 16).map_err(|_| bad())?);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Decodes the raw-unicode-escape payload of the protocol 0 UNICODE opcode.
fn raw_unicode_unescape(raw: &[u8]) -> Result<String, PickleError> {
    let bad = || PickleError::BadLiteral {
        what: "UNICODE",
        literal: String::from_utf8_lossy(raw).into_owned(),
    };
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let width = match (raw[i], raw.get(i + 1)) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            (byte, _) => {
                // Everything outside an escape is latin-1.
                out.push(char::from(byte));
                i += 1;
                continue;
            }
        };
        let hex = raw.get(i + 2..i + 2 + width).ok_or_else(bad)?;
        let hex = std::str::from_utf8(hex).map_err(|_| bad())?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| bad())?;
        out.push(char::from_u32(code).ok_or_else(bad)?);
        i += 2 + width;
    }
    Ok(out)
}

fn pair_up(items: Vec<Value>, offset: usize) -> Result<Vec<(Value, Value)>, PickleError> {
    if items.len() % 2 != 0 {
        return Err(PickleError::InvalidOperand {
            message: "odd number of dict items",
            offset,
        });
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn into_args(args: Value, offset: usize) -> Result<Vec<Value>, PickleError> {
    match args {
        Value::Tuple(items) => Ok(items),
        _ => Err(PickleError::InvalidOperand {
            message: "call arguments are not a tuple",
            offset,
        }),
    }
}

fn is_builtins(module: &str) -> bool {
    module == "builtins" || module == "__builtin__"
}

/// Applies a REDUCE: the handful of callables a profiler snapshot can
/// contain are mapped onto plain values, everything else stays opaque.
fn reduce(callable: Value, mut args: Vec<Value>, offset: usize) -> Result<Value, PickleError> {
    let Value::Global { module, name } = &callable else {
        return Err(PickleError::InvalidOperand {
            message: "REDUCE callable is not a global",
            offset,
        });
    };
    match (module.as_str(), name.as_str()) {
        ("copyreg" | "copy_reg", "_reconstructor") => {
            if args.is_empty() {
                return Err(PickleError::StackUnderflow(offset));
            }
            instantiate(args.swap_remove(0), Vec::new(), offset)
        }
        ("copyreg" | "copy_reg", "__newobj__") => {
            if args.is_empty() {
                return Err(PickleError::StackUnderflow(offset));
            }
            let class = args.remove(0);
            instantiate(class, args, offset)
        }
        ("_codecs", "encode") => match args.first() {
            Some(Value::Str(text)) => Ok(Value::Bytes(text.chars().map(|c| c as u8).collect())),
            _ => instantiate(callable, args, offset),
        },
        _ => instantiate(callable, args, offset),
    }
}

fn instantiate(class: Value, args: Vec<Value>, offset: usize) -> Result<Value, PickleError> {
    check_depth(&args, offset)?;
    let Value::Global { module, name } = class else {
        return Err(PickleError::InvalidOperand {
            message: "class is not a global",
            offset,
        });
    };
    let dict_like = (module == "collections" && (name == "OrderedDict" || name == "defaultdict"))
        || (is_builtins(&module) && name == "dict");
    if dict_like {
        let seed = if name == "defaultdict" { args.get(1) } else { args.first() };
        return Ok(Value::Dict(seed.map(dict_seed).unwrap_or_default()));
    }
    if is_builtins(&module) && (name == "set" || name == "frozenset") {
        let items = args
            .first()
            .and_then(|seed| match seed {
                Value::Set(items) => Some(items.clone()),
                other => other.as_sequence().map(<[Value]>::to_vec),
            })
            .unwrap_or_default();
        return Ok(Value::Set(items));
    }
    Ok(Value::Object {
        class: format!("{module}.{name}"),
        args,
        state: None,
        items: Vec::new(),
    })
}

/// Initial contents passed to a dict constructor: a dict or a list of pairs.
fn dict_seed(seed: &Value) -> Vec<(Value, Value)> {
    if let Value::Dict(pairs) = seed {
        return pairs.clone();
    }
    seed.as_sequence()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item.as_sequence() {
                    Some([key, value]) => Some((key.clone(), value.clone())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn build(target: &mut Value, new_state: Value, offset: usize) -> Result<(), PickleError> {
    check_depth([&new_state], offset)?;
    match target {
        Value::Object { state, .. } => {
            let merged = match (state.take().map(|boxed| *boxed), new_state) {
                (Some(Value::Dict(mut existing)), Value::Dict(extra)) => {
                    existing.extend(extra);
                    Value::Dict(existing)
                }
                (_, new_state) => new_state,
            };
            *state = Some(Box::new(merged));
            Ok(())
        }
        Value::Dict(pairs) => match new_state {
            Value::Dict(extra) => {
                pairs.extend(extra);
                Ok(())
            }
            Value::None => Ok(()),
            _ => Err(PickleError::InvalidOperand {
                message: "BUILD state for a dict is not a dict",
                offset,
            }),
        },
        _ => Err(PickleError::InvalidOperand {
            message: "BUILD target cannot take state",
            offset,
        }),
    }
}
