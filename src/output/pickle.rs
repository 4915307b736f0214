//! Pickle protocol 2 for lists of byte strings.
//!
//! The writer produces what CPython emits for
//! `pickle.dump([b"...", ...], f, protocol=2)`, minus the memo opcodes, so
//! the file loads under both Python 2 (as `str`) and Python 3 (as `bytes`).
//! Protocol 2 has no bytes opcode; each element is stored as the reduction
//! `_codecs.encode(<latin-1 text>, 'latin1')`.
//!
//! The reader accepts that subset plus memo opcodes and the protocol 3
//! bytes opcodes, which covers lists of byte strings written by CPython.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::OndiskError;

const PROTO: u8 = 0x80;
const STOP: u8 = b'.';
const EMPTY_LIST: u8 = b']';
const MARK: u8 = b'(';
const APPEND: u8 = b'a';
const APPENDS: u8 = b'e';
const GLOBAL: u8 = b'c';
const BINUNICODE: u8 = b'X';
const SHORT_BINUNICODE: u8 = 0x8c;
const EMPTY_TUPLE: u8 = b')';
const TUPLE2: u8 = 0x86;
const REDUCE: u8 = b'R';
const BINPUT: u8 = b'q';
const LONG_BINPUT: u8 = b'r';
const BINGET: u8 = b'h';
const LONG_BINGET: u8 = b'j';
const MEMOIZE: u8 = 0x94;
const FRAME: u8 = 0x95;
const BINBYTES: u8 = b'B';
const SHORT_BINBYTES: u8 = b'C';

/// Protocol version written by [`encode_bytes_list`].
pub const PROTOCOL: u8 = 2;

/// CPython flushes list items in groups of this size.
const BATCH_SIZE: usize = 1000;

/// Decoded byte strings may total at most this multiple of the input size.
const EXPANSION_LIMIT: usize = 16;

/// Encode `items` as a pickled list of byte strings.
pub fn encode_bytes_list<I, B>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let items: Vec<B> = items.into_iter().collect();
    let mut out = vec![PROTO, PROTOCOL, EMPTY_LIST];

    for chunk in items.chunks(BATCH_SIZE) {
        if let [only] = chunk {
            write_bytes(&mut out, only.as_ref());
            out.push(APPEND);
        } else {
            out.push(MARK);
            for item in chunk {
                write_bytes(&mut out, item.as_ref());
            }
            out.push(APPENDS);
        }
    }

    out.push(STOP);
    out
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.is_empty() {
        out.push(GLOBAL);
        out.extend_from_slice(b"__builtin__\nbytes\n");
        out.push(EMPTY_TUPLE);
        out.push(REDUCE);
        return;
    }

    out.push(GLOBAL);
    out.extend_from_slice(b"_codecs\nencode\n");
    // Each byte becomes the code point of the same value.
    let latin1: String = bytes.iter().map(|&b| char::from(b)).collect();
    write_unicode(out, &latin1);
    write_unicode(out, "latin1");
    out.push(TUPLE2);
    out.push(REDUCE);
}

fn write_unicode(out: &mut Vec<u8>, text: &str) {
    out.push(BINUNICODE);
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

/// Stack values the reader understands.
///
/// Everything except the list is shared, so memo fetches are O(1).
#[derive(Clone, Debug)]
enum Value {
    Mark,
    List(Vec<Vec<u8>>),
    Text(Rc<str>),
    Bytes(Rc<[u8]>),
    Global { module: Rc<str>, name: Rc<str> },
    Tuple(Rc<[Value]>),
}

/// A memo slot. Lists are recorded but never copied.
#[derive(Debug)]
enum Slot {
    Value(Value),
    List,
}

/// Decode a pickled list of byte strings.
pub fn decode_bytes_list(data: &[u8]) -> Result<Vec<Vec<u8>>, OndiskError> {
    Decoder::new(data).run()
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    memo: HashMap<u32, Slot>,
    budget: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            memo: HashMap::new(),
            budget: data.len().saturating_mul(EXPANSION_LIMIT),
        }
    }

    fn error(&self, message: impl Into<String>) -> OndiskError {
        OndiskError::PickleDecode {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], OndiskError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.error(format!("truncated input: needed {len} more byte(s)")))?;
        let data = self.data;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Account for `len` decoded bytes against the expansion budget.
    fn charge(&mut self, len: usize) -> Result<(), OndiskError> {
        match self.budget.checked_sub(len) {
            Some(rest) => {
                self.budget = rest;
                Ok(())
            }
            None => Err(self.error(format!(
                "decoded data exceeds {EXPANSION_LIMIT} times the input size"
            ))),
        }
    }

    fn byte(&mut self) -> Result<u8, OndiskError> {
        Ok(self.take(1)?[0])
    }

    fn u32_le(&mut self) -> Result<u32, OndiskError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn line(&mut self) -> Result<String, OndiskError> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| self.error("unterminated GLOBAL argument"))?;
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| self.error("GLOBAL argument is not UTF-8"))?
            .to_string();
        self.pos += len + 1;
        Ok(text)
    }

    fn text(&mut self, len: usize) -> Result<Value, OndiskError> {
        let raw = self.take(len)?;
        let text = std::str::from_utf8(raw).map_err(|_| self.error("string is not UTF-8"))?;
        Ok(Value::Text(Rc::from(text)))
    }

    fn pop(&mut self) -> Result<Value, OndiskError> {
        self.stack.pop().ok_or_else(|| self.error("stack underflow"))
    }

    fn pop_to_mark(&mut self) -> Result<Vec<Value>, OndiskError> {
        let mark = self
            .stack
            .iter()
            .rposition(|value| matches!(value, Value::Mark))
            .ok_or_else(|| self.error("no MARK on stack"))?;
        let items = self.stack.split_off(mark + 1);
        self.stack.pop();
        Ok(items)
    }

    fn top_list(&mut self) -> Result<&mut Vec<Vec<u8>>, OndiskError> {
        let offset = self.pos;
        match self.stack.last_mut() {
            Some(Value::List(list)) => Ok(list),
            _ => Err(OndiskError::PickleDecode {
                offset,
                message: "append target is not a list".to_string(),
            }),
        }
    }

    fn expect_bytes(&mut self, value: Value) -> Result<Vec<u8>, OndiskError> {
        match value {
            Value::Bytes(bytes) => {
                self.charge(bytes.len())?;
                Ok(bytes.to_vec())
            }
            other => Err(self.error(format!("list item is not a byte string: {other:?}"))),
        }
    }

    fn memo_put(&mut self, key: u32) -> Result<(), OndiskError> {
        let slot = match self.stack.last() {
            Some(Value::List(_)) => Slot::List,
            Some(value) => Slot::Value(value.clone()),
            None => return Err(self.error("memo store on empty stack")),
        };
        self.memo.insert(key, slot);
        Ok(())
    }

    fn memo_get(&mut self, key: u32) -> Result<(), OndiskError> {
        let value = match self.memo.get(&key) {
            Some(Slot::Value(value)) => value.clone(),
            // A flat list of byte strings never refers back to a list.
            Some(Slot::List) => {
                return Err(self.error(format!("memo key {key} refers to a list")));
            }
            None => return Err(self.error(format!("memo key {key} not found"))),
        };
        self.stack.push(value);
        Ok(())
    }

    fn reduce(&mut self) -> Result<(), OndiskError> {
        let args = self.pop()?;
        let callable = self.pop()?;

        let (module, name) = match callable {
            Value::Global { module, name } => (module, name),
            other => return Err(self.error(format!("cannot call {other:?}"))),
        };

        let bytes = match (&*module, &*name, args) {
            ("_codecs", "encode", Value::Tuple(args)) => match &*args {
                [Value::Text(text), Value::Text(encoding)]
                    if matches!(&**encoding, "latin1" | "latin-1") =>
                {
                    self.charge(text.len())?;
                    text.chars()
                        .map(|c| u8::try_from(u32::from(c)))
                        .collect::<Result<Vec<u8>, _>>()
                        .map_err(|_| self.error("latin-1 text holds a code point above 255"))?
                }
                [Value::Text(text), Value::Text(encoding)]
                    if matches!(&**encoding, "utf-8" | "utf8") =>
                {
                    self.charge(text.len())?;
                    text.as_bytes().to_vec()
                }
                _ => return Err(self.error("unsupported _codecs.encode arguments")),
            },
            ("__builtin__" | "builtins", "bytes", Value::Tuple(args)) if args.is_empty() => {
                Vec::new()
            }
            (module, name, _) => {
                return Err(self.error(format!("unsupported global {module}.{name}")));
            }
        };

        self.stack.push(Value::Bytes(Rc::from(bytes)));
        Ok(())
    }

    fn run(mut self) -> Result<Vec<Vec<u8>>, OndiskError> {
        loop {
            let opcode = self.byte()?;
            match opcode {
                PROTO => {
                    let version = self.byte()?;
                    if version > 5 {
                        return Err(self.error(format!("unsupported protocol {version}")));
                    }
                }
                FRAME => {
                    self.take(8)?;
                }
                EMPTY_LIST => self.stack.push(Value::List(Vec::new())),
                EMPTY_TUPLE => self.stack.push(Value::Tuple(Rc::from(Vec::new()))),
                MARK => self.stack.push(Value::Mark),
                GLOBAL => {
                    let module = Rc::from(self.line()?);
                    let name = Rc::from(self.line()?);
                    self.stack.push(Value::Global { module, name });
                }
                BINUNICODE => {
                    let len = self.u32_le()? as usize;
                    let value = self.text(len)?;
                    self.stack.push(value);
                }
                SHORT_BINUNICODE => {
                    let len = usize::from(self.byte()?);
                    let value = self.text(len)?;
                    self.stack.push(value);
                }
                BINBYTES => {
                    let len = self.u32_le()? as usize;
                    let raw = self.take(len)?;
                    self.stack.push(Value::Bytes(Rc::from(raw)));
                }
                SHORT_BINBYTES => {
                    let len = usize::from(self.byte()?);
                    let raw = self.take(len)?;
                    self.stack.push(Value::Bytes(Rc::from(raw)));
                }
                TUPLE2 => {
                    let second = self.pop()?;
                    let first = self.pop()?;
                    self.stack.push(Value::Tuple(Rc::from(vec![first, second])));
                }
                REDUCE => self.reduce()?,
                BINPUT => {
                    let key = u32::from(self.byte()?);
                    self.memo_put(key)?;
                }
                LONG_BINPUT => {
                    let key = self.u32_le()?;
                    self.memo_put(key)?;
                }
                MEMOIZE => {
                    let key = self.memo.len() as u32;
                    self.memo_put(key)?;
                }
                BINGET => {
                    let key = u32::from(self.byte()?);
                    self.memo_get(key)?;
                }
                LONG_BINGET => {
                    let key = self.u32_le()?;
                    self.memo_get(key)?;
                }
                APPEND => {
                    let value = self.pop()?;
                    let bytes = self.expect_bytes(value)?;
                    self.top_list()?.push(bytes);
                }
                APPENDS => {
                    let values = self.pop_to_mark()?;
                    let items = values
                        .into_iter()
                        .map(|value| self.expect_bytes(value))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.top_list()?.extend(items);
                }
                STOP => {
                    let result = match self.pop()? {
                        Value::List(items) => items,
                        other => {
                            let message = format!("top-level object is not a list: {other:?}");
                            return Err(self.error(message));
                        }
                    };
                    if !self.stack.is_empty() {
                        return Err(self.error("values left on stack after STOP"));
                    }
                    return Ok(result);
                }
                other => {
                    self.pos -= 1;
                    return Err(self.error(format!("unsupported opcode 0x{other:02x}")));
                }
            }
        }
    }
}
