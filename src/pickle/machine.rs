use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use crate::errors::PickleError;
use crate::pickle::opcodes::*;
use crate::pickle::value::{Global, Object, Value};

/// How Python 2 `str` payloads are turned into text.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StringEncoding {
    Latin1,
    Ascii
}

impl StringEncoding {
    fn decode(&self, raw: &[u8]) -> Option<Rc<str>> {
        match self {
            StringEncoding::Latin1 => Some(latin1_to_text(raw)),
            StringEncoding::Ascii if raw.is_ascii() => Some(latin1_to_text(raw)),
            StringEncoding::Ascii => None
        }
    }
}

impl Display for StringEncoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StringEncoding::Latin1 => write!(f, "latin1"),
            StringEncoding::Ascii => write!(f, "ASCII")
        }
    }
}

fn latin1_to_text(raw: &[u8]) -> Rc<str> {
    let text: String = raw.iter().map(|&b| b as char).collect();
    Rc::from(text)
}

pub struct Unpickler<'a> {
    input: &'a [u8],
    position: usize,
    encoding: StringEncoding,
    stack: Vec<Value>,
    metastack: Vec<Vec<Value>>,
    memo: HashMap<u64, Value>,
}

impl<'a> Unpickler<'a> {
    pub fn new(input: &'a [u8], encoding: StringEncoding) -> Self {
        Unpickler {
            input,
            position: 0,
            encoding,
            stack: Vec::new(),
            metastack: Vec::new(),
            memo: HashMap::new(),
        }
    }

    pub fn load(mut self) -> Result<Value, PickleError> {
        loop {
            let offset = self.position;
            let opcode = self.read_u8()?;
            match opcode {
                STOP => return self.pop(offset),
                PROTO => {
                    let version = self.read_u8()?;
                    log::trace!("Pickle protocol {}", version);
                }
                FRAME => {
                    self.read_u64()?;
                }
                MARK => {
                    let outer = std::mem::take(&mut self.stack);
                    self.metastack.push(outer);
                }
                POP => {
                    if self.stack.pop().is_none() {
                        self.pop_mark(offset)?;
                    }
                }
                POP_MARK => {
                    self.pop_mark(offset)?;
                }
                DUP => {
                    let top = self.peek(offset)?.clone();
                    self.stack.push(top);
                }

                NONE => self.stack.push(Value::None),
                NEWTRUE => self.stack.push(Value::Bool(true)),
                NEWFALSE => self.stack.push(Value::Bool(false)),
                INT => {
                    let line = self.read_line()?;
                    let value = match line {
                        b"01" => Value::Bool(true),
                        b"00" => Value::Bool(false),
                        _ => Value::Int(parse_decimal(line, offset)?)
                    };
                    self.stack.push(value);
                }
                LONG => {
                    let line = self.read_line()?;
                    let digits = line.strip_suffix(b"L").unwrap_or(line);
                    self.stack.push(Value::Int(parse_decimal(digits, offset)?));
                }
                BININT => {
                    let value = self.read_i32()?;
                    self.stack.push(Value::Int(value as i64));
                }
                BININT1 => {
                    let value = self.read_u8()?;
                    self.stack.push(Value::Int(value as i64));
                }
                BININT2 => {
                    let value = self.read_u16()?;
                    self.stack.push(Value::Int(value as i64));
                }
                LONG1 => {
                    let length = self.read_u8()? as usize;
                    let raw = self.read_bytes(length)?;
                    self.stack.push(Value::Int(decode_long(raw, offset)?));
                }
                LONG4 => {
                    let length = self.read_length_i32(offset)?;
                    let raw = self.read_bytes(length)?;
                    self.stack.push(Value::Int(decode_long(raw, offset)?));
                }
                FLOAT => {
                    let line = self.read_line()?;
                    let value = std::str::from_utf8(line)
                        .ok()
                        .and_then(|s| s.trim().parse::<f64>().ok())
                        .ok_or_else(|| malformed(line, offset))?;
                    self.stack.push(Value::Float(value));
                }
                BINFLOAT => {
                    let mut buffer = [0u8; 8];
                    buffer.copy_from_slice(self.read_bytes(8)?);
                    self.stack.push(Value::Float(f64::from_be_bytes(buffer)));
                }

                STRING => {
                    let line = self.read_line()?;
                    let raw = unquote_string_literal(line, offset)?;
                    let text = self.decode_str(&raw, offset)?;
                    self.stack.push(text);
                }
                BINSTRING => {
                    let length = self.read_length_i32(offset)?;
                    let raw = self.read_bytes(length)?;
                    let text = self.decode_str(raw, offset)?;
                    self.stack.push(text);
                }
                SHORT_BINSTRING => {
                    let length = self.read_u8()? as usize;
                    let raw = self.read_bytes(length)?;
                    let text = self.decode_str(raw, offset)?;
                    self.stack.push(text);
                }
                UNICODE => {
                    let line = self.read_line()?;
                    let text = decode_raw_unicode_escape(line, offset)?;
                    self.stack.push(Value::Text(Rc::from(text)));
                }
                BINUNICODE => {
                    let length = self.read_u32()? as usize;
                    self.push_utf8(length, offset)?;
                }
                SHORT_BINUNICODE => {
                    let length = self.read_u8()? as usize;
                    self.push_utf8(length, offset)?;
                }
                BINUNICODE8 => {
                    let length = self.read_length_u64(offset)?;
                    self.push_utf8(length, offset)?;
                }
                BINBYTES => {
                    let length = self.read_u32()? as usize;
                    self.push_bytes(length)?;
                }
                SHORT_BINBYTES => {
                    let length = self.read_u8()? as usize;
                    self.push_bytes(length)?;
                }
                BINBYTES8 | BYTEARRAY8 => {
                    let length = self.read_length_u64(offset)?;
                    self.push_bytes(length)?;
                }

                EMPTY_TUPLE => self.stack.push(Value::Tuple(Rc::from(Vec::new()))),
                TUPLE => {
                    let items = self.pop_mark(offset)?;
                    self.stack.push(Value::Tuple(Rc::from(items)));
                }
                TUPLE1 | TUPLE2 | TUPLE3 => {
                    let count = (opcode - TUPLE1 + 1) as usize;
                    if self.stack.len() < count {
                        return Err(PickleError::StackUnderflow { offset });
                    }
                    let items = self.stack.split_off(self.stack.len() - count);
                    self.stack.push(Value::Tuple(Rc::from(items)));
                }
                EMPTY_LIST => self.stack.push(Value::new_list(Vec::new())),
                LIST => {
                    let items = self.pop_mark(offset)?;
                    self.stack.push(Value::new_list(items));
                }
                EMPTY_DICT => self.stack.push(Value::new_dict(Vec::new())),
                DICT => {
                    let items = self.pop_mark(offset)?;
                    let pairs = into_pairs(items, offset)?;
                    self.stack.push(Value::new_dict(pairs));
                }
                EMPTY_SET => self.stack.push(Value::Set(Default::default())),
                FROZENSET => {
                    let items = self.pop_mark(offset)?;
                    self.stack.push(Value::Set(Rc::new(items.into())));
                }

                APPEND => {
                    let item = self.pop(offset)?;
                    self.extend_list(vec![item], offset)?;
                }
                APPENDS => {
                    let items = self.pop_mark(offset)?;
                    self.extend_list(items, offset)?;
                }
                SETITEM => {
                    let value = self.pop(offset)?;
                    let key = self.pop(offset)?;
                    self.extend_dict(vec![(key, value)], offset)?;
                }
                SETITEMS => {
                    let items = self.pop_mark(offset)?;
                    let pairs = into_pairs(items, offset)?;
                    self.extend_dict(pairs, offset)?;
                }
                ADDITEMS => {
                    let items = self.pop_mark(offset)?;
                    match self.peek(offset)? {
                        Value::Set(set) => set.borrow_mut().extend(items),
                        _ => return Err(type_mismatch("set", offset))
                    }
                }

                GET => {
                    let line = self.read_line()?;
                    let index = parse_decimal(line, offset)? as u64;
                    self.push_memo(index, offset)?;
                }
                BINGET => {
                    let index = self.read_u8()? as u64;
                    self.push_memo(index, offset)?;
                }
                LONG_BINGET => {
                    let index = self.read_u32()? as u64;
                    self.push_memo(index, offset)?;
                }
                PUT => {
                    let line = self.read_line()?;
                    let index = parse_decimal(line, offset)? as u64;
                    self.store_memo(index, offset)?;
                }
                BINPUT => {
                    let index = self.read_u8()? as u64;
                    self.store_memo(index, offset)?;
                }
                LONG_BINPUT => {
                    let index = self.read_u32()? as u64;
                    self.store_memo(index, offset)?;
                }
                MEMOIZE => {
                    let index = self.memo.len() as u64;
                    self.store_memo(index, offset)?;
                }

                GLOBAL => {
                    let module = self.read_utf8_line(offset)?;
                    let name = self.read_utf8_line(offset)?;
                    self.stack.push(Value::Global(Rc::new(Global::new(&module, &name))));
                }
                STACK_GLOBAL => {
                    let name = self.pop(offset)?;
                    let module = self.pop(offset)?;
                    let global = match (module.as_text(), name.as_text()) {
                        (Some(module), Some(name)) => Global::new(module, name),
                        _ => return Err(type_mismatch("module and name strings", offset))
                    };
                    self.stack.push(Value::Global(Rc::new(global)));
                }
                REDUCE => {
                    let args = self.pop(offset)?;
                    let callable = self.pop(offset)?;
                    let args = args.as_sequence()
                        .ok_or_else(|| type_mismatch("argument tuple", offset))?;
                    self.stack.push(reduce(callable, args, offset)?);
                }
                BUILD => {
                    let state = self.pop(offset)?;
                    let target = self.peek(offset)?;
                    build(target, state, offset)?;
                }
                INST => {
                    let module = self.read_utf8_line(offset)?;
                    let name = self.read_utf8_line(offset)?;
                    let args = self.pop_mark(offset)?;
                    let class = Value::Global(Rc::new(Global::new(&module, &name)));
                    self.stack.push(Value::new_object(Object { class, args, state: None }));
                }
                OBJ => {
                    let mut items = self.pop_mark(offset)?.into_iter();
                    let class = items.next().ok_or(PickleError::StackUnderflow { offset })?;
                    let args = items.collect();
                    self.stack.push(Value::new_object(Object { class, args, state: None }));
                }
                NEWOBJ => {
                    let args = self.pop(offset)?;
                    let class = self.pop(offset)?;
                    let args = args.as_sequence()
                        .ok_or_else(|| type_mismatch("argument tuple", offset))?;
                    self.stack.push(Value::new_object(Object { class, args, state: None }));
                }
                NEWOBJ_EX => {
                    let _kwargs = self.pop(offset)?;
                    let args = self.pop(offset)?;
                    let class = self.pop(offset)?;
                    let args = args.as_sequence()
                        .ok_or_else(|| type_mismatch("argument tuple", offset))?;
                    self.stack.push(Value::new_object(Object { class, args, state: None }));
                }

                PERSID => return Err(unsupported("PERSID", offset)),
                BINPERSID => return Err(unsupported("BINPERSID", offset)),
                EXT1 | EXT2 | EXT4 => return Err(unsupported("EXT", offset)),
                NEXT_BUFFER => return Err(unsupported("NEXT_BUFFER", offset)),
                READONLY_BUFFER => return Err(unsupported("READONLY_BUFFER", offset)),
                _ => return Err(PickleError::UnknownOpcode { opcode, offset })
            }
        }
    }

    fn read_u8(&mut self) -> Result<u8, PickleError> {
        let byte = *self.input.get(self.position)
            .ok_or(PickleError::UnexpectedEof { offset: self.position })?;
        self.position += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, length: usize) -> Result<&'a [u8], PickleError> {
        let end = self.position.checked_add(length)
            .filter(|end| *end <= self.input.len())
            .ok_or(PickleError::UnexpectedEof { offset: self.input.len() })?;
        let input = self.input;
        let slice = &input[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, PickleError> {
        let mut buffer = [0u8; 2];
        buffer.copy_from_slice(self.read_bytes(2)?);
        Ok(u16::from_le_bytes(buffer))
    }

    fn read_u32(&mut self) -> Result<u32, PickleError> {
        let mut buffer = [0u8; 4];
        buffer.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buffer))
    }

    fn read_i32(&mut self) -> Result<i32, PickleError> {
        let mut buffer = [0u8; 4];
        buffer.copy_from_slice(self.read_bytes(4)?);
        Ok(i32::from_le_bytes(buffer))
    }

    fn read_u64(&mut self) -> Result<u64, PickleError> {
        let mut buffer = [0u8; 8];
        buffer.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buffer))
    }

    fn read_length_i32(&mut self, offset: usize) -> Result<usize, PickleError> {
        let length = self.read_i32()?;
        usize::try_from(length).map_err(|_| PickleError::MalformedLiteral {
            literal: length.to_string(),
            offset
        })
    }

    fn read_length_u64(&mut self, offset: usize) -> Result<usize, PickleError> {
        let length = self.read_u64()?;
        usize::try_from(length).map_err(|_| PickleError::MalformedLiteral {
            literal: length.to_string(),
            offset
        })
    }

    fn read_line(&mut self) -> Result<&'a [u8], PickleError> {
        let input = self.input;
        let rest = &input[self.position..];
        let length = rest.iter()
            .position(|&b| b == b'\n')
            .ok_or(PickleError::UnexpectedEof { offset: self.input.len() })?;
        self.position += length + 1;
        Ok(&rest[..length])
    }

    fn read_utf8_line(&mut self, offset: usize) -> Result<String, PickleError> {
        let line = self.read_line()?;
        std::str::from_utf8(line)
            .map(|s| s.to_string())
            .map_err(|_| PickleError::Undecodable { encoding: "utf-8".to_string(), offset })
    }

    fn decode_str(&self, raw: &[u8], offset: usize) -> Result<Value, PickleError> {
        self.encoding.decode(raw)
            .map(Value::Text)
            .ok_or_else(|| PickleError::Undecodable { encoding: self.encoding.to_string(), offset })
    }

    fn push_utf8(&mut self, length: usize, offset: usize) -> Result<(), PickleError> {
        let raw = self.read_bytes(length)?;
        let text = std::str::from_utf8(raw)
            .map_err(|_| PickleError::Undecodable { encoding: "utf-8".to_string(), offset })?;
        self.stack.push(Value::text(text));
        Ok(())
    }

    fn push_bytes(&mut self, length: usize) -> Result<(), PickleError> {
        let raw = self.read_bytes(length)?;
        self.stack.push(Value::Bytes(Rc::from(raw)));
        Ok(())
    }

    fn pop(&mut self, offset: usize) -> Result<Value, PickleError> {
        self.stack.pop().ok_or(PickleError::StackUnderflow { offset })
    }

    fn peek(&self, offset: usize) -> Result<&Value, PickleError> {
        self.stack.last().ok_or(PickleError::StackUnderflow { offset })
    }

    fn pop_mark(&mut self, offset: usize) -> Result<Vec<Value>, PickleError> {
        let outer = self.metastack.pop().ok_or(PickleError::MissingMark { offset })?;
        Ok(std::mem::replace(&mut self.stack, outer))
    }

    fn push_memo(&mut self, index: u64, offset: usize) -> Result<(), PickleError> {
        let value = self.memo.get(&index)
            .cloned()
            .ok_or(PickleError::MissingMemo { index, offset })?;
        self.stack.push(value);
        Ok(())
    }

    fn store_memo(&mut self, index: u64, offset: usize) -> Result<(), PickleError> {
        let value = self.peek(offset)?.clone();
        self.memo.insert(index, value);
        Ok(())
    }

    fn extend_list(&mut self, items: Vec<Value>, offset: usize) -> Result<(), PickleError> {
        match self.peek(offset)? {
            Value::List(list) => {
                list.borrow_mut().extend(items);
                Ok(())
            }
            _ => Err(type_mismatch("list", offset))
        }
    }

    fn extend_dict(&mut self, pairs: Vec<(Value, Value)>, offset: usize) -> Result<(), PickleError> {
        match self.peek(offset)? {
            Value::Dict(dict) => {
                dict.borrow_mut().extend(pairs);
                Ok(())
            }
            _ => Err(type_mismatch("dict", offset))
        }
    }
}

fn reduce(callable: Value, args: Vec<Value>, offset: usize) -> Result<Value, PickleError> {
    let global = match &callable {
        Value::Global(global) => global.clone(),
        _ => return Ok(Value::new_object(Object { class: callable, args, state: None }))
    };
    let instantiates_first_arg = global.is("copyreg", "_reconstructor")
        || global.is("copyreg", "__newobj__")
        || (global.module.starts_with("numpy") && global.name == "_reconstruct");
    if instantiates_first_arg {
        let mut args = args.into_iter();
        let class = args.next().ok_or_else(|| type_mismatch("class argument", offset))?;
        // _reconstructor's remaining arguments describe the base type, not the instance
        let rest = if global.name == "_reconstructor" { Vec::new() } else { args.collect() };
        return Ok(Value::new_object(Object { class, args: rest, state: None }));
    }
    if global.is("collections", "OrderedDict") {
        let pairs = match args.first().and_then(|items| items.as_sequence()) {
            Some(items) => items.into_iter()
                .filter_map(|pair| pair.as_sequence())
                .filter(|pair| pair.len() == 2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect(),
            None => Vec::new()
        };
        return Ok(Value::new_dict(pairs));
    }
    if global.is("builtins", "set") || global.is("builtins", "frozenset") {
        let items = args.first().and_then(|items| items.as_sequence()).unwrap_or_default();
        return Ok(Value::Set(Rc::new(items.into())));
    }
    if global.is("builtins", "bytes") && args.is_empty() {
        return Ok(Value::Bytes(Rc::from(Vec::new())));
    }
    if global.is("_codecs", "encode") {
        // Python 3 writes bytes as _codecs.encode(text, 'latin1') below protocol 3
        if let Some(text) = args.first().and_then(|text| text.as_text()) {
            let raw = text.chars()
                .map(|c| u8::try_from(c as u32).ok())
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| PickleError::Undecodable { encoding: "latin1".to_string(), offset })?;
            return Ok(Value::Bytes(Rc::from(raw)));
        }
    }
    Ok(Value::new_object(Object { class: callable, args, state: None }))
}

fn build(target: &Value, state: Value, offset: usize) -> Result<(), PickleError> {
    match target {
        Value::Object(object) => {
            let mut object = object.borrow_mut();
            let merged = match (&object.state, &state) {
                (Some(Value::Dict(existing)), Value::Dict(update)) => {
                    let update = update.borrow().clone();
                    existing.borrow_mut().extend(update);
                    true
                }
                _ => false
            };
            if !merged {
                object.state = Some(state);
            }
            Ok(())
        }
        Value::Dict(existing) => match &state {
            Value::Dict(update) => {
                let update = update.borrow().clone();
                existing.borrow_mut().extend(update);
                Ok(())
            }
            _ => Err(type_mismatch("dict state", offset))
        },
        _ => Err(type_mismatch("object to build", offset))
    }
}

fn into_pairs(items: Vec<Value>, offset: usize) -> Result<Vec<(Value, Value)>, PickleError> {
    if items.len() % 2 != 0 {
        return Err(type_mismatch("key/value pairs", offset));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn parse_decimal(line: &[u8], offset: usize) -> Result<i64, PickleError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| malformed(line, offset))?
        .trim();
    match text.parse::<i64>() {
        Ok(value) => Ok(value),
        Err(_) => {
            let digits = text.strip_prefix('-').unwrap_or(text);
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                Err(PickleError::IntegerOverflow { offset })
            } else {
                Err(malformed(line, offset))
            }
        }
    }
}

/// Little-endian two's complement, as written by LONG1 / LONG4.
fn decode_long(raw: &[u8], offset: usize) -> Result<i64, PickleError> {
    if raw.len() > 8 {
        return Err(PickleError::IntegerOverflow { offset });
    }
    let negative = raw.last().is_some_and(|b| b & 0x80 != 0);
    let mut buffer = if negative { [0xffu8; 8] } else { [0u8; 8] };
    buffer[..raw.len()].copy_from_slice(raw);
    Ok(i64::from_le_bytes(buffer))
}

/// Strips the quotes of a `repr()`-style byte string and resolves its escapes.
fn unquote_string_literal(line: &[u8], offset: usize) -> Result<Vec<u8>, PickleError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let quoted = line.len() >= 2
        && (line[0] == b'\'' || line[0] == b'"')
        && line[line.len() - 1] == line[0];
    if !quoted {
        return Err(malformed(line, offset));
    }
    let body = &line[1..line.len() - 1];
    let mut output = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let byte = body[i];
        i += 1;
        if byte != b'\\' || i == body.len() {
            output.push(byte);
            continue;
        }
        let escape = body[i];
        i += 1;
        match escape {
            b'n' => output.push(b'\n'),
            b't' => output.push(b'\t'),
            b'r' => output.push(b'\r'),
            b'a' => output.push(0x07),
            b'b' => output.push(0x08),
            b'f' => output.push(0x0c),
            b'v' => output.push(0x0b),
            b'\\' | b'\'' | b'"' => output.push(escape),
            b'\n' => {}
            b'x' => {
                let hex = body.get(i..i + 2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| malformed(line, offset))?;
                output.push(hex);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut value = (escape - b'0') as u32;
                let mut consumed = 0;
                while consumed < 2 && i < body.len() && (b'0'..=b'7').contains(&body[i]) {
                    value = value * 8 + (body[i] - b'0') as u32;
                    i += 1;
                    consumed += 1;
                }
                output.push((value & 0xff) as u8);
            }
            other => {
                output.push(b'\\');
                output.push(other);
            }
        }
    }
    Ok(output)
}

/// Python's `raw-unicode-escape`: only `\uXXXX` and `\UXXXXXXXX` are escapes.
fn decode_raw_unicode_escape(line: &[u8], offset: usize) -> Result<String, PickleError> {
    let mut output = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let byte = line[i];
        let width = match (byte, line.get(i + 1)) {
            (b'\\', Some(b'u')) => 4,
            (b'\\', Some(b'U')) => 8,
            _ => 0
        };
        if width == 0 {
            output.push(byte as char);
            i += 1;
            continue;
        }
        let c = line.get(i + 2..i + 2 + width)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .and_then(char::from_u32)
            .ok_or_else(|| malformed(line, offset))?;
        output.push(c);
        i += 2 + width;
    }
    Ok(output)
}

fn malformed(line: &[u8], offset: usize) -> PickleError {
    PickleError::MalformedLiteral { literal: String::from_utf8_lossy(line).into_owned(), offset }
}

fn type_mismatch(expected: &str, offset: usize) -> PickleError {
    PickleError::TypeMismatch { expected: expected.to_string(), offset }
}

fn unsupported(name: &str, offset: usize) -> PickleError {
    PickleError::UnsupportedOpcode { name: name.to_string(), offset }
}
