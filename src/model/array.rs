use std::borrow::Cow;
use itertools::Itertools;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use num_traits::FromBytes;
use crate::errors::ModelError;
use crate::pickle::{Object, Value};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ElementType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big
}

/// A plain n-dimensional array with every element stored.
#[derive(Debug, Clone, PartialEq)]
pub enum DenseArray {
    Bool(ArrayD<bool>),
    I8(ArrayD<i8>),
    U8(ArrayD<u8>),
    I16(ArrayD<i16>),
    U16(ArrayD<u16>),
    I32(ArrayD<i32>),
    U32(ArrayD<u32>),
    I64(ArrayD<i64>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>)
}

/// Runs `$body` with `$inner` bound to the typed array inside a [`DenseArray`].
macro_rules! for_each_array {
    ($array:expr, $inner:ident => $body:expr) => {
        match $array {
            DenseArray::Bool($inner) => $body,
            DenseArray::I8($inner) => $body,
            DenseArray::U8($inner) => $body,
            DenseArray::I16($inner) => $body,
            DenseArray::U16($inner) => $body,
            DenseArray::I32($inner) => $body,
            DenseArray::U32($inner) => $body,
            DenseArray::I64($inner) => $body,
            DenseArray::U64($inner) => $body,
            DenseArray::F32($inner) => $body,
            DenseArray::F64($inner) => $body,
        }
    };
}

/// Like [`for_each_array`], wrapping the result back into the same variant.
macro_rules! map_array {
    ($array:expr, $inner:ident => $body:expr) => {
        match $array {
            DenseArray::Bool($inner) => DenseArray::Bool($body),
            DenseArray::I8($inner) => DenseArray::I8($body),
            DenseArray::U8($inner) => DenseArray::U8($body),
            DenseArray::I16($inner) => DenseArray::I16($body),
            DenseArray::U16($inner) => DenseArray::U16($body),
            DenseArray::I32($inner) => DenseArray::I32($body),
            DenseArray::U32($inner) => DenseArray::U32($body),
            DenseArray::I64($inner) => DenseArray::I64($body),
            DenseArray::U64($inner) => DenseArray::U64($body),
            DenseArray::F32($inner) => DenseArray::F32($body),
            DenseArray::F64($inner) => DenseArray::F64($body),
        }
    };
}

pub(crate) use for_each_array;
pub(crate) use map_array;

pub trait Element: Copy + Default + 'static {
    fn accumulate(&mut self, other: Self);
}

macro_rules! impl_element {
    ($($t:ty),* => |$lhs:ident, $rhs:ident| $body:expr) => {
        $(
            impl Element for $t {
                fn accumulate(&mut self, other: Self) {
                    let ($lhs, $rhs) = (*self, other);
                    *self = $body;
                }
            }
        )*
    };
}

// Integer sums wrap like numpy's
impl_element!(i8, u8, i16, u16, i32, u32, i64, u64 => |a, b| a.wrapping_add(b));
impl_element!(f32, f64 => |a, b| a + b);

impl Element for bool {
    fn accumulate(&mut self, other: Self) {
        *self |= other;
    }
}

macro_rules! impl_from_array {
    ($($variant:ident => $t:ty),*) => {
        $(
            impl From<ArrayD<$t>> for DenseArray {
                fn from(array: ArrayD<$t>) -> Self {
                    DenseArray::$variant(array)
                }
            }
        )*
    };
}

impl_from_array!(Bool => bool, I8 => i8, U8 => u8, I16 => i16, U16 => u16, I32 => i32,
    U32 => u32, I64 => i64, U64 => u64, F32 => f32, F64 => f64);

impl ElementType {
    /// Parses a numpy type descriptor such as `f8`, `<i4` or `?`.
    /// Returns the byte order embedded in the descriptor, if any.
    pub fn from_descr(descr: &str) -> Result<(Self, Option<ByteOrder>), ModelError> {
        let (order, code) = match descr.chars().next() {
            Some(marker @ ('<' | '>' | '|' | '=')) => (ByteOrder::from_marker(marker), &descr[1..]),
            _ => (None, descr)
        };
        let element = match code {
            "?" | "b1" | "bool" => ElementType::Bool,
            "i1" | "b" | "int8" => ElementType::I8,
            "u1" | "B" | "uint8" => ElementType::U8,
            "i2" | "h" | "int16" => ElementType::I16,
            "u2" | "H" | "uint16" => ElementType::U16,
            "i4" | "i" | "int32" => ElementType::I32,
            "u4" | "I" | "uint32" => ElementType::U32,
            "i8" | "q" | "l" | "int64" => ElementType::I64,
            "u8" | "Q" | "L" | "uint64" => ElementType::U64,
            "f4" | "f" | "float32" => ElementType::F32,
            "f8" | "d" | "float64" => ElementType::F64,
            _ => return Err(ModelError::UnsupportedDtype { descr: descr.to_string() })
        };
        Ok((element, order))
    }

    pub fn size(&self) -> usize {
        match self {
            ElementType::Bool | ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8
        }
    }

    pub fn descr(&self) -> &'static str {
        match self {
            ElementType::Bool => "b1",
            ElementType::I8 => "i1",
            ElementType::U8 => "u1",
            ElementType::I16 => "i2",
            ElementType::U16 => "u2",
            ElementType::I32 => "i4",
            ElementType::U32 => "u4",
            ElementType::I64 => "i8",
            ElementType::U64 => "u8",
            ElementType::F32 => "f4",
            ElementType::F64 => "f8"
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float() && *self != ElementType::Bool
    }
}

impl ByteOrder {
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            '<' => Some(ByteOrder::Little),
            '>' => Some(ByteOrder::Big),
            '=' if cfg!(target_endian = "big") => Some(ByteOrder::Big),
            '=' => Some(ByteOrder::Little),
            _ => None
        }
    }
}

impl DenseArray {
    pub fn shape(&self) -> &[usize] {
        for_each_array!(self, array => array.shape())
    }

    pub fn len(&self) -> usize {
        for_each_array!(self, array => array.len())
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            DenseArray::Bool(_) => ElementType::Bool,
            DenseArray::I8(_) => ElementType::I8,
            DenseArray::U8(_) => ElementType::U8,
            DenseArray::I16(_) => ElementType::I16,
            DenseArray::U16(_) => ElementType::U16,
            DenseArray::I32(_) => ElementType::I32,
            DenseArray::U32(_) => ElementType::U32,
            DenseArray::I64(_) => ElementType::I64,
            DenseArray::U64(_) => ElementType::U64,
            DenseArray::F32(_) => ElementType::F32,
            DenseArray::F64(_) => ElementType::F64
        }
    }

    /// Short `dtype shape` description, e.g. `f8 6890x3`.
    pub fn describe(&self) -> String {
        format!("{} {}", self.element_type().descr(), format_shape(self.shape()))
    }

    pub fn decode(element: ElementType,
                  order: ByteOrder,
                  shape: &[usize],
                  fortran: bool,
                  raw: &[u8]) -> Result<Self, ModelError> {
        let expected = shape.iter()
            .try_fold(element.size(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| ModelError::MalformedArray {
                reason: format!("shape {} overflows", format_shape(shape))
            })?;
        if raw.len() != expected {
            return Err(ModelError::MalformedArray {
                reason: format!(
                    "{} {} needs {} bytes, buffer holds {}",
                    element.descr(), format_shape(shape), expected, raw.len()
                )
            });
        }
        let array = match element {
            ElementType::Bool => DenseArray::Bool(
                shaped(shape, fortran, raw.iter().map(|&b| b != 0).collect())?
            ),
            ElementType::I8 => DenseArray::I8(shaped(shape, fortran, decode_elements(raw, order)?)?),
            ElementType::U8 => DenseArray::U8(shaped(shape, fortran, raw.to_vec())?),
            ElementType::I16 => DenseArray::I16(shaped(shape, fortran, decode_elements(raw, order)?)?),
            ElementType::U16 => DenseArray::U16(shaped(shape, fortran, decode_elements(raw, order)?)?),
            ElementType::I32 => DenseArray::I32(shaped(shape, fortran, decode_elements(raw, order)?)?),
            ElementType::U32 => DenseArray::U32(shaped(shape, fortran, decode_elements(raw, order)?)?),
            ElementType::I64 => DenseArray::I64(shaped(shape, fortran, decode_elements(raw, order)?)?),
            ElementType::U64 => DenseArray::U64(shaped(shape, fortran, decode_elements(raw, order)?)?),
            ElementType::F32 => DenseArray::F32(shaped(shape, fortran, decode_elements(raw, order)?)?),
            ElementType::F64 => DenseArray::F64(shaped(shape, fortran, decode_elements(raw, order)?)?)
        };
        Ok(array)
    }

    /// Reads a pickled `numpy.ndarray` (or subclass) from its `__setstate__` tuple.
    pub fn from_ndarray(object: &Object) -> Result<Self, ModelError> {
        let class = object.class_name();
        let state = object.state.as_ref()
            .and_then(|state| state.as_sequence())
            .ok_or_else(|| ModelError::MissingAttribute {
                class: class.clone(),
                attribute: "__setstate__".to_string()
            })?;
        // (version, shape, dtype, is_fortran, raw); very old pickles omit the version
        let fields = match state.len() {
            5 => &state[1..],
            4 => &state[..],
            n => return Err(ModelError::MalformedArray {
                reason: format!("{class} state has {n} elements")
            })
        };
        let shape = fields[0].as_sequence()
            .ok_or_else(|| ModelError::MalformedArray { reason: "shape is not a tuple".to_string() })?
            .iter()
            .map(|dimension| dimension.as_int().and_then(|d| usize::try_from(d).ok()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ModelError::MalformedArray { reason: "shape must hold sizes".to_string() })?;
        let (element, order) = parse_dtype(&fields[1])?;
        let fortran = fields[2].as_int()
            .map(|flag| flag != 0)
            .ok_or_else(|| ModelError::MalformedArray { reason: "fortran flag is not a bool".to_string() })?;
        let raw = raw_buffer(&fields[3])?;
        DenseArray::decode(element, order, &shape, fortran, &raw)
    }

    /// Reads a pickled numpy scalar, `numpy.core.multiarray.scalar(dtype, raw)`, as a 0-d array.
    pub fn from_numpy_scalar(object: &Object) -> Result<Self, ModelError> {
        if object.args.len() < 2 {
            return Err(ModelError::MalformedArray {
                reason: format!("numpy scalar takes 2 arguments, found {}", object.args.len())
            });
        }
        let (element, order) = parse_dtype(&object.args[0])?;
        let raw = raw_buffer(&object.args[1])?;
        DenseArray::decode(element, order, &[], false, &raw)
    }

    pub fn to_indices(&self) -> Result<Vec<usize>, ModelError> {
        macro_rules! indices {
            ($array:expr) => {
                $array.iter()
                    .map(|&v| usize::try_from(v).map_err(|_| ModelError::MalformedArray {
                        reason: format!("{v} is not a valid index")
                    }))
                    .collect()
            };
        }
        match self {
            DenseArray::I8(array) => indices!(array),
            DenseArray::U8(array) => indices!(array),
            DenseArray::I16(array) => indices!(array),
            DenseArray::U16(array) => indices!(array),
            DenseArray::I32(array) => indices!(array),
            DenseArray::U32(array) => indices!(array),
            DenseArray::I64(array) => indices!(array),
            DenseArray::U64(array) => indices!(array),
            other => Err(ModelError::MalformedArray {
                reason: format!("index arrays must be integral, found {}", other.element_type().descr())
            })
        }
    }
}

pub fn is_numpy_array(object: &Object) -> bool {
    object.class_global()
        .is_some_and(|class| class.module.starts_with("numpy")
            && matches!(class.name.as_str(), "ndarray" | "matrix" | "memmap"))
}

pub fn is_numpy_scalar(object: &Object) -> bool {
    object.class_global()
        .is_some_and(|class| class.module.starts_with("numpy") && class.name == "scalar")
}

pub fn format_shape(shape: &[usize]) -> String {
    if shape.is_empty() {
        "scalar".to_string()
    } else {
        shape.iter().join("x")
    }
}

fn shaped<T>(shape: &[usize], fortran: bool, data: Vec<T>) -> Result<ArrayD<T>, ModelError> {
    let dimension = IxDyn(shape);
    let array = if fortran {
        ArrayD::from_shape_vec(dimension.f(), data)
    } else {
        ArrayD::from_shape_vec(dimension, data)
    };
    array.map_err(|e| ModelError::MalformedArray { reason: e.to_string() })
}

fn decode_elements<T>(raw: &[u8], order: ByteOrder) -> Result<Vec<T>, ModelError>
where
    T: FromBytes,
    T::Bytes: Sized + for<'b> TryFrom<&'b [u8]>,
{
    raw.chunks_exact(std::mem::size_of::<T>())
        .map(|chunk| {
            let bytes = <T::Bytes>::try_from(chunk).ok()?;
            Some(match order {
                ByteOrder::Little => T::from_le_bytes(&bytes),
                ByteOrder::Big => T::from_be_bytes(&bytes)
            })
        })
        .collect::<Option<Vec<T>>>()
        .ok_or_else(|| ModelError::MalformedArray { reason: "truncated element".to_string() })
}

fn parse_dtype(value: &Value) -> Result<(ElementType, ByteOrder), ModelError> {
    let Value::Object(dtype) = value else {
        return Err(ModelError::MalformedArray { reason: format!("expected a dtype, found {}", value.type_name()) });
    };
    let dtype = dtype.borrow();
    let descr = dtype.args.first()
        .and_then(|descr| descr.as_text())
        .ok_or_else(|| ModelError::MissingAttribute {
            class: dtype.class_name(),
            attribute: "descr".to_string()
        })?;
    let (element, embedded) = ElementType::from_descr(descr)?;
    // (version, byteorder, subarray, names, fields, elsize, alignment, flags)
    let stated = dtype.state.as_ref()
        .and_then(|state| state.as_sequence())
        .and_then(|state| state.get(1).and_then(|order| order.as_text().map(str::to_string)))
        .and_then(|order| order.chars().next())
        .and_then(ByteOrder::from_marker);
    let order = stated.or(embedded).unwrap_or(ByteOrder::Little);
    Ok((element, order))
}

fn raw_buffer(value: &Value) -> Result<Cow<'_, [u8]>, ModelError> {
    match value {
        Value::Bytes(raw) => Ok(Cow::Borrowed(&raw[..])),
        Value::Text(text) => text.chars()
            .map(|c| u8::try_from(c as u32).ok())
            .collect::<Option<Vec<u8>>>()
            .map(Cow::Owned)
            .ok_or_else(|| ModelError::MalformedArray {
                reason: "array buffer holds characters outside latin1".to_string()
            }),
        Value::List(_) => Err(ModelError::UnsupportedDtype { descr: "O".to_string() }),
        other => Err(ModelError::MalformedArray {
            reason: format!("array buffer is a {}", other.type_name())
        })
    }
}
