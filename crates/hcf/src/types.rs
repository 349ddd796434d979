//! Element types and in-memory arrays.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use hcf_format::datatype::Datatype;
use hcf_format::FormatError;

use crate::error::{Error, Result};

/// Element type of a dataset or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    /// Fixed-width byte string, NUL padded.
    FixedString(u32),
    /// UTF-8 string of any length.
    VarString,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::I8 => write!(f, "i8"),
            DType::I16 => write!(f, "i16"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
            DType::U8 => write!(f, "u8"),
            DType::U16 => write!(f, "u16"),
            DType::U32 => write!(f, "u32"),
            DType::U64 => write!(f, "u64"),
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::Bool => write!(f, "bool"),
            DType::FixedString(w) => write!(f, "string[{w}]"),
            DType::VarString => write!(f, "vlen_string"),
        }
    }
}

impl DType {
    /// Encoded size of one element, `None` for variable-length strings.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            DType::I8 | DType::U8 | DType::Bool => Some(1),
            DType::I16 | DType::U16 => Some(2),
            DType::I32 | DType::U32 | DType::F32 => Some(4),
            DType::I64 | DType::U64 | DType::F64 => Some(8),
            DType::FixedString(w) => Some(*w as usize),
            DType::VarString => None,
        }
    }

    /// Byte width the shuffle filter should use, if shuffling helps.
    pub(crate) fn shuffle_width(&self) -> Option<u32> {
        match self {
            DType::I16 | DType::U16 => Some(2),
            DType::I32 | DType::U32 | DType::F32 => Some(4),
            DType::I64 | DType::U64 | DType::F64 => Some(8),
            _ => None,
        }
    }

    pub(crate) fn from_datatype(dt: &Datatype) -> Result<DType> {
        Ok(match *dt {
            Datatype::FixedPoint { size: 1, signed: true } => DType::I8,
            Datatype::FixedPoint { size: 2, signed: true } => DType::I16,
            Datatype::FixedPoint { size: 4, signed: true } => DType::I32,
            Datatype::FixedPoint { size: 8, signed: true } => DType::I64,
            Datatype::FixedPoint { size: 1, signed: false } => DType::U8,
            Datatype::FixedPoint { size: 2, signed: false } => DType::U16,
            Datatype::FixedPoint { size: 4, signed: false } => DType::U32,
            Datatype::FixedPoint { size: 8, signed: false } => DType::U64,
            Datatype::FloatingPoint { size: 4 } => DType::F32,
            Datatype::FloatingPoint { size: 8 } => DType::F64,
            Datatype::Boolean => DType::Bool,
            Datatype::String { size } if size > 0 => DType::FixedString(size),
            Datatype::VariableString => DType::VarString,
            Datatype::Reference { .. } => {
                return Err(Error::UnsupportedType("object reference".into()))
            }
            other => return Err(Error::UnsupportedType(format!("{other:?}"))),
        })
    }

    pub(crate) fn to_datatype(self) -> Datatype {
        match self {
            DType::I8 => Datatype::FixedPoint { size: 1, signed: true },
            DType::I16 => Datatype::FixedPoint { size: 2, signed: true },
            DType::I32 => Datatype::FixedPoint { size: 4, signed: true },
            DType::I64 => Datatype::FixedPoint { size: 8, signed: true },
            DType::U8 => Datatype::FixedPoint { size: 1, signed: false },
            DType::U16 => Datatype::FixedPoint { size: 2, signed: false },
            DType::U32 => Datatype::FixedPoint { size: 4, signed: false },
            DType::U64 => Datatype::FixedPoint { size: 8, signed: false },
            DType::F32 => Datatype::FloatingPoint { size: 4 },
            DType::F64 => Datatype::FloatingPoint { size: 8 },
            DType::Bool => Datatype::Boolean,
            DType::FixedString(size) => Datatype::String { size },
            DType::VarString => Datatype::VariableString,
        }
    }
}

/// Flat element storage, row-major.
///
/// Equality is bitwise for floats: `NaN == NaN` when the payloads match and
/// `0.0 != -0.0`.
#[derive(Debug, Clone)]
pub enum ArrayData {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    /// `bytes.len()` is a multiple of `width`.
    FixedString { width: u32, bytes: Vec<u8> },
    VarString(Vec<String>),
}

macro_rules! typed_access {
    ($($variant:ident, $ty:ty, $as_fn:ident);* $(;)?) => {
        impl ArrayData {
            $(
                pub fn $as_fn(&self) -> Option<&[$ty]> {
                    match self {
                        ArrayData::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            )*
        }

        $(
            impl From<Vec<$ty>> for ArrayData {
                fn from(v: Vec<$ty>) -> Self {
                    ArrayData::$variant(v)
                }
            }
        )*
    };
}

typed_access! {
    I8, i8, as_i8;
    I16, i16, as_i16;
    I32, i32, as_i32;
    I64, i64, as_i64;
    U8, u8, as_u8;
    U16, u16, as_u16;
    U32, u32, as_u32;
    U64, u64, as_u64;
    F32, f32, as_f32;
    F64, f64, as_f64;
    Bool, bool, as_bool;
    VarString, String, as_strings;
}

fn pack<T>(vals: &[T], size: usize, write: fn(&[T], &mut [u8])) -> Vec<u8> {
    let mut out = vec![0u8; vals.len() * size];
    write(vals, &mut out);
    out
}

fn unpack<T: Default + Clone>(raw: &[u8], count: usize, read: fn(&[u8], &mut [T])) -> Vec<T> {
    let mut out = vec![T::default(); count];
    read(raw, &mut out);
    out
}

impl ArrayData {
    /// Fixed-width strings from `values`, NUL padded to `width`.
    pub fn fixed_strings(width: u32, values: &[&str]) -> Result<Self> {
        if width == 0 {
            return Err(Error::UnsupportedType("zero-width string".into()));
        }
        let w = width as usize;
        let mut bytes = Vec::with_capacity(values.len() * w);
        for v in values {
            if v.len() > w {
                return Err(Error::UnsupportedType(format!(
                    "string {v:?} does not fit width {width}"
                )));
            }
            bytes.extend_from_slice(v.as_bytes());
            bytes.resize(bytes.len() + w - v.len(), 0);
        }
        Ok(ArrayData::FixedString { width, bytes })
    }

    /// Element type of the stored values.
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::I8(_) => DType::I8,
            ArrayData::I16(_) => DType::I16,
            ArrayData::I32(_) => DType::I32,
            ArrayData::I64(_) => DType::I64,
            ArrayData::U8(_) => DType::U8,
            ArrayData::U16(_) => DType::U16,
            ArrayData::U32(_) => DType::U32,
            ArrayData::U64(_) => DType::U64,
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::FixedString { width, .. } => DType::FixedString(*width),
            ArrayData::VarString(_) => DType::VarString,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::I8(v) => v.len(),
            ArrayData::I16(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::U8(v) => v.len(),
            ArrayData::U16(v) => v.len(),
            ArrayData::U32(v) => v.len(),
            ArrayData::U64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::Bool(v) => v.len(),
            ArrayData::FixedString { width, bytes } => {
                if *width == 0 {
                    0
                } else {
                    bytes.len() / *width as usize
                }
            }
            ArrayData::VarString(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed-width string elements as raw byte slices.
    pub fn fixed_string_elements(&self) -> Option<Vec<&[u8]>> {
        match self {
            ArrayData::FixedString { width, bytes } if *width > 0 => {
                Some(bytes.chunks(*width as usize).collect())
            }
            _ => None,
        }
    }

    /// Size of the encoded element stream in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            ArrayData::VarString(v) => v.iter().map(|s| 4 + s.len()).sum(),
            ArrayData::FixedString { bytes, .. } => bytes.len(),
            other => other.len() * other.dtype().element_size().unwrap_or(0),
        }
    }

    /// Encode every element.
    pub fn encode(&self) -> Vec<u8> {
        self.encode_range(0, self.len())
    }

    /// Encode `count` elements starting at `start`.
    ///
    /// Panics if the range is out of bounds; callers derive ranges from
    /// `len()`.
    pub fn encode_range(&self, start: usize, count: usize) -> Vec<u8> {
        let end = start + count;
        match self {
            ArrayData::I8(v) => v[start..end].iter().map(|&x| x as u8).collect(),
            ArrayData::U8(v) => v[start..end].to_vec(),
            ArrayData::I16(v) => pack(&v[start..end], 2, LittleEndian::write_i16_into),
            ArrayData::U16(v) => pack(&v[start..end], 2, LittleEndian::write_u16_into),
            ArrayData::I32(v) => pack(&v[start..end], 4, LittleEndian::write_i32_into),
            ArrayData::U32(v) => pack(&v[start..end], 4, LittleEndian::write_u32_into),
            ArrayData::I64(v) => pack(&v[start..end], 8, LittleEndian::write_i64_into),
            ArrayData::U64(v) => pack(&v[start..end], 8, LittleEndian::write_u64_into),
            ArrayData::F32(v) => pack(&v[start..end], 4, LittleEndian::write_f32_into),
            ArrayData::F64(v) => pack(&v[start..end], 8, LittleEndian::write_f64_into),
            ArrayData::Bool(v) => v[start..end].iter().map(|&b| b as u8).collect(),
            ArrayData::FixedString { width, bytes } => {
                let w = *width as usize;
                bytes[start * w..end * w].to_vec()
            }
            ArrayData::VarString(v) => {
                let slice = &v[start..end];
                let mut out = Vec::with_capacity(slice.iter().map(|s| 4 + s.len()).sum());
                for s in slice {
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                out
            }
        }
    }

    /// Decode `count` elements of `dtype` from `raw`, which must hold
    /// exactly that many.
    pub fn decode(dtype: DType, raw: &[u8], count: usize) -> Result<Self> {
        if let Some(size) = dtype.element_size() {
            if count.checked_mul(size) != Some(raw.len()) {
                return Err(invalid(format!(
                    "{} bytes cannot hold {count} elements of {dtype}",
                    raw.len()
                )));
            }
        }
        Ok(match dtype {
            DType::I8 => ArrayData::I8(raw.iter().map(|&b| b as i8).collect()),
            DType::U8 => ArrayData::U8(raw.to_vec()),
            DType::I16 => ArrayData::I16(unpack(raw, count, LittleEndian::read_i16_into)),
            DType::U16 => ArrayData::U16(unpack(raw, count, LittleEndian::read_u16_into)),
            DType::I32 => ArrayData::I32(unpack(raw, count, LittleEndian::read_i32_into)),
            DType::U32 => ArrayData::U32(unpack(raw, count, LittleEndian::read_u32_into)),
            DType::I64 => ArrayData::I64(unpack(raw, count, LittleEndian::read_i64_into)),
            DType::U64 => ArrayData::U64(unpack(raw, count, LittleEndian::read_u64_into)),
            DType::F32 => ArrayData::F32(unpack(raw, count, LittleEndian::read_f32_into)),
            DType::F64 => ArrayData::F64(unpack(raw, count, LittleEndian::read_f64_into)),
            DType::Bool => {
                let mut out = Vec::with_capacity(count);
                for &b in raw {
                    match b {
                        0 => out.push(false),
                        1 => out.push(true),
                        other => return Err(invalid(format!("boolean byte {other}"))),
                    }
                }
                ArrayData::Bool(out)
            }
            DType::FixedString(width) => ArrayData::FixedString {
                width,
                bytes: raw.to_vec(),
            },
            DType::VarString => ArrayData::VarString(decode_var_strings(raw, count)?),
        })
    }
}

fn invalid(msg: String) -> Error {
    Error::Format(FormatError::InvalidData(msg))
}

fn decode_var_strings(raw: &[u8], count: usize) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(count.min(raw.len() / 4));
    let mut pos = 0usize;
    for i in 0..count {
        let len_bytes = raw
            .get(pos..pos + 4)
            .ok_or_else(|| invalid(format!("string {i} of {count} truncated")))?;
        let len = LittleEndian::read_u32(len_bytes) as usize;
        pos += 4;
        let bytes = raw
            .get(pos..pos + len)
            .ok_or_else(|| invalid(format!("string {i} of {count} truncated")))?;
        let s = std::str::from_utf8(bytes).map_err(|_| invalid(format!("string {i} is not UTF-8")))?;
        out.push(s.to_string());
        pos += len;
    }
    if pos != raw.len() {
        return Err(invalid(format!(
            "{} trailing bytes after {count} strings",
            raw.len() - pos
        )));
    }
    Ok(out)
}

fn bits_eq_f32(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

fn bits_eq_f64(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

impl PartialEq for ArrayData {
    fn eq(&self, other: &Self) -> bool {
        use ArrayData::*;
        match (self, other) {
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F32(a), F32(b)) => bits_eq_f32(a, b),
            (F64(a), F64(b)) => bits_eq_f64(a, b),
            (Bool(a), Bool(b)) => a == b,
            (
                FixedString { width: wa, bytes: a },
                FixedString { width: wb, bytes: b },
            ) => wa == wb && a == b,
            (VarString(a), VarString(b)) => a == b,
            _ => false,
        }
    }
}

/// Number of elements described by `shape`, `None` on overflow.
pub fn element_count(shape: &[u64]) -> Option<u64> {
    shape.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
}

/// A shaped array. An empty shape is a scalar holding one element.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<u64>,
    data: ArrayData,
}

impl Array {
    /// Pair `data` with `shape`; the element counts must agree.
    pub fn new(shape: Vec<u64>, data: ArrayData) -> Result<Self> {
        let expected = element_count(&shape).ok_or_else(|| Error::ShapeMismatch {
            shape: shape.clone(),
            expected: u64::MAX,
            actual: data.len() as u64,
        })?;
        if expected != data.len() as u64 {
            return Err(Error::ShapeMismatch {
                shape,
                expected,
                actual: data.len() as u64,
            });
        }
        Ok(Self { shape, data })
    }

    /// A rank-0 array; `data` must hold exactly one element.
    pub fn scalar(data: impl Into<ArrayData>) -> Result<Self> {
        Self::new(Vec::new(), data.into())
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }
}

impl<T> From<Vec<T>> for Array
where
    ArrayData: From<Vec<T>>,
{
    /// A one-dimensional array.
    fn from(v: Vec<T>) -> Self {
        let data = ArrayData::from(v);
        Self {
            shape: vec![data.len() as u64],
            data,
        }
    }
}

/// A named value attached to a group or dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Array,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: Array) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
