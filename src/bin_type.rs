use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::qpl::{ArchInfo, FileError};
use crate::token::TokenKind;

/// A value to be encoded into a section, produced by parsing a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, thiserror::Error)]
#[error("invalid {ty} literal {text:?}")]
pub struct LiteralError {
    pub ty: BinType,
    pub text: String,
}

/// The closed set of value types the bytecode knows about.
///
/// The discriminant is the stable on-wire type index. `ptr`, `rptr`,
/// `int` and `float` are one target word wide; `local` and `arg` are
/// one-byte slot indices.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum BinType {
    Void = 1,
    Bool = 2,
    Ptr = 3,
    Rptr = 4,
    Int = 5,
    Int8 = 6,
    Int16 = 7,
    Int32 = 8,
    Int64 = 9,
    Float = 10,
    Float32 = 11,
    Float64 = 12,
    Str = 13,
    Raw = 14,
    Local = 15,
    Arg = 16,
}

impl BinType {
    pub const ALL: [BinType; 16] = [
        BinType::Void,
        BinType::Bool,
        BinType::Ptr,
        BinType::Rptr,
        BinType::Int,
        BinType::Int8,
        BinType::Int16,
        BinType::Int32,
        BinType::Int64,
        BinType::Float,
        BinType::Float32,
        BinType::Float64,
        BinType::Str,
        BinType::Raw,
        BinType::Local,
        BinType::Arg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinType::Void => "void",
            BinType::Bool => "bool",
            BinType::Ptr => "ptr",
            BinType::Rptr => "rptr",
            BinType::Int => "int",
            BinType::Int8 => "int8",
            BinType::Int16 => "int16",
            BinType::Int32 => "int32",
            BinType::Int64 => "int64",
            BinType::Float => "float",
            BinType::Float32 => "float32",
            BinType::Float64 => "float64",
            BinType::Str => "str",
            BinType::Raw => "raw",
            BinType::Local => "local",
            BinType::Arg => "arg",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn index(self) -> u8 {
        self.into()
    }

    pub fn from_index(index: u8) -> Result<Self, FileError> {
        Self::try_from(index).map_err(|_| FileError::InvalidTypeIndex { index })
    }

    /// On-wire size in bytes. `str` and `raw` report a pointer width; the
    /// bytes actually emitted for their values are the value bytes.
    pub fn size(self, arch: ArchInfo) -> usize {
        match self {
            BinType::Void => 0,
            BinType::Bool => 1,
            BinType::Ptr | BinType::Rptr => arch.word_size(),
            BinType::Int | BinType::Float => arch.word_size(),
            BinType::Int8 => 1,
            BinType::Int16 => 2,
            BinType::Int32 => 4,
            BinType::Int64 => 8,
            BinType::Float32 => 4,
            BinType::Float64 => 8,
            BinType::Str | BinType::Raw => arch.word_size(),
            BinType::Local | BinType::Arg => 1,
        }
    }

    /// The fallback binary type of a bare literal token.
    pub fn from_literal_kind(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::IntLit | TokenKind::HexLit => Some(BinType::Int),
            TokenKind::FloatLit => Some(BinType::Float),
            TokenKind::StringLit => Some(BinType::Str),
            TokenKind::BoolLit => Some(BinType::Bool),
            TokenKind::CharLit => Some(BinType::Int8),
            TokenKind::NullLit => Some(BinType::Ptr),
            TokenKind::BytesLit => Some(BinType::Raw),
            _ => None,
        }
    }

    pub fn parse(self, text: &str) -> Result<Value, LiteralError> {
        let err = || LiteralError {
            ty: self,
            text: text.to_owned(),
        };
        match self {
            BinType::Void => Ok(Value::Void),
            BinType::Bool => match text {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(err()),
            },
            BinType::Ptr
            | BinType::Rptr
            | BinType::Int
            | BinType::Int8
            | BinType::Int16
            | BinType::Int32
            | BinType::Int64
            | BinType::Local
            | BinType::Arg => text.parse::<i64>().map(Value::Int).map_err(|_| err()),
            BinType::Float | BinType::Float32 | BinType::Float64 => {
                text.parse::<f64>().map(Value::Float).map_err(|_| err())
            }
            BinType::Str => Ok(Value::Str(text.to_owned())),
            BinType::Raw => Ok(Value::Bytes(text.bytes().collect())),
        }
    }

    /// The value a declared-but-uninitialized slot of this type holds.
    pub fn default_value(self) -> Value {
        match self {
            BinType::Void => Value::Void,
            BinType::Bool => Value::Bool(false),
            BinType::Float | BinType::Float32 | BinType::Float64 => Value::Float(0.0),
            BinType::Str => Value::Str(String::new()),
            BinType::Raw => Value::Bytes(Vec::new()),
            _ => Value::Int(0),
        }
    }

    pub fn value_to_bytes(self, value: &Value, arch: ArchInfo) -> Result<Vec<u8>, LiteralError> {
        let err = || LiteralError {
            ty: self,
            text: format!("{value:?}"),
        };
        match (self, value) {
            (BinType::Void, _) => Ok(Vec::new()),
            (BinType::Bool, Value::Bool(b)) => Ok(vec![u8::from(*b)]),
            (BinType::Bool, Value::Int(v)) => Ok(vec![u8::from(*v != 0)]),
            (
                BinType::Ptr
                | BinType::Rptr
                | BinType::Int
                | BinType::Int8
                | BinType::Int16
                | BinType::Int32
                | BinType::Int64
                | BinType::Local
                | BinType::Arg,
                Value::Int(v),
            ) => Ok(int_bytes(*v, self.size(arch), arch.is_big_endian())),
            (BinType::Float, Value::Float(v)) => match arch.word_size() {
                4 => Ok(float_bytes_32(*v as f32, arch)),
                8 => Ok(float_bytes_64(*v, arch)),
                _ => Err(err()),
            },
            (BinType::Float32, Value::Float(v)) => Ok(float_bytes_32(*v as f32, arch)),
            (BinType::Float64, Value::Float(v)) => Ok(float_bytes_64(*v, arch)),
            (BinType::Str, Value::Str(s)) => Ok(s.bytes().collect()),
            (BinType::Raw, Value::Bytes(b)) => Ok(b.clone()),
            (BinType::Raw, Value::Str(s)) => Ok(s.bytes().collect()),
            _ => Err(err()),
        }
    }
}

impl std::fmt::Display for BinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn int_bytes(value: i64, size: usize, big_endian: bool) -> Vec<u8> {
    let le = value.to_le_bytes();
    let mut bytes = le[..size.min(le.len())].to_vec();
    if bytes.len() < size {
        let fill = if value < 0 { 0xFF } else { 0 };
        bytes.resize(size, fill);
    }
    if big_endian {
        bytes.reverse();
    }
    bytes
}

fn float_bytes_32(value: f32, arch: ArchInfo) -> Vec<u8> {
    if arch.is_big_endian() {
        value.to_be_bytes().to_vec()
    } else {
        value.to_le_bytes().to_vec()
    }
}

fn float_bytes_64(value: f64, arch: ArchInfo) -> Vec<u8> {
    if arch.is_big_endian() {
        value.to_be_bytes().to_vec()
    } else {
        value.to_le_bytes().to_vec()
    }
}
