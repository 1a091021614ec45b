//! Descriptor shape and the declared-type enumeration (spec.md §3).

/// Declared type of a registered metric or variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Bool = 0,
    I32 = 1,
    U32 = 2,
    F32 = 3,
    Ipv4 = 4,
    Mac = 5,
    Str = 6,
    Null = 7,
}

impl DataType {
    /// Wire name used in meta documents.
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
            DataType::F32 => "f32",
            DataType::Ipv4 => "ipv4",
            DataType::Mac => "mac",
            DataType::Str => "string",
            DataType::Null => "null",
        }
    }

    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(DataType::Bool),
            1 => Some(DataType::I32),
            2 => Some(DataType::U32),
            3 => Some(DataType::F32),
            4 => Some(DataType::Ipv4),
            5 => Some(DataType::Mac),
            6 => Some(DataType::Str),
            7 => Some(DataType::Null),
            _ => None,
        }
    }
}

/// Which of the Registry's two parallel tables a descriptor lives in
/// (spec.md §4.B, "two parallel tables, one for metrics and one for
/// variables").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Metric,
    Variable,
}

/// A registered metric or variable. Strings are `&'static` rather than
/// `String`: spec.md requires process-lifetime stability ("stored by
/// reference, not copied"), which a registration call can get for free by
/// only accepting string literals/leaked strings from the embedding
/// application, matching the original's raw `const char *` storage.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub tag: &'static str,
    pub key: &'static str,
    pub label: &'static str,
    pub path: &'static str,
    pub data_type: DataType,
    pub unit: Option<&'static str>,
}
