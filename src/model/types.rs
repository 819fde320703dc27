//! SQL Server system types and their driver-level descriptors

use std::fmt;

/// Driver type code, one per SQL Server system type family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDbType {
    BigInt,
    Binary,
    Bit,
    Char,
    Date,
    DateTime,
    DateTime2,
    DateTimeOffset,
    Decimal,
    Float,
    Image,
    Int,
    Money,
    NChar,
    NText,
    NVarChar,
    Real,
    SmallDateTime,
    SmallInt,
    SmallMoney,
    Structured,
    Text,
    Time,
    Timestamp,
    TinyInt,
    UniqueIdentifier,
    VarBinary,
    VarChar,
    Variant,
    Xml,
}

/// Maps a system type name to its driver type code and a literal usable
/// when a value of that type must be supplied at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlTypeDescriptor {
    pub type_name: &'static str,
    pub db_type: SqlDbType,
    pub build_value: &'static str,
}

const fn descriptor(
    type_name: &'static str,
    db_type: SqlDbType,
    build_value: &'static str,
) -> SqlTypeDescriptor {
    SqlTypeDescriptor {
        type_name,
        db_type,
        build_value,
    }
}

/// Every system type that generated code can bind. Spatial types,
/// `hierarchyid` and CLR types are intentionally absent.
const SYSTEM_TYPES: &[SqlTypeDescriptor] = &[
    descriptor("bigint", SqlDbType::BigInt, "0"),
    descriptor("binary", SqlDbType::Binary, "0x"),
    descriptor("bit", SqlDbType::Bit, "0"),
    descriptor("char", SqlDbType::Char, "''"),
    descriptor("date", SqlDbType::Date, "'1900-01-01'"),
    descriptor("datetime", SqlDbType::DateTime, "'1900-01-01'"),
    descriptor("datetime2", SqlDbType::DateTime2, "'1900-01-01'"),
    descriptor("datetimeoffset", SqlDbType::DateTimeOffset, "'1900-01-01'"),
    descriptor("decimal", SqlDbType::Decimal, "0"),
    descriptor("float", SqlDbType::Float, "0"),
    descriptor("image", SqlDbType::Image, "0x"),
    descriptor("int", SqlDbType::Int, "0"),
    descriptor("money", SqlDbType::Money, "0"),
    descriptor("nchar", SqlDbType::NChar, "N''"),
    descriptor("ntext", SqlDbType::NText, "N''"),
    descriptor("numeric", SqlDbType::Decimal, "0"),
    descriptor("nvarchar", SqlDbType::NVarChar, "N''"),
    descriptor("real", SqlDbType::Real, "0"),
    descriptor("rowversion", SqlDbType::Timestamp, "0x"),
    descriptor("smalldatetime", SqlDbType::SmallDateTime, "'1900-01-01'"),
    descriptor("smallint", SqlDbType::SmallInt, "0"),
    descriptor("smallmoney", SqlDbType::SmallMoney, "0"),
    descriptor("sql_variant", SqlDbType::Variant, "0"),
    descriptor("sysname", SqlDbType::NVarChar, "N''"),
    descriptor("text", SqlDbType::Text, "''"),
    descriptor("time", SqlDbType::Time, "'00:00:00'"),
    descriptor("timestamp", SqlDbType::Timestamp, "0x"),
    descriptor("tinyint", SqlDbType::TinyInt, "0"),
    descriptor(
        "uniqueidentifier",
        SqlDbType::UniqueIdentifier,
        "'00000000-0000-0000-0000-000000000000'",
    ),
    descriptor("varbinary", SqlDbType::VarBinary, "0x"),
    descriptor("varchar", SqlDbType::VarChar, "''"),
    descriptor("xml", SqlDbType::Xml, "N''"),
];

impl SqlTypeDescriptor {
    /// Look up a system type by name (case-insensitive).
    pub fn for_name(type_name: &str) -> Option<SqlTypeDescriptor> {
        SYSTEM_TYPES
            .iter()
            .find(|d| d.type_name.eq_ignore_ascii_case(type_name))
            .copied()
    }

    /// Whether catalog lengths of this type are bytes of UTF-16 text.
    pub fn is_wide_char(&self) -> bool {
        matches!(
            self.db_type,
            SqlDbType::NChar | SqlDbType::NVarChar | SqlDbType::NText
        )
    }

    /// Whether the type takes a length in its declaration.
    pub fn has_length(&self) -> bool {
        matches!(
            self.db_type,
            SqlDbType::Binary
                | SqlDbType::VarBinary
                | SqlDbType::Char
                | SqlDbType::VarChar
                | SqlDbType::NChar
                | SqlDbType::NVarChar
        ) && !self.type_name.eq_ignore_ascii_case("sysname")
    }

    /// Whether the type takes precision and scale in its declaration.
    pub fn has_precision(&self) -> bool {
        self.db_type == SqlDbType::Decimal
    }

    /// Whether the type takes a fractional-seconds scale in its declaration.
    pub fn has_time_scale(&self) -> bool {
        matches!(
            self.db_type,
            SqlDbType::Time | SqlDbType::DateTime2 | SqlDbType::DateTimeOffset
        )
    }

    /// Converts a catalog byte length into a character count for wide-character
    /// types; every other type passes through unchanged, as does `-1` (`max`).
    pub fn adjust_size(&self, size: i32) -> i32 {
        if self.is_wide_char() && size > 0 {
            size / 2
        } else {
            size
        }
    }

    /// Renders a T-SQL type declaration such as `nvarchar(50)` or `decimal(18,2)`.
    ///
    /// `size` must already be adjusted; `-1` renders as `max`.
    pub fn declaration(&self, size: i32, precision: u8, scale: u8) -> String {
        if self.has_length() {
            if size < 0 {
                format!("{}(max)", self.type_name)
            } else {
                format!("{}({})", self.type_name, size.max(1))
            }
        } else if self.has_precision() {
            format!("{}({},{})", self.type_name, precision.max(1), scale)
        } else if self.has_time_scale() {
            format!("{}({})", self.type_name, scale)
        } else {
            self.type_name.to_string()
        }
    }
}

impl fmt::Display for SqlTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}
