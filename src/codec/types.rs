//! Wire-level type descriptors.
//!
//! A [`DataType`] describes the protocol type of a column or bound value. It is a closed
//! set of shapes: native scalars, the three collection kinds, tuples, user-defined types
//! and custom (opaque) types. Codec resolution dispatches on these shapes with plain
//! pattern matching.
use std::fmt;

use bincode::{Decode, Encode};

/// Protocol codes, as carried in result metadata.
pub mod code {
    pub const CUSTOM: u16 = 0x0000;
    pub const ASCII: u16 = 0x0001;
    pub const BIGINT: u16 = 0x0002;
    pub const BLOB: u16 = 0x0003;
    pub const BOOLEAN: u16 = 0x0004;
    pub const COUNTER: u16 = 0x0005;
    pub const DECIMAL: u16 = 0x0006;
    pub const DOUBLE: u16 = 0x0007;
    pub const FLOAT: u16 = 0x0008;
    pub const INT: u16 = 0x0009;
    pub const TIMESTAMP: u16 = 0x000B;
    pub const UUID: u16 = 0x000C;
    pub const VARCHAR: u16 = 0x000D;
    pub const VARINT: u16 = 0x000E;
    pub const TIMEUUID: u16 = 0x000F;
    pub const INET: u16 = 0x0010;
    pub const DATE: u16 = 0x0011;
    pub const TIME: u16 = 0x0012;
    pub const SMALLINT: u16 = 0x0013;
    pub const TINYINT: u16 = 0x0014;
    pub const DURATION: u16 = 0x0015;
    pub const LIST: u16 = 0x0020;
    pub const MAP: u16 = 0x0021;
    pub const SET: u16 = 0x0022;
    pub const UDT: u16 = 0x0030;
    pub const TUPLE: u16 = 0x0031;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum NativeType {
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Text,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    Duration,
}

impl NativeType {
    pub const ALL: [NativeType; 20] = [
        NativeType::Ascii,
        NativeType::Bigint,
        NativeType::Blob,
        NativeType::Boolean,
        NativeType::Counter,
        NativeType::Decimal,
        NativeType::Double,
        NativeType::Float,
        NativeType::Int,
        NativeType::Timestamp,
        NativeType::Uuid,
        NativeType::Text,
        NativeType::Varint,
        NativeType::Timeuuid,
        NativeType::Inet,
        NativeType::Date,
        NativeType::Time,
        NativeType::Smallint,
        NativeType::Tinyint,
        NativeType::Duration,
    ];

    pub fn protocol_code(self) -> u16 {
        match self {
            NativeType::Ascii => code::ASCII,
            NativeType::Bigint => code::BIGINT,
            NativeType::Blob => code::BLOB,
            NativeType::Boolean => code::BOOLEAN,
            NativeType::Counter => code::COUNTER,
            NativeType::Decimal => code::DECIMAL,
            NativeType::Double => code::DOUBLE,
            NativeType::Float => code::FLOAT,
            NativeType::Int => code::INT,
            NativeType::Timestamp => code::TIMESTAMP,
            NativeType::Uuid => code::UUID,
            NativeType::Text => code::VARCHAR,
            NativeType::Varint => code::VARINT,
            NativeType::Timeuuid => code::TIMEUUID,
            NativeType::Inet => code::INET,
            NativeType::Date => code::DATE,
            NativeType::Time => code::TIME,
            NativeType::Smallint => code::SMALLINT,
            NativeType::Tinyint => code::TINYINT,
            NativeType::Duration => code::DURATION,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NativeType::Ascii => "ascii",
            NativeType::Bigint => "bigint",
            NativeType::Blob => "blob",
            NativeType::Boolean => "boolean",
            NativeType::Counter => "counter",
            NativeType::Decimal => "decimal",
            NativeType::Double => "double",
            NativeType::Float => "float",
            NativeType::Int => "int",
            NativeType::Timestamp => "timestamp",
            NativeType::Uuid => "uuid",
            NativeType::Text => "text",
            NativeType::Varint => "varint",
            NativeType::Timeuuid => "timeuuid",
            NativeType::Inet => "inet",
            NativeType::Date => "date",
            NativeType::Time => "time",
            NativeType::Smallint => "smallint",
            NativeType::Tinyint => "tinyint",
            NativeType::Duration => "duration",
        }
    }
}

/// Shape of a user-defined type as declared in the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct UserDefinedType {
    pub keyspace: String,
    pub name: String,
    pub field_names: Vec<String>,
    pub field_types: Vec<DataType>,
}

impl UserDefinedType {
    pub fn new(keyspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            field_names: Vec::new(),
            field_types: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.field_names.push(name.into());
        self.field_types.push(data_type);
        self
    }

    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.field_names.iter().position(|f| f == field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub enum DataType {
    Native(NativeType),
    List(Box<DataType>),
    Set(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Tuple(Vec<DataType>),
    Udt(UserDefinedType),
    /// Server-side type identified by its fully qualified class name.
    Custom(String),
}

impl DataType {
    pub const ASCII: DataType = DataType::Native(NativeType::Ascii);
    pub const BIGINT: DataType = DataType::Native(NativeType::Bigint);
    pub const BLOB: DataType = DataType::Native(NativeType::Blob);
    pub const BOOLEAN: DataType = DataType::Native(NativeType::Boolean);
    pub const COUNTER: DataType = DataType::Native(NativeType::Counter);
    pub const DECIMAL: DataType = DataType::Native(NativeType::Decimal);
    pub const DOUBLE: DataType = DataType::Native(NativeType::Double);
    pub const FLOAT: DataType = DataType::Native(NativeType::Float);
    pub const INT: DataType = DataType::Native(NativeType::Int);
    pub const TIMESTAMP: DataType = DataType::Native(NativeType::Timestamp);
    pub const UUID: DataType = DataType::Native(NativeType::Uuid);
    pub const TEXT: DataType = DataType::Native(NativeType::Text);
    pub const VARINT: DataType = DataType::Native(NativeType::Varint);
    pub const TIMEUUID: DataType = DataType::Native(NativeType::Timeuuid);
    pub const INET: DataType = DataType::Native(NativeType::Inet);
    pub const DATE: DataType = DataType::Native(NativeType::Date);
    pub const TIME: DataType = DataType::Native(NativeType::Time);
    pub const SMALLINT: DataType = DataType::Native(NativeType::Smallint);
    pub const TINYINT: DataType = DataType::Native(NativeType::Tinyint);
    pub const DURATION: DataType = DataType::Native(NativeType::Duration);

    pub fn list_of(element: DataType) -> Self {
        DataType::List(Box::new(element))
    }

    pub fn set_of(element: DataType) -> Self {
        DataType::Set(Box::new(element))
    }

    pub fn map_of(key: DataType, value: DataType) -> Self {
        DataType::Map(Box::new(key), Box::new(value))
    }

    pub fn tuple_of(components: impl IntoIterator<Item = DataType>) -> Self {
        DataType::Tuple(components.into_iter().collect())
    }

    pub fn protocol_code(&self) -> u16 {
        match self {
            DataType::Native(native) => native.protocol_code(),
            DataType::List(_) => code::LIST,
            DataType::Set(_) => code::SET,
            DataType::Map(_, _) => code::MAP,
            DataType::Tuple(_) => code::TUPLE,
            DataType::Udt(_) => code::UDT,
            DataType::Custom(_) => code::CUSTOM,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Native(native) => write!(f, "{}", native.name()),
            DataType::List(element) => write!(f, "list<{element}>"),
            DataType::Set(element) => write!(f, "set<{element}>"),
            DataType::Map(key, value) => write!(f, "map<{key}, {value}>"),
            DataType::Tuple(components) => {
                write!(f, "tuple<")?;
                for (i, component) in components.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{component}")?;
                }
                write!(f, ">")
            }
            DataType::Udt(udt) => write!(f, "{}.{}", udt.keyspace, udt.name),
            DataType::Custom(class) => write!(f, "'{class}'"),
        }
    }
}
