//! Host values.
//!
//! [`Value`] is a dynamically shaped host value: what a codec encodes from and decodes
//! into. Collections keep wire order; sets and maps are ordered sequences rather than
//! hashed containers since floating point values are legal elements.
use std::{fmt, net::IpAddr};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use super::{DataType, GenericType, HostClass, UserDefinedType};

/// Arbitrary-precision integer, stored as minimal big-endian two's complement bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Varint(Vec<u8>);

impl Varint {
    pub fn from_be_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_be_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Narrows to `i64` when the value fits.
    pub fn to_i64(&self) -> Option<i64> {
        if self.0.is_empty() || self.0.len() > 8 {
            return None;
        }
        let fill = if self.0[0] & 0x80 != 0 { 0xff } else { 0x00 };
        let mut buf = [fill; 8];
        buf[8 - self.0.len()..].copy_from_slice(&self.0);
        Some(i64::from_be_bytes(buf))
    }
}

impl From<i64> for Varint {
    fn from(value: i64) -> Self {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        // Drop redundant sign-extension bytes.
        while start < 7 {
            let (b, next) = (bytes[start], bytes[start + 1]);
            if (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0) {
                start += 1;
            } else {
                break;
            }
        }
        Self(bytes[start..].to_vec())
    }
}

impl fmt::Display for Varint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_i64() {
            Some(v) => write!(f, "{v}"),
            None => {
                write!(f, "0x")?;
                for b in &self.0 {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Arbitrary-precision decimal: `unscaled * 10^-scale`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    pub unscaled: Varint,
    pub scale: i32,
}

impl Decimal {
    pub fn new(unscaled: impl Into<Varint>, scale: i32) -> Self {
        Self {
            unscaled: unscaled.into(),
            scale,
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}E{}", self.unscaled, -self.scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CqlDuration {
    pub months: i32,
    pub days: i32,
    pub nanoseconds: i64,
}

impl fmt::Display for CqlDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mo{}d{}ns", self.months, self.days, self.nanoseconds)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleValue {
    components: Vec<DataType>,
    values: Vec<Option<Value>>,
}

impl TupleValue {
    pub fn new(components: Vec<DataType>) -> Self {
        let values = vec![None; components.len()];
        Self { components, values }
    }

    pub fn with(mut self, index: usize, value: Value) -> Self {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = Some(value);
        }
        self
    }

    pub fn data_type(&self) -> DataType {
        DataType::Tuple(self.components.clone())
    }

    pub fn components(&self) -> &[DataType] {
        &self.components
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub(crate) fn from_parts(components: Vec<DataType>, values: Vec<Option<Value>>) -> Self {
        Self { components, values }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UdtValue {
    udt: UserDefinedType,
    values: Vec<Option<Value>>,
}

impl UdtValue {
    pub fn new(udt: UserDefinedType) -> Self {
        let values = vec![None; udt.field_names.len()];
        Self { udt, values }
    }

    pub fn with(mut self, field: &str, value: Value) -> Self {
        if let Some(index) = self.udt.index_of(field) {
            self.values[index] = Some(value);
        }
        self
    }

    pub fn data_type(&self) -> DataType {
        DataType::Udt(self.udt.clone())
    }

    pub fn user_type(&self) -> &UserDefinedType {
        &self.udt
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.udt
            .index_of(field)
            .and_then(|i| self.values[i].as_ref())
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub(crate) fn from_parts(udt: UserDefinedType, values: Vec<Option<Value>>) -> Self {
        Self { udt, values }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    Varint(Varint),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
    Inet(IpAddr),
    Duration(CqlDuration),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Tuple(TupleValue),
    Udt(UdtValue),
}

impl Value {
    pub fn host_class(&self) -> HostClass {
        match self {
            Value::Boolean(_) => HostClass::Boolean,
            Value::Byte(_) => HostClass::Byte,
            Value::Short(_) => HostClass::Short,
            Value::Int(_) => HostClass::Int,
            Value::Long(_) => HostClass::Long,
            Value::Float(_) => HostClass::Float,
            Value::Double(_) => HostClass::Double,
            Value::String(_) => HostClass::String,
            Value::Blob(_) => HostClass::Blob,
            Value::Varint(_) => HostClass::Varint,
            Value::Decimal(_) => HostClass::Decimal,
            Value::Timestamp(_) => HostClass::Timestamp,
            Value::Date(_) => HostClass::Date,
            Value::Time(_) => HostClass::Time,
            Value::Uuid(_) => HostClass::Uuid,
            Value::Inet(_) => HostClass::Inet,
            Value::Duration(_) => HostClass::Duration,
            Value::List(_) => HostClass::List,
            Value::Set(_) => HostClass::Set,
            Value::Map(_) => HostClass::Map,
            Value::Tuple(_) => HostClass::TupleValue,
            Value::Udt(_) => HostClass::UdtValue,
        }
    }

    /// The declared host type of this value, with collections left raw.
    pub fn raw_type(&self) -> GenericType {
        GenericType::of(self.host_class())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T>(
            f: &mut fmt::Formatter<'_>,
            items: &[T],
            mut each: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
        ) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                each(f, item)?;
            }
            Ok(())
        }
        fn opt(f: &mut fmt::Formatter<'_>, v: &Option<Value>) -> fmt::Result {
            match v {
                Some(v) => write!(f, "{v}"),
                None => write!(f, "NULL"),
            }
        }

        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "'{}'", v.replace('\'', "''")),
            Value::Blob(v) => {
                write!(f, "0x")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Varint(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "'{}'", v.to_rfc3339()),
            Value::Date(v) => write!(f, "'{v}'"),
            Value::Time(v) => write!(f, "'{v}'"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Inet(v) => write!(f, "'{v}'"),
            Value::Duration(v) => write!(f, "{v}"),
            Value::List(items) => {
                write!(f, "[")?;
                join(f, items, |f, v| write!(f, "{v}"))?;
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                join(f, items, |f, v| write!(f, "{v}"))?;
                write!(f, "}}")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                join(f, entries, |f, (k, v)| write!(f, "{k}:{v}"))?;
                write!(f, "}}")
            }
            Value::Tuple(tuple) => {
                write!(f, "(")?;
                join(f, tuple.values(), opt)?;
                write!(f, ")")
            }
            Value::Udt(udt) => {
                write!(f, "{{")?;
                let names = &udt.user_type().field_names;
                for (i, (name, v)) in names.iter().zip(udt.values()).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}:")?;
                    opt(f, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_from_i64_is_minimal() {
        assert_eq!(Varint::from(0).as_be_bytes(), &[0x00]);
        assert_eq!(Varint::from(127).as_be_bytes(), &[0x7f]);
        assert_eq!(Varint::from(128).as_be_bytes(), &[0x00, 0x80]);
        assert_eq!(Varint::from(-1).as_be_bytes(), &[0xff]);
        assert_eq!(Varint::from(-129).as_be_bytes(), &[0xff, 0x7f]);
        assert_eq!(Varint::from(-129).to_i64(), Some(-129));
        assert_eq!(Varint::from(i64::MIN).to_i64(), Some(i64::MIN));
    }

    #[test]
    fn udt_value_fields() {
        let udt = UserDefinedType::new("ks", "point")
            .with_field("x", DataType::INT)
            .with_field("y", DataType::INT);
        let value = UdtValue::new(udt).with("y", Value::Int(4));
        assert_eq!(value.get("x"), None);
        assert_eq!(value.get("y"), Some(&Value::Int(4)));
        assert_eq!(Value::Udt(value).to_string(), "{x:NULL, y:4}");
    }

    #[test]
    fn display_quotes_strings() {
        let v = Value::List(vec![Value::String("it's".into()), Value::String("b".into())]);
        assert_eq!(v.to_string(), "['it''s', 'b']");
    }
}
