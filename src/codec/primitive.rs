use std::net::IpAddr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike};
use uuid::Uuid;

use super::{
    CodecError, CqlDuration, DataType, Decimal, GenericType, NativeType, TypeCodec, Value, Varint,
};

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const EPOCH_DAYS_FROM_CE: i64 = 719_163;
const DATE_CENTER: i64 = 1 << 31;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Built-in codec for one native wire type.
#[derive(Debug)]
pub struct PrimitiveCodec {
    native: NativeType,
    cql_type: DataType,
    host_type: GenericType,
}

impl PrimitiveCodec {
    pub fn new(native: NativeType) -> Self {
        Self {
            native,
            cql_type: DataType::Native(native),
            host_type: host_type_of(native),
        }
    }

    /// Every built-in codec, canonical wire type first where several share a host type.
    pub fn all() -> Vec<PrimitiveCodec> {
        [
            NativeType::Boolean,
            NativeType::Tinyint,
            NativeType::Double,
            NativeType::Bigint,
            NativeType::Counter,
            NativeType::Float,
            NativeType::Int,
            NativeType::Smallint,
            NativeType::Timestamp,
            NativeType::Date,
            NativeType::Time,
            NativeType::Blob,
            NativeType::Text,
            NativeType::Ascii,
            NativeType::Varint,
            NativeType::Decimal,
            NativeType::Uuid,
            NativeType::Timeuuid,
            NativeType::Inet,
            NativeType::Duration,
        ]
        .into_iter()
        .map(PrimitiveCodec::new)
        .collect()
    }

    fn invalid(&self, reason: impl Into<String>) -> CodecError {
        CodecError::InvalidValue {
            cql_type: self.cql_type.clone(),
            reason: reason.into(),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> CodecError {
        CodecError::Malformed {
            cql_type: self.cql_type.clone(),
            reason: reason.into(),
        }
    }

    fn fixed<const N: usize>(&self, bytes: &[u8]) -> Result<[u8; N], CodecError> {
        bytes
            .try_into()
            .map_err(|_| self.malformed(format!("expected {N} bytes, got {}", bytes.len())))
    }
}

/// Canonical host type of a native wire type.
pub(crate) fn host_type_of(native: NativeType) -> GenericType {
    match native {
        NativeType::Ascii | NativeType::Text => GenericType::String,
        NativeType::Bigint | NativeType::Counter => GenericType::Long,
        NativeType::Blob => GenericType::Blob,
        NativeType::Boolean => GenericType::Boolean,
        NativeType::Decimal => GenericType::Decimal,
        NativeType::Double => GenericType::Double,
        NativeType::Float => GenericType::Float,
        NativeType::Int => GenericType::Int,
        NativeType::Timestamp => GenericType::Timestamp,
        NativeType::Uuid | NativeType::Timeuuid => GenericType::Uuid,
        NativeType::Varint => GenericType::Varint,
        NativeType::Inet => GenericType::Inet,
        NativeType::Date => GenericType::Date,
        NativeType::Time => GenericType::Time,
        NativeType::Smallint => GenericType::Short,
        NativeType::Tinyint => GenericType::Byte,
        NativeType::Duration => GenericType::Duration,
    }
}

impl TypeCodec for PrimitiveCodec {
    fn cql_type(&self) -> &DataType {
        &self.cql_type
    }

    fn host_type(&self) -> &GenericType {
        &self.host_type
    }

    fn accepts_value(&self, value: &Value) -> bool {
        value.host_class() == self.host_type.raw_class()
    }

    fn encode(&self, value: Option<&Value>) -> Result<Option<Vec<u8>>, CodecError> {
        let Some(value) = value else {
            return Ok(None);
        };
        let bytes = match (self.native, value) {
            (NativeType::Boolean, Value::Boolean(v)) => vec![*v as u8],
            (NativeType::Tinyint, Value::Byte(v)) => v.to_be_bytes().to_vec(),
            (NativeType::Smallint, Value::Short(v)) => v.to_be_bytes().to_vec(),
            (NativeType::Int, Value::Int(v)) => v.to_be_bytes().to_vec(),
            (NativeType::Bigint | NativeType::Counter, Value::Long(v)) => v.to_be_bytes().to_vec(),
            (NativeType::Float, Value::Float(v)) => v.to_be_bytes().to_vec(),
            (NativeType::Double, Value::Double(v)) => v.to_be_bytes().to_vec(),
            (NativeType::Timestamp, Value::Timestamp(v)) => {
                v.timestamp_millis().to_be_bytes().to_vec()
            }
            (NativeType::Date, Value::Date(v)) => {
                let days = v.num_days_from_ce() as i64 - EPOCH_DAYS_FROM_CE;
                ((days + DATE_CENTER) as u32).to_be_bytes().to_vec()
            }
            (NativeType::Time, Value::Time(v)) => {
                let nanos = v.num_seconds_from_midnight() as i64 * NANOS_PER_SECOND
                    + v.nanosecond() as i64;
                nanos.to_be_bytes().to_vec()
            }
            (NativeType::Blob, Value::Blob(v)) => v.clone(),
            (NativeType::Text, Value::String(v)) => v.as_bytes().to_vec(),
            (NativeType::Ascii, Value::String(v)) => {
                if !v.is_ascii() {
                    return Err(self.invalid(format!("'{v}' contains non-ascii characters")));
                }
                v.as_bytes().to_vec()
            }
            (NativeType::Varint, Value::Varint(v)) => v.as_be_bytes().to_vec(),
            (NativeType::Decimal, Value::Decimal(v)) => {
                let mut out = v.scale.to_be_bytes().to_vec();
                out.extend_from_slice(v.unscaled.as_be_bytes());
                out
            }
            (NativeType::Uuid, Value::Uuid(v)) => v.as_bytes().to_vec(),
            (NativeType::Timeuuid, Value::Uuid(v)) => {
                if v.get_version_num() != 1 {
                    return Err(self.invalid(format!("{v} is not a type 1 uuid")));
                }
                v.as_bytes().to_vec()
            }
            (NativeType::Inet, Value::Inet(v)) => match v {
                IpAddr::V4(v4) => v4.octets().to_vec(),
                IpAddr::V6(v6) => v6.octets().to_vec(),
            },
            (NativeType::Duration, Value::Duration(v)) => {
                let mut out = Vec::with_capacity(12);
                vint::write_signed(&mut out, v.months as i64);
                vint::write_signed(&mut out, v.days as i64);
                vint::write_signed(&mut out, v.nanoseconds);
                out
            }
            (_, other) => {
                return Err(self.invalid(format!(
                    "expected {}, got {:?}",
                    self.host_type,
                    other.host_class()
                )));
            }
        };
        Ok(Some(bytes))
    }

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Value>, CodecError> {
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        // Empty buffers are nulls for everything but the variable-length types.
        if bytes.is_empty()
            && !matches!(
                self.native,
                NativeType::Blob | NativeType::Text | NativeType::Ascii
            )
        {
            return Ok(None);
        }
        let value = match self.native {
            NativeType::Boolean => Value::Boolean(self.fixed::<1>(bytes)?[0] != 0),
            NativeType::Tinyint => Value::Byte(i8::from_be_bytes(self.fixed(bytes)?)),
            NativeType::Smallint => Value::Short(i16::from_be_bytes(self.fixed(bytes)?)),
            NativeType::Int => Value::Int(i32::from_be_bytes(self.fixed(bytes)?)),
            NativeType::Bigint | NativeType::Counter => {
                Value::Long(i64::from_be_bytes(self.fixed(bytes)?))
            }
            NativeType::Float => Value::Float(f32::from_be_bytes(self.fixed(bytes)?)),
            NativeType::Double => Value::Double(f64::from_be_bytes(self.fixed(bytes)?)),
            NativeType::Timestamp => {
                let millis = i64::from_be_bytes(self.fixed(bytes)?);
                let ts = DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| self.malformed(format!("timestamp {millis} out of range")))?;
                Value::Timestamp(ts)
            }
            NativeType::Date => {
                let raw = u32::from_be_bytes(self.fixed(bytes)?) as i64;
                let days = raw - DATE_CENTER + EPOCH_DAYS_FROM_CE;
                let date = i32::try_from(days)
                    .ok()
                    .and_then(NaiveDate::from_num_days_from_ce_opt)
                    .ok_or_else(|| self.malformed(format!("date {raw} out of range")))?;
                Value::Date(date)
            }
            NativeType::Time => {
                let nanos = i64::from_be_bytes(self.fixed(bytes)?);
                if !(0..86_400 * NANOS_PER_SECOND).contains(&nanos) {
                    return Err(self.malformed(format!("time {nanos} out of range")));
                }
                let time = NaiveTime::from_num_seconds_from_midnight_opt(
                    (nanos / NANOS_PER_SECOND) as u32,
                    (nanos % NANOS_PER_SECOND) as u32,
                )
                .ok_or_else(|| self.malformed(format!("time {nanos} out of range")))?;
                Value::Time(time)
            }
            NativeType::Blob => Value::Blob(bytes.to_vec()),
            NativeType::Text => Value::String(
                String::from_utf8(bytes.to_vec()).map_err(|e| self.malformed(e.to_string()))?,
            ),
            NativeType::Ascii => {
                if !bytes.is_ascii() {
                    return Err(self.malformed("non-ascii bytes"));
                }
                Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            NativeType::Varint => Value::Varint(Varint::from_be_bytes(bytes.to_vec())),
            NativeType::Decimal => {
                if bytes.len() < 5 {
                    return Err(self.malformed("decimal needs a scale and an unscaled value"));
                }
                let (scale, unscaled) = bytes.split_at(4);
                Value::Decimal(Decimal {
                    unscaled: Varint::from_be_bytes(unscaled.to_vec()),
                    scale: i32::from_be_bytes(self.fixed(scale)?),
                })
            }
            NativeType::Uuid | NativeType::Timeuuid => {
                Value::Uuid(Uuid::from_bytes(self.fixed(bytes)?))
            }
            NativeType::Inet => match bytes.len() {
                4 => Value::Inet(IpAddr::from(self.fixed::<4>(bytes)?)),
                16 => Value::Inet(IpAddr::from(self.fixed::<16>(bytes)?)),
                n => return Err(self.malformed(format!("invalid address length {n}"))),
            },
            NativeType::Duration => {
                let mut cursor = bytes;
                let months = vint::read_signed(&mut cursor).ok_or_else(|| self.malformed("months"))?;
                let days = vint::read_signed(&mut cursor).ok_or_else(|| self.malformed("days"))?;
                let nanoseconds =
                    vint::read_signed(&mut cursor).ok_or_else(|| self.malformed("nanoseconds"))?;
                if !cursor.is_empty() {
                    return Err(self.malformed("unexpected trailing bytes"));
                }
                Value::Duration(CqlDuration {
                    months: months as i32,
                    days: days as i32,
                    nanoseconds,
                })
            }
        };
        Ok(Some(value))
    }
}

/// Variable-length integers, as used by the duration encoding.
mod vint {
    fn unsigned_size(value: u64) -> usize {
        let magnitude = (value | 1).leading_zeros() as usize;
        (639 - magnitude * 9) >> 6
    }

    pub fn write_unsigned(out: &mut Vec<u8>, value: u64) {
        let size = unsigned_size(value);
        if size == 1 {
            out.push(value as u8);
            return;
        }
        let extra = size - 1;
        let mut buf = [0u8; 9];
        for (i, slot) in buf[..size].iter_mut().rev().enumerate() {
            *slot = if i < 8 { (value >> (8 * i)) as u8 } else { 0 };
        }
        buf[0] |= !(0xffu32 >> extra) as u8;
        out.extend_from_slice(&buf[..size]);
    }

    pub fn read_unsigned(cursor: &mut &[u8]) -> Option<u64> {
        let (&first, rest) = cursor.split_first()?;
        if first & 0x80 == 0 {
            *cursor = rest;
            return Some(first as u64);
        }
        let extra = first.leading_ones() as usize;
        if rest.len() < extra {
            return None;
        }
        let mut value = (first as u32 & (0xffu32 >> extra)) as u64;
        for b in &rest[..extra] {
            value = (value << 8) | *b as u64;
        }
        *cursor = &rest[extra..];
        Some(value)
    }

    pub fn write_signed(out: &mut Vec<u8>, value: i64) {
        write_unsigned(out, ((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn read_signed(cursor: &mut &[u8]) -> Option<i64> {
        let n = read_unsigned(cursor)?;
        Some((n >> 1) as i64 ^ -((n & 1) as i64))
    }
}
