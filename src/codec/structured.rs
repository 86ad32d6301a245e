use super::{
    CodecError, CodecRef, DataType, GenericType, HostClass, TupleValue, TypeCodec, UdtValue,
    UserDefinedType, Value,
    wire::{Reader, write_sized},
};

static TUPLE_HOST_TYPE: GenericType = GenericType::TupleValue;
static UDT_HOST_TYPE: GenericType = GenericType::UdtValue;
static CUSTOM_HOST_TYPE: GenericType = GenericType::Blob;

fn encode_components(
    codecs: &[CodecRef],
    values: &[Option<Value>],
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    for (codec, value) in codecs.iter().zip(values) {
        let bytes = codec.encode(value.as_ref())?;
        write_sized(&mut out, bytes.as_deref());
    }
    Ok(out)
}

/// Decodes components until the bytes run out; trailing components stay null.
fn decode_components(
    cql_type: &DataType,
    codecs: &[CodecRef],
    bytes: &[u8],
) -> Result<Vec<Option<Value>>, CodecError> {
    let mut reader = Reader::new(bytes, cql_type);
    let mut values = vec![None; codecs.len()];
    let mut index = 0;
    while !reader.is_empty() {
        let Some(codec) = codecs.get(index) else {
            return Err(CodecError::Malformed {
                cql_type: cql_type.clone(),
                reason: format!("too many components, expected {}", codecs.len()),
            });
        };
        values[index] = codec.decode(reader.read_sized()?)?;
        index += 1;
    }
    Ok(values)
}

/// Codec for one concrete `tuple<...>` type.
#[derive(Debug)]
pub struct TupleCodec {
    cql_type: DataType,
    components: Vec<DataType>,
    codecs: Vec<CodecRef>,
}

impl TupleCodec {
    /// `codecs` must line up with `components`.
    pub fn new(components: Vec<DataType>, codecs: Vec<CodecRef>) -> Self {
        Self {
            cql_type: DataType::Tuple(components.clone()),
            components,
            codecs,
        }
    }
}

impl TypeCodec for TupleCodec {
    fn cql_type(&self) -> &DataType {
        &self.cql_type
    }

    fn host_type(&self) -> &GenericType {
        &TUPLE_HOST_TYPE
    }

    fn accepts_value(&self, value: &Value) -> bool {
        matches!(value, Value::Tuple(t) if t.components() == self.components)
    }

    fn inner_codecs(&self) -> &[CodecRef] {
        &self.codecs
    }

    fn encode(&self, value: Option<&Value>) -> Result<Option<Vec<u8>>, CodecError> {
        match value {
            None => Ok(None),
            Some(Value::Tuple(tuple)) if tuple.components() == self.components => {
                encode_components(&self.codecs, tuple.values()).map(Some)
            }
            Some(other) => Err(CodecError::InvalidValue {
                cql_type: self.cql_type.clone(),
                reason: format!("cannot encode {other}"),
            }),
        }
    }

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Value>, CodecError> {
        let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
            return Ok(None);
        };
        let values = decode_components(&self.cql_type, &self.codecs, bytes)?;
        Ok(Some(Value::Tuple(TupleValue::from_parts(
            self.components.clone(),
            values,
        ))))
    }
}

/// Codec for one user-defined type.
#[derive(Debug)]
pub struct UdtCodec {
    cql_type: DataType,
    udt: UserDefinedType,
    codecs: Vec<CodecRef>,
}

impl UdtCodec {
    /// `codecs` must line up with the field types of `udt`.
    pub fn new(udt: UserDefinedType, codecs: Vec<CodecRef>) -> Self {
        Self {
            cql_type: DataType::Udt(udt.clone()),
            udt,
            codecs,
        }
    }
}

impl TypeCodec for UdtCodec {
    fn cql_type(&self) -> &DataType {
        &self.cql_type
    }

    fn host_type(&self) -> &GenericType {
        &UDT_HOST_TYPE
    }

    fn accepts_value(&self, value: &Value) -> bool {
        matches!(value, Value::Udt(u) if *u.user_type() == self.udt)
    }

    fn inner_codecs(&self) -> &[CodecRef] {
        &self.codecs
    }

    fn encode(&self, value: Option<&Value>) -> Result<Option<Vec<u8>>, CodecError> {
        match value {
            None => Ok(None),
            Some(Value::Udt(udt)) if *udt.user_type() == self.udt => {
                encode_components(&self.codecs, udt.values()).map(Some)
            }
            Some(other) => Err(CodecError::InvalidValue {
                cql_type: self.cql_type.clone(),
                reason: format!("cannot encode {other}"),
            }),
        }
    }

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Value>, CodecError> {
        let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
            return Ok(None);
        };
        let values = decode_components(&self.cql_type, &self.codecs, bytes)?;
        Ok(Some(Value::Udt(UdtValue::from_parts(self.udt.clone(), values))))
    }
}

/// Raw-bytes passthrough for a server-side custom type.
#[derive(Debug)]
pub struct CustomCodec {
    cql_type: DataType,
}

impl CustomCodec {
    pub fn new(cql_type: DataType) -> Self {
        Self { cql_type }
    }
}

impl TypeCodec for CustomCodec {
    fn cql_type(&self) -> &DataType {
        &self.cql_type
    }

    fn host_type(&self) -> &GenericType {
        &CUSTOM_HOST_TYPE
    }

    fn accepts_class(&self, class: HostClass) -> bool {
        class == HostClass::Blob
    }

    fn accepts_value(&self, value: &Value) -> bool {
        matches!(value, Value::Blob(_))
    }

    fn encode(&self, value: Option<&Value>) -> Result<Option<Vec<u8>>, CodecError> {
        match value {
            None => Ok(None),
            Some(Value::Blob(bytes)) => Ok(Some(bytes.clone())),
            Some(other) => Err(CodecError::InvalidValue {
                cql_type: self.cql_type.clone(),
                reason: format!("cannot encode {:?} value", other.host_class()),
            }),
        }
    }

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Value>, CodecError> {
        Ok(bytes.map(|b| Value::Blob(b.to_vec())))
    }
}
