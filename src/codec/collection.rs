use super::{
    CodecError, CodecRef, DataType, GenericType, TypeCodec, Value,
    wire::{Reader, write_sized},
};

fn null_element(cql_type: &DataType) -> CodecError {
    CodecError::InvalidValue {
        cql_type: cql_type.clone(),
        reason: "collection elements cannot be null".to_string(),
    }
}

fn mismatch(cql_type: &DataType, value: &Value) -> CodecError {
    CodecError::InvalidValue {
        cql_type: cql_type.clone(),
        reason: format!("cannot encode {:?} value", value.host_class()),
    }
}

fn encode_elements<'a>(
    cql_type: &DataType,
    element: &CodecRef,
    items: impl ExactSizeIterator<Item = &'a Value>,
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    out.extend_from_slice(&(items.len() as i32).to_be_bytes());
    for item in items {
        let bytes = element.encode(Some(item))?.ok_or_else(|| null_element(cql_type))?;
        write_sized(&mut out, Some(&bytes));
    }
    Ok(out)
}

fn decode_elements(
    cql_type: &DataType,
    element: &CodecRef,
    bytes: Option<&[u8]>,
) -> Result<Vec<Value>, CodecError> {
    let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
        return Ok(Vec::new());
    };
    let mut reader = Reader::new(bytes, cql_type);
    let count = reader.read_i32()?.max(0) as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let value = element
            .decode(reader.read_sized()?)?
            .ok_or_else(|| null_element(cql_type))?;
        items.push(value);
    }
    reader.finish()?;
    Ok(items)
}

/// Codec for `list<T>`, composed from the element codec.
#[derive(Debug)]
pub struct ListCodec {
    cql_type: DataType,
    host_type: GenericType,
    element: CodecRef,
}

impl ListCodec {
    pub fn new(element: CodecRef) -> Self {
        Self {
            cql_type: DataType::list_of(element.cql_type().clone()),
            host_type: GenericType::list_of(element.host_type().clone()),
            element,
        }
    }

    pub fn element(&self) -> &CodecRef {
        &self.element
    }
}

impl TypeCodec for ListCodec {
    fn cql_type(&self) -> &DataType {
        &self.cql_type
    }

    fn host_type(&self) -> &GenericType {
        &self.host_type
    }

    fn accepts_value(&self, value: &Value) -> bool {
        match value {
            Value::List(items) => items.first().is_none_or(|v| self.element.accepts_value(v)),
            _ => false,
        }
    }

    fn inner_codecs(&self) -> &[CodecRef] {
        std::slice::from_ref(&self.element)
    }

    fn encode(&self, value: Option<&Value>) -> Result<Option<Vec<u8>>, CodecError> {
        match value {
            None => Ok(None),
            Some(Value::List(items)) => {
                encode_elements(&self.cql_type, &self.element, items.iter()).map(Some)
            }
            Some(other) => Err(mismatch(&self.cql_type, other)),
        }
    }

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Value>, CodecError> {
        decode_elements(&self.cql_type, &self.element, bytes).map(|v| Some(Value::List(v)))
    }
}

/// Codec for `set<T>`, composed from the element codec.
#[derive(Debug)]
pub struct SetCodec {
    cql_type: DataType,
    host_type: GenericType,
    element: CodecRef,
}

impl SetCodec {
    pub fn new(element: CodecRef) -> Self {
        Self {
            cql_type: DataType::set_of(element.cql_type().clone()),
            host_type: GenericType::set_of(element.host_type().clone()),
            element,
        }
    }

    pub fn element(&self) -> &CodecRef {
        &self.element
    }
}

impl TypeCodec for SetCodec {
    fn cql_type(&self) -> &DataType {
        &self.cql_type
    }

    fn host_type(&self) -> &GenericType {
        &self.host_type
    }

    fn accepts_value(&self, value: &Value) -> bool {
        match value {
            Value::Set(items) => items.first().is_none_or(|v| self.element.accepts_value(v)),
            _ => false,
        }
    }

    fn inner_codecs(&self) -> &[CodecRef] {
        std::slice::from_ref(&self.element)
    }

    fn encode(&self, value: Option<&Value>) -> Result<Option<Vec<u8>>, CodecError> {
        match value {
            None => Ok(None),
            Some(Value::Set(items)) => {
                encode_elements(&self.cql_type, &self.element, items.iter()).map(Some)
            }
            Some(other) => Err(mismatch(&self.cql_type, other)),
        }
    }

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Value>, CodecError> {
        decode_elements(&self.cql_type, &self.element, bytes).map(|v| Some(Value::Set(v)))
    }
}

/// Codec for `map<K, V>`, composed from the key and value codecs.
#[derive(Debug)]
pub struct MapCodec {
    cql_type: DataType,
    host_type: GenericType,
    /// Key codec, then value codec.
    entry: [CodecRef; 2],
}

impl MapCodec {
    pub fn new(key: CodecRef, value: CodecRef) -> Self {
        Self {
            cql_type: DataType::map_of(key.cql_type().clone(), value.cql_type().clone()),
            host_type: GenericType::map_of(key.host_type().clone(), value.host_type().clone()),
            entry: [key, value],
        }
    }

    pub fn key(&self) -> &CodecRef {
        &self.entry[0]
    }

    pub fn value(&self) -> &CodecRef {
        &self.entry[1]
    }
}

impl TypeCodec for MapCodec {
    fn cql_type(&self) -> &DataType {
        &self.cql_type
    }

    fn host_type(&self) -> &GenericType {
        &self.host_type
    }

    fn accepts_value(&self, value: &Value) -> bool {
        match value {
            Value::Map(entries) => entries
                .first()
                .is_none_or(|(k, v)| self.key().accepts_value(k) && self.value().accepts_value(v)),
            _ => false,
        }
    }

    fn inner_codecs(&self) -> &[CodecRef] {
        &self.entry
    }

    fn encode(&self, value: Option<&Value>) -> Result<Option<Vec<u8>>, CodecError> {
        let entries = match value {
            None => return Ok(None),
            Some(Value::Map(entries)) => entries,
            Some(other) => return Err(mismatch(&self.cql_type, other)),
        };
        let mut out = Vec::new();
        out.extend_from_slice(&(entries.len() as i32).to_be_bytes());
        for (k, v) in entries {
            let k = self
                .key()
                .encode(Some(k))?
                .ok_or_else(|| null_element(&self.cql_type))?;
            let v = self
                .value()
                .encode(Some(v))?
                .ok_or_else(|| null_element(&self.cql_type))?;
            write_sized(&mut out, Some(&k));
            write_sized(&mut out, Some(&v));
        }
        Ok(Some(out))
    }

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Value>, CodecError> {
        let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
            return Ok(Some(Value::Map(Vec::new())));
        };
        let mut reader = Reader::new(bytes, &self.cql_type);
        let count = reader.read_i32()?.max(0) as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let k = self
                .key()
                .decode(reader.read_sized()?)?
                .ok_or_else(|| null_element(&self.cql_type))?;
            let v = self
                .value()
                .decode(reader.read_sized()?)?
                .ok_or_else(|| null_element(&self.cql_type))?;
            entries.push((k, v));
        }
        reader.finish()?;
        Ok(Some(Value::Map(entries)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::{NativeType, PrimitiveCodec};

    fn int() -> CodecRef {
        Arc::new(PrimitiveCodec::new(NativeType::Int))
    }

    fn text() -> CodecRef {
        Arc::new(PrimitiveCodec::new(NativeType::Text))
    }

    #[test]
    fn list_layout() {
        let codec = ListCodec::new(int());
        let bytes = codec
            .encode(Some(&Value::List(vec![Value::Int(1), Value::Int(2)])))
            .unwrap()
            .unwrap();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 2]
        );
        assert_eq!(codec.cql_type(), &DataType::list_of(DataType::INT));
        assert_eq!(codec.host_type(), &GenericType::list_of(GenericType::Int));
    }

    #[test]
    fn map_round_trip() {
        let codec = MapCodec::new(text(), ListCodec::new(int()).into_ref());
        let value = Value::Map(vec![
            (Value::String("a".into()), Value::List(vec![Value::Int(7)])),
            (Value::String("b".into()), Value::List(vec![])),
        ]);
        let bytes = codec.encode(Some(&value)).unwrap();
        assert_eq!(codec.decode(bytes.as_deref()).unwrap(), Some(value));
    }

    #[test]
    fn null_or_empty_decodes_to_empty_collection() {
        let codec = SetCodec::new(int());
        assert_eq!(codec.decode(None).unwrap(), Some(Value::Set(vec![])));
        assert_eq!(codec.decode(Some(&[])).unwrap(), Some(Value::Set(vec![])));
    }

    #[test]
    fn accepts_checks_first_element_only() {
        let codec = ListCodec::new(int());
        assert!(codec.accepts_value(&Value::List(vec![])));
        assert!(codec.accepts_value(&Value::List(vec![Value::Int(1)])));
        assert!(!codec.accepts_value(&Value::List(vec![Value::Long(1)])));
        assert!(!codec.accepts_value(&Value::Set(vec![Value::Int(1)])));
    }

    #[test]
    #[should_panic(expected = "InvalidValue")]
    fn heterogeneous_list_fails_on_encode() {
        ListCodec::new(int())
            .encode(Some(&Value::List(vec![Value::Int(1), Value::Long(2)])))
            .unwrap();
    }

    trait IntoRef {
        fn into_ref(self) -> CodecRef;
    }

    impl<T: TypeCodec + 'static> IntoRef for T {
        fn into_ref(self) -> CodecRef {
            Arc::new(self)
        }
    }
}
