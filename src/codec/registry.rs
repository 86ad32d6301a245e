use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use log::trace;

use super::{
    CodecError, CodecRef, CustomCodec, DataType, GenericType, HostClass, ListCodec, MapCodec,
    PrimitiveCodec, SetCodec, TupleCodec, TypeCodec, UdtCodec, Value, primitive::host_type_of,
};

/// Resolves codecs for any combination of wire type, host type and host value.
///
/// Every lookup tries, in order: the built-in primitive codecs, the user codecs in
/// registration order, then a cached or freshly synthesized composite codec. Failure to
/// resolve is reported as [`CodecError::CodecNotFound`].
pub trait CodecRegistry: Send + Sync {
    fn codec_for_types(
        &self,
        cql_type: &DataType,
        host_type: &GenericType,
    ) -> Result<CodecRef, CodecError>;

    fn codec_for_class(&self, cql_type: &DataType, class: HostClass)
    -> Result<CodecRef, CodecError>;

    fn codec_for_cql(&self, cql_type: &DataType) -> Result<CodecRef, CodecError>;

    fn codec_for_cql_value(&self, cql_type: &DataType, value: &Value)
    -> Result<CodecRef, CodecError>;

    fn codec_for_value(&self, value: &Value) -> Result<CodecRef, CodecError>;

    fn codec_for_host(&self, host_type: &GenericType) -> Result<CodecRef, CodecError>;
}

/// Cache key: wire type, host type, and whether the host type was matched covariantly.
type CacheKey = (Option<DataType>, Option<GenericType>, bool);

/// Host types used for empty collections when no wire type is known. Every empty
/// collection has the same encoding, so the element type is arbitrary.
fn empty_list_type() -> GenericType {
    GenericType::list_of(GenericType::Boolean)
}

fn empty_set_type() -> GenericType {
    GenericType::set_of(GenericType::Boolean)
}

fn empty_map_type() -> GenericType {
    GenericType::map_of(GenericType::Boolean, GenericType::Boolean)
}

fn not_found(cql_type: Option<&DataType>, host_type: Option<&GenericType>) -> CodecError {
    CodecError::CodecNotFound {
        cql_type: cql_type.cloned(),
        host_type: host_type.cloned(),
    }
}

pub struct DefaultCodecRegistry {
    log_prefix: String,
    primitive_codecs: Vec<CodecRef>,
    primitive_codecs_by_code: HashMap<u16, CodecRef>,
    user_codecs: Vec<CodecRef>,
    cache: DashMap<CacheKey, CodecRef>,
}

impl DefaultCodecRegistry {
    pub fn new(log_prefix: impl Into<String>) -> Self {
        let primitive_codecs: Vec<CodecRef> = PrimitiveCodec::all()
            .into_iter()
            .map(|codec| Arc::new(codec) as CodecRef)
            .collect();
        let mut primitive_codecs_by_code = HashMap::new();
        for codec in &primitive_codecs {
            primitive_codecs_by_code
                .entry(codec.cql_type().protocol_code())
                .or_insert_with(|| Arc::clone(codec));
        }
        Self {
            log_prefix: log_prefix.into(),
            primitive_codecs,
            primitive_codecs_by_code,
            user_codecs: Vec::new(),
            cache: DashMap::new(),
        }
    }

    /// Registers a user codec. User codecs are consulted in registration order, after
    /// the built-in primitives.
    pub fn with_codec(mut self, codec: CodecRef) -> Self {
        self.user_codecs.push(codec);
        self
    }

    /// Number of synthesized codecs held in the cache.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn primitive_for(&self, cql_type: &DataType) -> Option<&CodecRef> {
        self.primitive_codecs_by_code.get(&cql_type.protocol_code())
    }

    fn matches(codec: &CodecRef, host_type: &GenericType, covariant: bool) -> bool {
        if covariant {
            codec.host_type().is_supertype_of(host_type)
        } else {
            codec.accepts_host_type(host_type)
        }
    }

    fn lookup(
        &self,
        cql_type: &DataType,
        host_type: &GenericType,
        covariant: bool,
    ) -> Result<CodecRef, CodecError> {
        trace!(
            "[{}] Looking up codec for {} <-> {}",
            self.log_prefix, cql_type, host_type
        );
        if let Some(codec) = self
            .primitive_for(cql_type)
            .filter(|c| Self::matches(c, host_type, covariant))
        {
            trace!("[{}] Found matching primitive codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        if let Some(codec) = self
            .user_codecs
            .iter()
            .find(|c| c.accepts_cql_type(cql_type) && Self::matches(c, host_type, covariant))
        {
            trace!("[{}] Found matching user codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        self.cached_codec(Some(cql_type), Some(host_type), covariant)
    }

    fn lookup_host(&self, host_type: &GenericType, covariant: bool) -> Result<CodecRef, CodecError> {
        trace!(
            "[{}] Looking up codec for host type {} (covariant = {})",
            self.log_prefix, host_type, covariant
        );
        if let Some(codec) = self
            .primitive_codecs
            .iter()
            .find(|c| Self::matches(c, host_type, covariant))
        {
            trace!("[{}] Found matching primitive codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        if let Some(codec) = self
            .user_codecs
            .iter()
            .find(|c| Self::matches(c, host_type, covariant))
        {
            trace!("[{}] Found matching user codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        self.cached_codec(None, Some(host_type), covariant)
    }

    /// Serves a synthesized codec from the cache, creating it on a miss.
    ///
    /// Creation runs outside any cache shard lock since it recurses into the registry.
    /// When two callers race on the same key, the first insert wins and both receive it.
    fn cached_codec(
        &self,
        cql_type: Option<&DataType>,
        host_type: Option<&GenericType>,
        covariant: bool,
    ) -> Result<CodecRef, CodecError> {
        let key = (cql_type.cloned(), host_type.cloned(), covariant);
        if let Some(codec) = self.cache.get(&key).map(|entry| Arc::clone(entry.value())) {
            return Ok(codec);
        }
        trace!("[{}] Cache miss, creating codec", self.log_prefix);
        let created = self.create_codec(cql_type, host_type, covariant)?;
        let codec = Arc::clone(self.cache.entry(key).or_insert(created).value());
        Ok(codec)
    }

    /// Guesses the host type of a value, sampling one element of each collection.
    fn inspect_type(&self, value: &Value, cql_type: Option<&DataType>) -> GenericType {
        match value {
            Value::List(items) => match (items.first(), cql_type) {
                (None, None) => empty_list_type(),
                (None, Some(cql_type)) => Self::infer_host_type(cql_type),
                (Some(first), _) => {
                    let element = match cql_type {
                        Some(DataType::List(element)) => Some(element.as_ref()),
                        _ => None,
                    };
                    GenericType::list_of(self.inspect_type(first, element))
                }
            },
            Value::Set(items) => match (items.first(), cql_type) {
                (None, None) => empty_set_type(),
                (None, Some(cql_type)) => Self::infer_host_type(cql_type),
                (Some(first), _) => {
                    let element = match cql_type {
                        Some(DataType::Set(element)) => Some(element.as_ref()),
                        _ => None,
                    };
                    GenericType::set_of(self.inspect_type(first, element))
                }
            },
            Value::Map(entries) => match (entries.first(), cql_type) {
                (None, None) => empty_map_type(),
                (None, Some(cql_type)) => Self::infer_host_type(cql_type),
                (Some((key, value)), _) => {
                    let (key_type, value_type) = match cql_type {
                        Some(DataType::Map(k, v)) => (Some(k.as_ref()), Some(v.as_ref())),
                        _ => (None, None),
                    };
                    GenericType::map_of(
                        self.inspect_type(key, key_type),
                        self.inspect_type(value, value_type),
                    )
                }
            },
            other => other.raw_type(),
        }
    }

    /// Canonical host type for a wire type.
    fn infer_host_type(cql_type: &DataType) -> GenericType {
        match cql_type {
            DataType::List(element) => GenericType::list_of(Self::infer_host_type(element)),
            DataType::Set(element) => GenericType::set_of(Self::infer_host_type(element)),
            DataType::Map(key, value) => {
                GenericType::map_of(Self::infer_host_type(key), Self::infer_host_type(value))
            }
            DataType::Native(native) => host_type_of(*native),
            DataType::Custom(_) => GenericType::Blob,
            DataType::Udt(_) => GenericType::UdtValue,
            DataType::Tuple(_) => GenericType::TupleValue,
        }
    }

    fn create_codec(
        &self,
        cql_type: Option<&DataType>,
        host_type: Option<&GenericType>,
        covariant: bool,
    ) -> Result<CodecRef, CodecError> {
        match (cql_type, host_type) {
            (Some(cql_type), None) => self.create_codec_for_cql(cql_type),
            (None, Some(host_type)) => self.create_codec_for_host(host_type, covariant),
            (Some(cql_type), Some(host_type)) => {
                self.create_codec_for_types(cql_type, host_type, covariant)
            }
            (None, None) => Err(not_found(None, None)),
        }
    }

    fn create_codec_for_types(
        &self,
        cql_type: &DataType,
        host_type: &GenericType,
        covariant: bool,
    ) -> Result<CodecRef, CodecError> {
        // Parameterized host types resolve their elements against the matching wire type;
        // raw ones fall back to the wire type alone.
        let element = |cql: &DataType, host: Option<&GenericType>| match host {
            Some(host) => self.lookup(cql, host, covariant),
            None => self.codec_for_cql(cql),
        };
        let codec: CodecRef = match (cql_type, host_type) {
            (DataType::List(cql), GenericType::List(host)) => {
                Arc::new(ListCodec::new(element(cql.as_ref(), host.as_deref())?))
            }
            (DataType::Set(cql), GenericType::Set(host)) => {
                Arc::new(SetCodec::new(element(cql.as_ref(), host.as_deref())?))
            }
            (DataType::Map(cql_key, cql_value), GenericType::Map(host)) => {
                let (key, value) = match host {
                    Some((key, value)) => (Some(key.as_ref()), Some(value.as_ref())),
                    None => (None, None),
                };
                Arc::new(MapCodec::new(
                    element(cql_key.as_ref(), key)?,
                    element(cql_value.as_ref(), value)?,
                ))
            }
            (DataType::Tuple(components), GenericType::TupleValue) => self.tuple_codec(components)?,
            (DataType::Udt(udt), GenericType::UdtValue) => {
                let codecs = self.component_codecs(&udt.field_types)?;
                Arc::new(UdtCodec::new(udt.clone(), codecs))
            }
            (DataType::Custom(_), GenericType::Blob) => Arc::new(CustomCodec::new(cql_type.clone())),
            _ => return Err(not_found(Some(cql_type), Some(host_type))),
        };
        Ok(codec)
    }

    fn create_codec_for_host(
        &self,
        host_type: &GenericType,
        covariant: bool,
    ) -> Result<CodecRef, CodecError> {
        let codec: CodecRef = match host_type {
            GenericType::List(Some(element)) => {
                Arc::new(ListCodec::new(self.lookup_host(element, covariant)?))
            }
            GenericType::Set(Some(element)) => {
                Arc::new(SetCodec::new(self.lookup_host(element, covariant)?))
            }
            GenericType::Map(Some((key, value))) => Arc::new(MapCodec::new(
                self.lookup_host(key, covariant)?,
                self.lookup_host(value, covariant)?,
            )),
            _ => return Err(not_found(None, Some(host_type))),
        };
        Ok(codec)
    }

    fn create_codec_for_cql(&self, cql_type: &DataType) -> Result<CodecRef, CodecError> {
        let codec: CodecRef = match cql_type {
            DataType::List(element) => Arc::new(ListCodec::new(self.codec_for_cql(element)?)),
            DataType::Set(element) => Arc::new(SetCodec::new(self.codec_for_cql(element)?)),
            DataType::Map(key, value) => Arc::new(MapCodec::new(
                self.codec_for_cql(key)?,
                self.codec_for_cql(value)?,
            )),
            DataType::Tuple(components) => self.tuple_codec(components)?,
            DataType::Udt(udt) => {
                let codecs = self.component_codecs(&udt.field_types)?;
                Arc::new(UdtCodec::new(udt.clone(), codecs))
            }
            DataType::Custom(_) => Arc::new(CustomCodec::new(cql_type.clone())),
            DataType::Native(_) => return Err(not_found(Some(cql_type), None)),
        };
        Ok(codec)
    }

    fn tuple_codec(&self, components: &[DataType]) -> Result<CodecRef, CodecError> {
        let codecs = self.component_codecs(components)?;
        Ok(Arc::new(TupleCodec::new(components.to_vec(), codecs)))
    }

    fn component_codecs(&self, types: &[DataType]) -> Result<Vec<CodecRef>, CodecError> {
        types.iter().map(|t| self.codec_for_cql(t)).collect()
    }
}

impl CodecRegistry for DefaultCodecRegistry {
    fn codec_for_types(
        &self,
        cql_type: &DataType,
        host_type: &GenericType,
    ) -> Result<CodecRef, CodecError> {
        self.lookup(cql_type, host_type, false)
    }

    fn codec_for_class(
        &self,
        cql_type: &DataType,
        class: HostClass,
    ) -> Result<CodecRef, CodecError> {
        trace!(
            "[{}] Looking up codec for {} <-> {:?}",
            self.log_prefix, cql_type, class
        );
        if let Some(codec) = self.primitive_for(cql_type).filter(|c| c.accepts_class(class)) {
            trace!("[{}] Found matching primitive codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        if let Some(codec) = self
            .user_codecs
            .iter()
            .find(|c| c.accepts_cql_type(cql_type) && c.accepts_class(class))
        {
            trace!("[{}] Found matching user codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        self.cached_codec(Some(cql_type), Some(&GenericType::of(class)), false)
    }

    fn codec_for_cql(&self, cql_type: &DataType) -> Result<CodecRef, CodecError> {
        trace!("[{}] Looking up codec for CQL type {}", self.log_prefix, cql_type);
        if let Some(codec) = self.primitive_for(cql_type) {
            trace!("[{}] Found matching primitive codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        if let Some(codec) = self.user_codecs.iter().find(|c| c.accepts_cql_type(cql_type)) {
            trace!("[{}] Found matching user codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        self.cached_codec(Some(cql_type), None, false)
    }

    fn codec_for_cql_value(
        &self,
        cql_type: &DataType,
        value: &Value,
    ) -> Result<CodecRef, CodecError> {
        trace!(
            "[{}] Looking up codec for CQL type {} and value {}",
            self.log_prefix, cql_type, value
        );
        if let Some(codec) = self.primitive_for(cql_type).filter(|c| c.accepts_value(value)) {
            trace!("[{}] Found matching primitive codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        if let Some(codec) = self
            .user_codecs
            .iter()
            .find(|c| c.accepts_cql_type(cql_type) && c.accepts_value(value))
        {
            trace!("[{}] Found matching user codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        match value {
            Value::Tuple(_) => self.codec_for_class(cql_type, HostClass::TupleValue),
            Value::Udt(_) => self.codec_for_class(cql_type, HostClass::UdtValue),
            _ => {
                let host_type = self.inspect_type(value, Some(cql_type));
                trace!(
                    "[{}] Continuing based on inferred type {}",
                    self.log_prefix, host_type
                );
                self.cached_codec(Some(cql_type), Some(&host_type), true)
            }
        }
    }

    fn codec_for_value(&self, value: &Value) -> Result<CodecRef, CodecError> {
        trace!("[{}] Looking up codec for value {}", self.log_prefix, value);
        if let Some(codec) = self.primitive_codecs.iter().find(|c| c.accepts_value(value)) {
            trace!("[{}] Found matching primitive codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        if let Some(codec) = self.user_codecs.iter().find(|c| c.accepts_value(value)) {
            trace!("[{}] Found matching user codec {:?}", self.log_prefix, codec);
            return Ok(Arc::clone(codec));
        }
        match value {
            Value::Tuple(tuple) => self.codec_for_class(&tuple.data_type(), HostClass::TupleValue),
            Value::Udt(udt) => self.codec_for_class(&udt.data_type(), HostClass::UdtValue),
            _ => {
                let host_type = self.inspect_type(value, None);
                trace!(
                    "[{}] Continuing based on inferred type {}",
                    self.log_prefix, host_type
                );
                self.cached_codec(None, Some(&host_type), true)
            }
        }
    }

    fn codec_for_host(&self, host_type: &GenericType) -> Result<CodecRef, CodecError> {
        self.lookup_host(host_type, false)
    }
}
