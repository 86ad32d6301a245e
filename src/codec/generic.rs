//! Host-side type descriptors.
//!
//! [`GenericType`] is the in-process counterpart of a [`DataType`](super::DataType): the
//! shape a wire value is materialized as. Collection host types may be *raw* (element
//! type unknown), which is what a lookup by [`HostClass`] produces.
use std::fmt;

/// Raw host class, i.e. a [`GenericType`] with any type parameters erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostClass {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Blob,
    Varint,
    Decimal,
    Timestamp,
    Date,
    Time,
    Uuid,
    Inet,
    Duration,
    List,
    Set,
    Map,
    TupleValue,
    UdtValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GenericType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Blob,
    Varint,
    Decimal,
    Timestamp,
    Date,
    Time,
    Uuid,
    Inet,
    Duration,
    /// `None` is the raw, unparameterized list.
    List(Option<Box<GenericType>>),
    Set(Option<Box<GenericType>>),
    Map(Option<(Box<GenericType>, Box<GenericType>)>),
    TupleValue,
    UdtValue,
}

impl GenericType {
    pub fn list_of(element: GenericType) -> Self {
        GenericType::List(Some(Box::new(element)))
    }

    pub fn set_of(element: GenericType) -> Self {
        GenericType::Set(Some(Box::new(element)))
    }

    pub fn map_of(key: GenericType, value: GenericType) -> Self {
        GenericType::Map(Some((Box::new(key), Box::new(value))))
    }

    /// The type a lookup by raw class starts from.
    pub fn of(class: HostClass) -> Self {
        match class {
            HostClass::Boolean => GenericType::Boolean,
            HostClass::Byte => GenericType::Byte,
            HostClass::Short => GenericType::Short,
            HostClass::Int => GenericType::Int,
            HostClass::Long => GenericType::Long,
            HostClass::Float => GenericType::Float,
            HostClass::Double => GenericType::Double,
            HostClass::String => GenericType::String,
            HostClass::Blob => GenericType::Blob,
            HostClass::Varint => GenericType::Varint,
            HostClass::Decimal => GenericType::Decimal,
            HostClass::Timestamp => GenericType::Timestamp,
            HostClass::Date => GenericType::Date,
            HostClass::Time => GenericType::Time,
            HostClass::Uuid => GenericType::Uuid,
            HostClass::Inet => GenericType::Inet,
            HostClass::Duration => GenericType::Duration,
            HostClass::List => GenericType::List(None),
            HostClass::Set => GenericType::Set(None),
            HostClass::Map => GenericType::Map(None),
            HostClass::TupleValue => GenericType::TupleValue,
            HostClass::UdtValue => GenericType::UdtValue,
        }
    }

    pub fn raw_class(&self) -> HostClass {
        match self {
            GenericType::Boolean => HostClass::Boolean,
            GenericType::Byte => HostClass::Byte,
            GenericType::Short => HostClass::Short,
            GenericType::Int => HostClass::Int,
            GenericType::Long => HostClass::Long,
            GenericType::Float => HostClass::Float,
            GenericType::Double => HostClass::Double,
            GenericType::String => HostClass::String,
            GenericType::Blob => HostClass::Blob,
            GenericType::Varint => HostClass::Varint,
            GenericType::Decimal => HostClass::Decimal,
            GenericType::Timestamp => HostClass::Timestamp,
            GenericType::Date => HostClass::Date,
            GenericType::Time => HostClass::Time,
            GenericType::Uuid => HostClass::Uuid,
            GenericType::Inet => HostClass::Inet,
            GenericType::Duration => HostClass::Duration,
            GenericType::List(_) => HostClass::List,
            GenericType::Set(_) => HostClass::Set,
            GenericType::Map(_) => HostClass::Map,
            GenericType::TupleValue => HostClass::TupleValue,
            GenericType::UdtValue => HostClass::UdtValue,
        }
    }

    pub fn is_parameterized(&self) -> bool {
        matches!(
            self,
            GenericType::List(Some(_)) | GenericType::Set(Some(_)) | GenericType::Map(Some(_))
        )
    }

    /// Whether a value of type `other` can be handled by something declared as `self`.
    ///
    /// Type parameters are invariant; only a raw collection is a supertype of its
    /// parameterized forms.
    pub fn is_supertype_of(&self, other: &GenericType) -> bool {
        match (self, other) {
            (GenericType::List(None), GenericType::List(_))
            | (GenericType::Set(None), GenericType::Set(_))
            | (GenericType::Map(None), GenericType::Map(_)) => true,
            _ => self == other,
        }
    }
}

impl fmt::Display for GenericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenericType::Boolean => write!(f, "bool"),
            GenericType::Byte => write!(f, "i8"),
            GenericType::Short => write!(f, "i16"),
            GenericType::Int => write!(f, "i32"),
            GenericType::Long => write!(f, "i64"),
            GenericType::Float => write!(f, "f32"),
            GenericType::Double => write!(f, "f64"),
            GenericType::String => write!(f, "String"),
            GenericType::Blob => write!(f, "Blob"),
            GenericType::Varint => write!(f, "Varint"),
            GenericType::Decimal => write!(f, "Decimal"),
            GenericType::Timestamp => write!(f, "Timestamp"),
            GenericType::Date => write!(f, "Date"),
            GenericType::Time => write!(f, "Time"),
            GenericType::Uuid => write!(f, "Uuid"),
            GenericType::Inet => write!(f, "IpAddr"),
            GenericType::Duration => write!(f, "CqlDuration"),
            GenericType::List(None) => write!(f, "List"),
            GenericType::List(Some(element)) => write!(f, "List<{element}>"),
            GenericType::Set(None) => write!(f, "Set"),
            GenericType::Set(Some(element)) => write!(f, "Set<{element}>"),
            GenericType::Map(None) => write!(f, "Map"),
            GenericType::Map(Some((key, value))) => write!(f, "Map<{key}, {value}>"),
            GenericType::TupleValue => write!(f, "TupleValue"),
            GenericType::UdtValue => write!(f, "UdtValue"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_collections_are_supertypes() {
        let ints = GenericType::list_of(GenericType::Int);
        assert!(GenericType::List(None).is_supertype_of(&ints));
        assert!(ints.is_supertype_of(&ints));
        assert!(!ints.is_supertype_of(&GenericType::List(None)));
        assert!(!GenericType::list_of(GenericType::Long).is_supertype_of(&ints));
        assert!(!GenericType::Set(None).is_supertype_of(&ints));
    }

    #[test]
    fn class_round_trip() {
        let ty = GenericType::map_of(GenericType::String, GenericType::Int);
        assert_eq!(ty.raw_class(), HostClass::Map);
        assert_eq!(GenericType::of(HostClass::Map), GenericType::Map(None));
        assert!(ty.is_parameterized());
        assert!(!GenericType::of(HostClass::Map).is_parameterized());
    }

    #[test]
    fn display() {
        let ty = GenericType::map_of(GenericType::String, GenericType::list_of(GenericType::Uuid));
        assert_eq!(ty.to_string(), "Map<String, List<Uuid>>");
    }
}
