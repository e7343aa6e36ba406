use super::CodecError;
use super::Value;
use serde::de;
use serde::de::DeserializeOwned;
use serde::de::DeserializeSeed;
use serde::de::IntoDeserializer;
use serde::de::Unexpected;
use serde::de::Visitor;
use serde::de::value::MapDeserializer;
use serde::de::value::SeqDeserializer;
use serde::de::value::StringDeserializer;
use serde::forward_to_deserialize_any;

/// Deserializes a typed value out of a value graph.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    T::deserialize(value)
}

impl Value {
    fn unexpected(&self) -> Unexpected<'_> {
        match self {
            Self::Undefined => Unexpected::Other("undefined"),
            Self::Null => Unexpected::Unit,
            Self::Bool(b) => Unexpected::Bool(*b),
            Self::Number(n) => Unexpected::Float(*n),
            Self::String(s) => Unexpected::Str(s),
            Self::Array(_) => Unexpected::Seq,
            Self::Object(_) | Self::Map(_) => Unexpected::Map,
        }
    }
}

impl<'de> IntoDeserializer<'de, CodecError> for Value {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

/// Integral numbers are offered as integers so integer fields accept them;
/// float visitors convert back without loss.
fn visit_number<'de, V: Visitor<'de>>(n: f64, visitor: V) -> Result<V::Value, CodecError> {
    let integral = n.is_finite() && n.fract() == 0.0 && !(n == 0.0 && n.is_sign_negative());
    if integral && n >= 0.0 && n < 18_446_744_073_709_551_616.0 {
        visitor.visit_u64(n as u64)
    } else if integral && n >= -9_223_372_036_854_775_808.0 && n < 0.0 {
        visitor.visit_i64(n as i64)
    } else {
        visitor.visit_f64(n)
    }
}

impl<'de> de::Deserializer<'de> for Value {
    type Error = CodecError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self {
            Value::Undefined | Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Number(n) => visit_number(n, visitor),
            Value::String(s) => visitor.visit_string(s),
            Value::Array(items) => {
                let mut seq = SeqDeserializer::new(items.into_iter());
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
            Value::Object(fields) => {
                let mut map = MapDeserializer::new(fields.into_iter());
                let value = visitor.visit_map(&mut map)?;
                map.end()?;
                Ok(value)
            }
            Value::Map(entries) => {
                let mut map = MapDeserializer::new(entries.into_iter());
                let value = visitor.visit_map(&mut map)?;
                map.end()?;
                Ok(value)
            }
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self {
            Value::Undefined | Value::Null => visitor.visit_none(),
            other => visitor.visit_some(other),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        match self {
            Value::String(variant) => {
                let variant: StringDeserializer<CodecError> = variant.into_deserializer();
                visitor.visit_enum(variant)
            }
            Value::Object(fields) if fields.len() == 1 => {
                let mut fields = fields.into_iter();
                match fields.next() {
                    Some((variant, value)) => visitor.visit_enum(EnumDeserializer { variant, value }),
                    None => Err(de::Error::invalid_length(0, &"an enum variant")),
                }
            }
            other => Err(de::Error::invalid_type(other.unexpected(), &"an enum variant")),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

struct EnumDeserializer {
    variant: String,
    value: Value,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer {
    type Error = CodecError;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, VariantDeserializer), CodecError> {
        let variant: StringDeserializer<CodecError> = self.variant.into_deserializer();
        let variant = seed.deserialize(variant)?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Value,
}

impl<'de> de::VariantAccess<'de> for VariantDeserializer {
    type Error = CodecError;

    fn unit_variant(self) -> Result<(), CodecError> {
        match self.value {
            Value::Undefined | Value::Null => Ok(()),
            other => Err(de::Error::invalid_type(other.unexpected(), &"a unit variant")),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, CodecError> {
        seed.deserialize(self.value)
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        de::Deserializer::deserialize_any(self.value, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        de::Deserializer::deserialize_any(self.value, visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::super::decode;
    use super::super::encode;
    use super::super::to_value;
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Shape {
        Empty,
        Number(f64),
        Pair(u32, String),
        Named { id: u32, label: Option<String> },
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        id: u32,
        pins: BTreeMap<u32, u32>,
        parent: Option<u32>,
        registers: Vec<f64>,
        shapes: Vec<Shape>,
    }

    #[test]
    fn test_typed_round_trip_through_text() {
        let holder = Holder {
            id: 7,
            pins: BTreeMap::from([(0, 2), (5, 3)]),
            parent: None,
            registers: vec![f64::NAN, -0.0, 1.25, f64::INFINITY],
            shapes: vec![
                Shape::Empty,
                Shape::Number(-3.0),
                Shape::Pair(4, "d0".into()),
                Shape::Named {
                    id: 9,
                    label: Some("sorter".into()),
                },
            ],
        };
        let text = encode(&to_value(&holder).unwrap()).unwrap();
        let back: Holder = from_value(decode(&text).unwrap()).unwrap();

        assert_eq!(back.id, holder.id);
        assert_eq!(back.pins, holder.pins);
        assert_eq!(back.parent, None);
        assert_eq!(back.shapes, holder.shapes);
        assert!(back.registers[0].is_nan());
        assert!(back.registers[1] == 0.0 && back.registers[1].is_sign_negative());
        assert_eq!(&back.registers[2..], &holder.registers[2..]);
    }

    #[test]
    fn test_rust_maps_become_tagged_maps() {
        let pins = BTreeMap::from([(1u32, 10u32)]);
        let value = to_value(&pins).unwrap();
        assert_eq!(
            value,
            Value::Map(vec![(Value::Number(1.0), Value::Number(10.0))])
        );
    }

    #[test]
    fn test_none_is_undefined() {
        let value = to_value(&Option::<u32>::None).unwrap();
        assert!(value.is_undefined());
        let back: Option<u32> = from_value(Value::Undefined).unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let err = from_value::<u32>(Value::from("five")).unwrap_err();
        assert!(matches!(err, CodecError::Message(_)));
    }
}
