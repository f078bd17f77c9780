//! serde deserialization support, including [`from_value`].

use std::fmt::{self, Formatter};

use serde::de::{Error as DeError, MapAccess, SeqAccess, Unexpected, Visitor};
use serde::forward_to_deserialize_any;
use serde::{Deserialize, Deserializer};

use super::array::JArray;
use super::error::Error;
use super::number::JNumber;
use super::object::JObject;
use super::string::JString;
use super::value::{DestructuredRef, JValue};

impl DeError for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Generic(msg.to_string())
    }
}

impl<'de> Deserialize<'de> for JValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl<'de> Deserialize<'de> for JNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(NumberVisitor)
    }
}

impl<'de> Deserialize<'de> for JString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(StringVisitor)
    }
}

impl<'de> Deserialize<'de> for JArray {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(ArrayVisitor)
    }
}

impl<'de> Deserialize<'de> for JObject {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ObjectVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = JValue;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("any valid JSON value")
    }

    #[inline]
    fn visit_bool<E: DeError>(self, value: bool) -> Result<JValue, E> {
        Ok(value.into())
    }

    #[inline]
    fn visit_i64<E: DeError>(self, value: i64) -> Result<JValue, E> {
        Ok(value.into())
    }

    #[inline]
    fn visit_u64<E: DeError>(self, value: u64) -> Result<JValue, E> {
        Ok(JNumber::from(value).into())
    }

    #[inline]
    fn visit_f64<E: DeError>(self, value: f64) -> Result<JValue, E> {
        NumberVisitor.visit_f64(value).map(Into::into)
    }

    #[inline]
    fn visit_str<E: DeError>(self, value: &str) -> Result<JValue, E> {
        Ok(value.into())
    }

    #[inline]
    fn visit_string<E: DeError>(self, value: String) -> Result<JValue, E> {
        Ok(value.into())
    }

    #[inline]
    fn visit_none<E: DeError>(self) -> Result<JValue, E> {
        Ok(JValue::NULL)
    }

    #[inline]
    fn visit_some<D>(self, deserializer: D) -> Result<JValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        Deserialize::deserialize(deserializer)
    }

    #[inline]
    fn visit_unit<E: DeError>(self) -> Result<JValue, E> {
        Ok(JValue::NULL)
    }

    #[inline]
    fn visit_seq<V>(self, visitor: V) -> Result<JValue, V::Error>
    where
        V: SeqAccess<'de>,
    {
        ArrayVisitor.visit_seq(visitor).map(Into::into)
    }

    fn visit_map<V>(self, visitor: V) -> Result<JValue, V::Error>
    where
        V: MapAccess<'de>,
    {
        ObjectVisitor.visit_map(visitor).map(Into::into)
    }
}

struct NumberVisitor;

impl<'de> Visitor<'de> for NumberVisitor {
    type Value = JNumber;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("JSON number")
    }

    #[inline]
    fn visit_i64<E: DeError>(self, value: i64) -> Result<JNumber, E> {
        Ok(value.into())
    }

    #[inline]
    fn visit_u64<E: DeError>(self, value: u64) -> Result<JNumber, E> {
        Ok(value.into())
    }

    #[inline]
    fn visit_f64<E: DeError>(self, value: f64) -> Result<JNumber, E> {
        JNumber::try_from(value)
            .map_err(|_| DeError::invalid_value(Unexpected::Float(value), &self))
    }
}

struct StringVisitor;

impl<'de> Visitor<'de> for StringVisitor {
    type Value = JString;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("JSON string")
    }

    #[inline]
    fn visit_str<E: DeError>(self, value: &str) -> Result<JString, E> {
        Ok(value.into())
    }
}

struct ArrayVisitor;

impl<'de> Visitor<'de> for ArrayVisitor {
    type Value = JArray;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("JSON array")
    }

    #[inline]
    fn visit_seq<V>(self, mut visitor: V) -> Result<JArray, V::Error>
    where
        V: SeqAccess<'de>,
    {
        let mut arr = JArray::with_capacity(visitor.size_hint().unwrap_or(0));
        while let Some(v) = visitor.next_element::<JValue>()? {
            arr.push_internal(v);
        }
        Ok(arr)
    }
}

struct ObjectVisitor;

impl<'de> Visitor<'de> for ObjectVisitor {
    type Value = JObject;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("JSON object")
    }

    fn visit_map<V>(self, mut visitor: V) -> Result<JObject, V::Error>
    where
        V: MapAccess<'de>,
    {
        let mut obj = JObject::with_capacity(visitor.size_hint().unwrap_or(0));
        while let Some((k, v)) = visitor.next_entry::<JString, JValue>()? {
            if k.is_empty() {
                return Err(DeError::custom("object keys must be non-empty"));
            }
            obj.insert_internal(k, v);
        }
        Ok(obj)
    }
}

/// Deserializes any `Deserialize` type from a borrowed [`JValue`].
pub fn from_value<'de, T: Deserialize<'de>>(value: &'de JValue) -> Result<T, Error> {
    T::deserialize(ValueDeserializer(value))
}

struct ValueDeserializer<'de>(&'de JValue);

impl<'de> Deserializer<'de> for ValueDeserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        match self.0.destructure_ref() {
            DestructuredRef::Invalid => Err(Error::Generic(
                "the invalid sentinel cannot be deserialized".into(),
            )),
            DestructuredRef::Null => visitor.visit_unit(),
            DestructuredRef::Bool(b) => visitor.visit_bool(b),
            DestructuredRef::Number(n) => {
                if let Some(i) = n.to_i64() {
                    visitor.visit_i64(i)
                } else {
                    visitor.visit_f64(n.to_f64_lossy())
                }
            }
            DestructuredRef::String(s) => visitor.visit_borrowed_str(s.as_str()),
            DestructuredRef::Array(a) => {
                let mut seq = serde::de::value::SeqDeserializer::new(
                    a.iter().map(ValueDeserializer),
                );
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
            DestructuredRef::Object(o) => {
                let mut map = serde::de::value::MapDeserializer::new(
                    o.iter().map(|(k, v)| (k.as_str(), ValueDeserializer(v))),
                );
                let value = visitor.visit_map(&mut map)?;
                map.end()?;
                Ok(value)
            }
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Error>
    where
        V: Visitor<'de>,
    {
        if self.0.is_null() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple tuple_struct
        map struct enum identifier ignored_any
    }
}

impl<'de> serde::de::IntoDeserializer<'de, Error> for ValueDeserializer<'de> {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{to_value, vjson};
    use serde::Serialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Config {
        name: String,
        retries: u32,
        thresholds: Vec<f64>,
        verbose: Option<bool>,
    }

    #[test]
    fn round_trips_through_serde() {
        let config = Config {
            name: "svc".into(),
            retries: 3,
            thresholds: vec![0.5, 0.9],
            verbose: None,
        };
        let value = to_value(&config).unwrap();
        assert_eq!(
            value,
            vjson!({"name": "svc", "retries": 3, "thresholds": [0.5, 0.9], "verbose": null})
        );
        let back: Config = from_value(&value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn interoperates_with_serde_json() {
        let text = r#"{"a": [1, 2.5], "b": null}"#;
        let via_serde: JValue = serde_json::from_str(text).unwrap();
        let via_parser = crate::parse(text).unwrap();
        assert_eq!(via_serde, via_parser);
    }

    #[test]
    fn rejects_non_finite_and_empty_keys() {
        assert!(to_value(&f64::NAN).is_err());
        let with_empty_key: Result<JValue, _> =
            serde_json::from_str(r#"{"": 1}"#).map_err(|e| e.to_string());
        assert!(with_empty_key.is_err());
    }
}
