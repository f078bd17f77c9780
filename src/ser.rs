//! serde serialization support, including [`to_value`].

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::array::JArray;
use super::error::Error;
use super::number::JNumber;
use super::object::JObject;
use super::string::JString;
use super::value::{DestructuredRef, JValue};

impl serde::ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Generic(msg.to_string())
    }
}

impl Serialize for JValue {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.destructure_ref() {
            DestructuredRef::Invalid => Err(serde::ser::Error::custom(
                "the invalid sentinel cannot be serialized",
            )),
            DestructuredRef::Null => serializer.serialize_unit(),
            DestructuredRef::Bool(b) => serializer.serialize_bool(b),
            DestructuredRef::Number(n) => n.serialize(serializer),
            DestructuredRef::String(s) => s.serialize(serializer),
            DestructuredRef::Array(v) => v.serialize(serializer),
            DestructuredRef::Object(o) => o.serialize(serializer),
        }
    }
}

impl Serialize for JNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if let Some(v) = self.to_i64() {
            serializer.serialize_i64(v)
        } else {
            serializer.serialize_f64(self.to_f64_lossy())
        }
    }
}

impl Serialize for JString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl Serialize for JArray {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_seq(Some(self.len()))?;
        for v in self {
            s.serialize_element(v)?;
        }
        s.end()
    }
}

impl Serialize for JObject {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut m = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self {
            m.serialize_entry(k, v)?;
        }
        m.end()
    }
}

/// Converts any `Serialize` type into a [`JValue`].
pub fn to_value<T: Serialize>(value: &T) -> Result<JValue, Error> {
    value.serialize(ValueSerializer)
}

struct ValueSerializer;

impl Serializer for ValueSerializer {
    type Ok = JValue;
    type Error = Error;

    type SerializeSeq = ArraySerializer;
    type SerializeTuple = ArraySerializer;
    type SerializeTupleStruct = ArraySerializer;
    type SerializeTupleVariant = VariantArraySerializer;
    type SerializeMap = ObjectSerializer;
    type SerializeStruct = ObjectSerializer;
    type SerializeStructVariant = VariantObjectSerializer;

    fn serialize_bool(self, v: bool) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_i8(self, v: i8) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_i16(self, v: i16) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_i32(self, v: i32) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_i64(self, v: i64) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_u8(self, v: u8) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_u16(self, v: u16) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_u32(self, v: u32) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_u64(self, v: u64) -> Result<JValue, Error> {
        Ok(JNumber::from(v).into())
    }
    fn serialize_f32(self, v: f32) -> Result<JValue, Error> {
        Ok(JNumber::try_from(v)?.into())
    }
    fn serialize_f64(self, v: f64) -> Result<JValue, Error> {
        Ok(JNumber::try_from(v)?.into())
    }
    fn serialize_char(self, v: char) -> Result<JValue, Error> {
        Ok(JString::intern(v.encode_utf8(&mut [0u8; 4])).into())
    }
    fn serialize_str(self, v: &str) -> Result<JValue, Error> {
        Ok(v.into())
    }
    fn serialize_bytes(self, v: &[u8]) -> Result<JValue, Error> {
        Ok(v.iter().copied().collect::<JArray>().into())
    }
    fn serialize_none(self) -> Result<JValue, Error> {
        Ok(JValue::NULL)
    }
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<JValue, Error> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<JValue, Error> {
        Ok(JValue::NULL)
    }
    fn serialize_unit_struct(self, _name: &'static str) -> Result<JValue, Error> {
        Ok(JValue::NULL)
    }
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<JValue, Error> {
        Ok(variant.into())
    }
    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<JValue, Error> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<JValue, Error> {
        let mut obj = JObject::new();
        obj.insert_internal(JString::intern(variant), value.serialize(ValueSerializer)?);
        Ok(obj.into())
    }
    fn serialize_seq(self, len: Option<usize>) -> Result<ArraySerializer, Error> {
        Ok(ArraySerializer {
            array: JArray::with_capacity(len.unwrap_or(0)),
        })
    }
    fn serialize_tuple(self, len: usize) -> Result<ArraySerializer, Error> {
        self.serialize_seq(Some(len))
    }
    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<ArraySerializer, Error> {
        self.serialize_seq(Some(len))
    }
    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantArraySerializer, Error> {
        Ok(VariantArraySerializer {
            variant,
            array: JArray::with_capacity(len),
        })
    }
    fn serialize_map(self, len: Option<usize>) -> Result<ObjectSerializer, Error> {
        Ok(ObjectSerializer {
            object: JObject::with_capacity(len.unwrap_or(0)),
            key: None,
        })
    }
    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<ObjectSerializer, Error> {
        self.serialize_map(Some(len))
    }
    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantObjectSerializer, Error> {
        Ok(VariantObjectSerializer {
            variant,
            object: JObject::with_capacity(len),
        })
    }
}

fn map_key(value: JValue) -> Result<JString, Error> {
    match value.destructure_ref() {
        DestructuredRef::String(_) => Ok(value.into_string().expect("checked kind")),
        // Numeric keys stringify, as serde_json does
        DestructuredRef::Number(n) => Ok(JString::intern(&crate::generate::number_lexeme(n))),
        _ => Err(Error::Generic("map keys must be strings".into())),
    }
}

struct ArraySerializer {
    array: JArray,
}

impl SerializeSeq for ArraySerializer {
    type Ok = JValue;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.array.push_internal(value.serialize(ValueSerializer)?);
        Ok(())
    }
    fn end(self) -> Result<JValue, Error> {
        Ok(self.array.into())
    }
}

impl serde::ser::SerializeTuple for ArraySerializer {
    type Ok = JValue;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        SerializeSeq::serialize_element(self, value)
    }
    fn end(self) -> Result<JValue, Error> {
        SerializeSeq::end(self)
    }
}

impl serde::ser::SerializeTupleStruct for ArraySerializer {
    type Ok = JValue;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        SerializeSeq::serialize_element(self, value)
    }
    fn end(self) -> Result<JValue, Error> {
        SerializeSeq::end(self)
    }
}

struct VariantArraySerializer {
    variant: &'static str,
    array: JArray,
}

impl serde::ser::SerializeTupleVariant for VariantArraySerializer {
    type Ok = JValue;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.array.push_internal(value.serialize(ValueSerializer)?);
        Ok(())
    }
    fn end(self) -> Result<JValue, Error> {
        let mut obj = JObject::new();
        obj.insert_internal(JString::intern(self.variant), self.array.into());
        Ok(obj.into())
    }
}

struct ObjectSerializer {
    object: JObject,
    key: Option<JString>,
}

impl SerializeMap for ObjectSerializer {
    type Ok = JValue;
    type Error = Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), Error> {
        self.key = Some(map_key(key.serialize(ValueSerializer)?)?);
        Ok(())
    }
    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let key = self
            .key
            .take()
            .ok_or_else(|| Error::Generic("map value without a key".into()))?;
        if key.is_empty() {
            return Err(Error::Generic("object keys must be non-empty".into()));
        }
        self.object
            .insert_internal(key, value.serialize(ValueSerializer)?);
        Ok(())
    }
    fn end(self) -> Result<JValue, Error> {
        Ok(self.object.into())
    }
}

impl serde::ser::SerializeStruct for ObjectSerializer {
    type Ok = JValue;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        SerializeMap::serialize_entry(self, key, value)
    }
    fn end(self) -> Result<JValue, Error> {
        SerializeMap::end(self)
    }
}

struct VariantObjectSerializer {
    variant: &'static str,
    object: JObject,
}

impl serde::ser::SerializeStructVariant for VariantObjectSerializer {
    type Ok = JValue;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        self.object
            .insert_internal(JString::intern(key), value.serialize(ValueSerializer)?);
        Ok(())
    }
    fn end(self) -> Result<JValue, Error> {
        let mut obj = JObject::new();
        obj.insert_internal(JString::intern(self.variant), self.object.into());
        Ok(obj.into())
    }
}
