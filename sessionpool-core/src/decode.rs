//! Provides [`Decode`] for decoding values from the database.

use crate::error::{mismatched_types, BoxDynError, UnexpectedNullError};
use crate::value::Value;

/// A type that can be decoded from a [`Value`] returned by the database.
///
/// Decoding `NULL` into anything but an `Option` (or [`Value`] itself) is an error.
pub trait Decode: Sized {
    fn decode(value: Value) -> Result<Self, BoxDynError>;
}

impl Decode for Value {
    #[inline]
    fn decode(value: Value) -> Result<Self, BoxDynError> {
        Ok(value)
    }
}

impl<T> Decode for Option<T>
where
    T: Decode,
{
    fn decode(value: Value) -> Result<Self, BoxDynError> {
        match value {
            Value::Null => Ok(None),
            value => T::decode(value).map(Some),
        }
    }
}

macro_rules! impl_decode_int {
    ($($ty:ty),*) => {
        $(
            impl Decode for $ty {
                fn decode(value: Value) -> Result<Self, BoxDynError> {
                    match value {
                        Value::Int(v) => Ok(<$ty>::try_from(v)?),
                        Value::Null => Err(UnexpectedNullError.into()),
                        other => Err(mismatched_types::<$ty>(&other)),
                    }
                }
            }
        )*
    };
}

impl_decode_int!(i16, i32, i64, u32);

impl Decode for bool {
    fn decode(value: Value) -> Result<Self, BoxDynError> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Null => Err(UnexpectedNullError.into()),
            other => Err(mismatched_types::<bool>(&other)),
        }
    }
}

impl Decode for f64 {
    fn decode(value: Value) -> Result<Self, BoxDynError> {
        match value {
            Value::Float(v) => Ok(v),
            // lossless for every integer a sane column will hold
            Value::Int(v) => Ok(v as f64),
            Value::Null => Err(UnexpectedNullError.into()),
            other => Err(mismatched_types::<f64>(&other)),
        }
    }
}

impl Decode for String {
    fn decode(value: Value) -> Result<Self, BoxDynError> {
        match value {
            Value::Text(v) => Ok(v),
            Value::Null => Err(UnexpectedNullError.into()),
            other => Err(mismatched_types::<String>(&other)),
        }
    }
}

impl Decode for Vec<u8> {
    fn decode(value: Value) -> Result<Self, BoxDynError> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            Value::Null => Err(UnexpectedNullError.into()),
            other => Err(mismatched_types::<Vec<u8>>(&other)),
        }
    }
}
