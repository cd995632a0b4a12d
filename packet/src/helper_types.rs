// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

use std::ops::{Deref, DerefMut};

use bincode::{
    de::BorrowDecoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};

/// UTF-16LE string prefixed with its length in code units (u16).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UnicodeString(pub String);

impl Encode for UnicodeString {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> std::result::Result<(), EncodeError> {
        let units: Vec<u16> = self.0.encode_utf16().collect();
        let len: u16 = units
            .len()
            .try_into()
            .map_err(|_| EncodeError::Other("string too long for u16 length prefix"))?;
        len.encode(encoder)?;
        for unit in units {
            unit.encode(encoder)?;
        }
        Ok(())
    }
}

impl Decode for UnicodeString {
    fn decode<D: bincode::de::Decoder>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        let len = u16::decode(decoder)? as usize;
        let mut units = Vec::with_capacity(len);
        for _ in 0..len {
            units.push(u16::decode(decoder)?);
        }

        let str = String::from_utf16(&units)
            .map_err(|_| DecodeError::Other("invalid utf-16 in string"))?;
        Ok(UnicodeString(str))
    }
}

impl<'a> BorrowDecode<'a> for UnicodeString {
    fn borrow_decode<D: BorrowDecoder<'a>>(_decoder: &mut D) -> Result<Self, DecodeError> {
        unimplemented!();
    }
}

impl Deref for UnicodeString {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for UnicodeString {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<&str> for UnicodeString {
    fn from(value: &str) -> Self {
        UnicodeString(value.to_string())
    }
}

impl From<String> for UnicodeString {
    fn from(value: String) -> Self {
        UnicodeString(value)
    }
}

impl std::fmt::Display for UnicodeString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
