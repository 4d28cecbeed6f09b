// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! SMBIOS structure layouts.
//!
//! Every structure is a formatted area starting with a [`SmbiosHeader`], followed by an
//! unformatted string set. Strings are referenced from the formatted area by their 1-based
//! position in the set; the set ends with an additional NUL byte.

pub mod type9;

pub use type9::Type9;
use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Handle value asking the registry to assign a unique handle.
pub const SMBIOS_HANDLE_PI_RESERVED: u16 = 0xFFFE;

#[derive(Debug, thiserror::Error, displaydoc::Display, PartialEq, Eq)]
pub enum SmbiosError {
    /// String contains an embedded NUL byte: {0:?}
    InvalidString(String),
    /// More than 255 strings in a single structure
    TooManyStrings,
    /// Formatted area of {0} bytes does not fit in the structure length field
    StructureTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, SmbiosError>;

/// Header included in all SMBIOS structures.
#[repr(C, packed)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable,
    Unaligned,
)]
pub struct SmbiosHeader {
    pub r#type: u8,
    pub length: u8,
    pub handle: U16,
}

impl SmbiosHeader {
    pub fn new(r#type: u8, length: u8) -> Self {
        SmbiosHeader {
            r#type,
            length,
            handle: U16::new(SMBIOS_HANDLE_PI_RESERVED),
        }
    }
}

/// Unformatted string set trailing a structure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StringTable {
    strings: Vec<String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `s` to the set and returns the index used to reference it.
    pub fn add(&mut self, s: &str) -> Result<u8> {
        if s.as_bytes().contains(&0) {
            return Err(SmbiosError::InvalidString(s.to_string()));
        }
        let index = u8::try_from(self.strings.len() + 1).map_err(|_| SmbiosError::TooManyStrings)?;
        self.strings.push(s.to_string());
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Serializes the set. An empty set still takes two NUL bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.strings.is_empty() {
            return vec![0, 0];
        }
        let mut bytes = Vec::new();
        for s in &self.strings {
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
        }
        bytes.push(0);
        bytes
    }
}

/// A structure ready to be handed to the SMBIOS registry.
pub trait SmbiosRecord {
    /// Structure type stored in the header.
    fn structure_type(&self) -> u8;

    /// Formatted area followed by the string set.
    fn to_bytes(&self) -> Result<Vec<u8>>;
}
