// Copyright © 2019 Intel Corporation
// Copyright 2023 Rivos, Inc.
// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::mem::size_of;

pub mod aml;
pub mod dsdt;
pub mod madt;
pub mod ssdt;

pub use aml::Aml;
pub use dsdt::Dsdt;
pub use madt::Madt;
pub use ssdt::Ssdt;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

// This is the creator ID that we will embed in ACPI tables that are created using this crate.
const PLATFORM_ACPI_CREATOR_ID: [u8; 4] = *b"AMD ";
// This is the created ID revision that we will embed in ACPI tables that are created using this
// crate.
const PLATFORM_ACPI_CREATOR_REVISION: u32 = 2;

/// Offset of the checksum byte inside every System Descriptor Table.
pub const SDT_CHECKSUM_OFFSET: usize = 9;

fn checksum(buf: &[&[u8]]) -> u8 {
    (255 - buf
        .iter()
        .flat_map(|b| b.iter())
        .fold(0u8, |acc, x| acc.wrapping_add(*x)))
    .wrapping_add(1)
}

/// Recompute the checksum byte of a complete table held in `table`.
///
/// The buffer must at least hold an [`SdtHeader`].
pub fn update_checksum(table: &mut [u8]) -> Result<()> {
    if table.len() < size_of::<SdtHeader>() {
        return Err(AcpiError::TableTooShort {
            expected: size_of::<SdtHeader>(),
            actual: table.len(),
        });
    }
    table[SDT_CHECKSUM_OFFSET] = 0;
    table[SDT_CHECKSUM_OFFSET] = checksum(&[table]);
    Ok(())
}

/// Returns true when all bytes of `table` sum up to zero.
pub fn checksum_is_valid(table: &[u8]) -> bool {
    table.iter().fold(0u8, |acc, x| acc.wrapping_add(*x)) == 0
}

#[derive(Debug, thiserror::Error, displaydoc::Display, PartialEq, Eq)]
pub enum AcpiError {
    /// Table is too short: got {actual} bytes, expected at least {expected}
    TableTooShort { expected: usize, actual: usize },
    /// Declared table length {declared} does not fit in a buffer of {actual} bytes
    LengthMismatch { declared: usize, actual: usize },
    /// Unexpected table signature: {0:?}
    InvalidSignature([u8; 4]),
    /// Malformed sub-structure at offset {0:#x}
    MalformedSubtable(usize),
    /// Table does not fit in a 32-bit length field
    TableTooLarge,
    /// Error creating AML bytecode: {0}
    Aml(#[from] aml::AmlError),
}

pub type Result<T> = std::result::Result<T, AcpiError>;

/// Header included in all System Descriptor Tables
#[repr(C, packed)]
#[derive(
    Clone, Debug, Copy, Default, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: U32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: U32,
    pub creator_id: [u8; 4],
    pub creator_revison: U32,
}

impl SdtHeader {
    pub(crate) fn new(
        signature: [u8; 4],
        length: u32,
        table_revision: u8,
        oem_id: [u8; 6],
        oem_table_id: [u8; 8],
        oem_revision: u32,
    ) -> Self {
        SdtHeader {
            signature,
            length: U32::new(length),
            revision: table_revision,
            checksum: 0,
            oem_id,
            oem_table_id,
            oem_revision: U32::new(oem_revision),
            creator_id: PLATFORM_ACPI_CREATOR_ID,
            creator_revison: U32::new(PLATFORM_ACPI_CREATOR_REVISION),
        }
    }

    /// Read the header at the start of `table` and check its declared length against the
    /// buffer size.
    pub fn parse(table: &[u8]) -> Result<Self> {
        let (header, _) =
            SdtHeader::read_from_prefix(table).map_err(|_| AcpiError::TableTooShort {
                expected: size_of::<SdtHeader>(),
                actual: table.len(),
            })?;
        let declared = header.length.get() as usize;
        if declared < size_of::<SdtHeader>() || declared > table.len() {
            return Err(AcpiError::LengthMismatch {
                declared,
                actual: table.len(),
            });
        }
        Ok(header)
    }
}

/// Converts a table length to the 32-bit value stored in [`SdtHeader::length`].
pub(crate) fn table_length(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| AcpiError::TableTooLarge)
}

/// A trait for functionality around System Descriptor Tables.
pub trait Sdt {
    /// Get the length of the table
    fn len(&self) -> usize;

    /// Return true if Sdt is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the whole table, header included, with a valid checksum.
    fn to_bytes(&self) -> Vec<u8>;
}
