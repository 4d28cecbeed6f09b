// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::mem::size_of;

use zerocopy::IntoBytes;

use crate::{AcpiError, Result, Sdt, SdtHeader, checksum, table_length};

/// DSDT signature.
pub const DSDT_SIGNATURE: [u8; 4] = *b"DSDT";

/// Differentiated System Description Table (DSDT)
///
/// Table that includes hardware definition blocks.
/// More information about this table can be found in the ACPI specification:
/// https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#differentiated-system-description-table-dsdt
#[derive(Debug, Clone)]
pub struct Dsdt {
    header: SdtHeader,
    definition_block: Vec<u8>,
}

impl Dsdt {
    pub fn new(
        oem_id: [u8; 6],
        oem_table_id: [u8; 8],
        oem_revision: u32,
        definition_block: Vec<u8>,
    ) -> Result<Self> {
        let header = SdtHeader::new(
            DSDT_SIGNATURE,
            table_length(size_of::<SdtHeader>() + definition_block.len())?,
            2,
            oem_id,
            oem_table_id,
            oem_revision,
        );

        let mut dsdt = Dsdt {
            header,
            definition_block,
        };

        dsdt.header.checksum =
            checksum(&[dsdt.header.as_bytes(), dsdt.definition_block.as_slice()]);
        Ok(dsdt)
    }

    /// Takes a copy of an installed DSDT.
    pub fn from_bytes(table: &[u8]) -> Result<Self> {
        let header = SdtHeader::parse(table)?;
        if header.signature != DSDT_SIGNATURE {
            return Err(AcpiError::InvalidSignature(header.signature));
        }
        let definition_block = table[size_of::<SdtHeader>()..header.length.get() as usize].to_vec();

        Ok(Dsdt {
            header,
            definition_block,
        })
    }

    pub fn oem_table_id(&self) -> [u8; 8] {
        self.header.oem_table_id
    }

    pub fn definition_block(&self) -> &[u8] {
        &self.definition_block
    }

    /// Appends AML to the definition block, then updates the table length and checksum.
    pub fn append_definition_block(&mut self, aml: &[u8]) -> Result<()> {
        let length = table_length(self.len() + aml.len())?;
        self.definition_block.extend_from_slice(aml);
        self.header.length.set(length);
        self.header.checksum = 0;
        self.header.checksum =
            checksum(&[self.header.as_bytes(), self.definition_block.as_slice()]);
        Ok(())
    }
}

impl Sdt for Dsdt {
    fn len(&self) -> usize {
        self.header.length.get() as usize
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(self.header.as_bytes());
        bytes.extend_from_slice(&self.definition_block);
        bytes
    }
}
