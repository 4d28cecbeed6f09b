// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::mem::size_of;

use zerocopy::IntoBytes;

use crate::{Result, Sdt, SdtHeader, checksum, table_length};

/// SSDT signature.
pub const SSDT_SIGNATURE: [u8; 4] = *b"SSDT";

/// Secondary System Description Table (SSDT)
///
/// A definition block that continues the DSDT namespace. Tables built here are either
/// installed on their own or merged into an existing DSDT by taking their
/// [`Ssdt::definition_block`].
#[derive(Debug, Clone)]
pub struct Ssdt {
    header: SdtHeader,
    definition_block: Vec<u8>,
}

impl Ssdt {
    pub fn new(
        oem_id: [u8; 6],
        oem_table_id: [u8; 8],
        oem_revision: u32,
        definition_block: Vec<u8>,
    ) -> Result<Self> {
        let header = SdtHeader::new(
            SSDT_SIGNATURE,
            table_length(size_of::<SdtHeader>() + definition_block.len())?,
            2,
            oem_id,
            oem_table_id,
            oem_revision,
        );

        let mut ssdt = Ssdt {
            header,
            definition_block,
        };
        ssdt.header.checksum =
            checksum(&[ssdt.header.as_bytes(), ssdt.definition_block.as_slice()]);
        Ok(ssdt)
    }

    /// AML body of the table, without its header.
    pub fn definition_block(&self) -> &[u8] {
        &self.definition_block
    }
}

impl Sdt for Ssdt {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum_is_valid;

    #[test]
    fn test_ssdt() {
        let ssdt = Ssdt::new(*b"AMD   ", *b"SSDTPROC", 0, vec![1, 2, 3]).unwrap();
        let bytes = ssdt.to_bytes();

        assert_eq!(ssdt.len(), 39);
        assert_eq!(&bytes[..4], b"SSDT");
        assert_eq!(&bytes[10..16], b"AMD   ");
        assert_eq!(&bytes[16..24], b"SSDTPROC");
        assert_eq!(ssdt.definition_block(), &[1, 2, 3]);
        assert!(checksum_is_valid(&bytes));
    }
}
