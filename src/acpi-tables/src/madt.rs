// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// Copyright 2023 Rivos, Inc.
//
// SPDX-License-Identifier: Apache-2.0

use std::mem::size_of;

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{AcpiError, Result, Sdt, SdtHeader, checksum, table_length};

/// MADT signature.
pub const MADT_SIGNATURE: [u8; 4] = *b"APIC";
/// MADT revision defined by ACPI 6.5.
pub const MADT_REVISION: u8 = 6;

/// Interrupt Controller Structure types used by this crate.
pub const MADT_IO_APIC: u8 = 0x01;
pub const MADT_INTERRUPT_SOURCE_OVERRIDE: u8 = 0x02;
pub const MADT_LOCAL_X2APIC: u8 = 0x09;
pub const MADT_LOCAL_X2APIC_NMI: u8 = 0x0A;
/// Types 0x18-0x7F are reserved, OSPM skips structures carrying them.
pub const MADT_RESERVED_TYPE: u8 = 0x7F;

const MADT_CPU_ENABLE_FLAG: u32 = 0;

/// Type and length fields shared by every Interrupt Controller Structure.
#[repr(C, packed)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable,
    Unaligned,
)]
pub struct SubtableHeader {
    pub r#type: u8,
    pub length: u8,
}

#[repr(C, packed)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable,
    Unaligned,
)]
pub struct IoApic {
    pub r#type: u8,
    pub length: u8,
    pub ioapic_id: u8,
    pub reserved: u8,
    pub apic_address: U32,
    pub gsi_base: U32,
}

impl IoApic {
    pub fn new(ioapic_id: u8, apic_address: u32, gsi_base: u32) -> Self {
        IoApic {
            r#type: MADT_IO_APIC,
            length: 12,
            ioapic_id,
            reserved: 0,
            apic_address: U32::new(apic_address),
            gsi_base: U32::new(gsi_base),
        }
    }
}

#[repr(C, packed)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable,
    Unaligned,
)]
pub struct InterruptSourceOverride {
    pub r#type: u8,
    pub length: u8,
    pub bus: u8,
    pub source: u8,
    pub gsi: U32,
    pub flags: U16,
}

impl InterruptSourceOverride {
    pub fn new(source: u8, gsi: u32, flags: u16) -> Self {
        InterruptSourceOverride {
            r#type: MADT_INTERRUPT_SOURCE_OVERRIDE,
            length: 10,
            bus: 0,
            source,
            gsi: U32::new(gsi),
            flags: U16::new(flags),
        }
    }
}

#[repr(C, packed)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable,
    Unaligned,
)]
pub struct LocalX2Apic {
    pub r#type: u8,
    pub length: u8,
    pub reserved: U16,
    pub x2apic_id: U32,
    pub flags: U32,
    pub processor_uid: U32,
}

impl LocalX2Apic {
    pub fn new(x2apic_id: u32, processor_uid: u32, enabled: bool) -> Self {
        Self {
            r#type: MADT_LOCAL_X2APIC,
            length: 16,
            reserved: U16::ZERO,
            x2apic_id: U32::new(x2apic_id),
            flags: U32::new(u32::from(enabled) << MADT_CPU_ENABLE_FLAG),
            processor_uid: U32::new(processor_uid),
        }
    }
}

#[repr(C, packed)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable,
    Unaligned,
)]
pub struct LocalX2ApicNmi {
    pub r#type: u8,
    pub length: u8,
    pub flags: U16,
    pub processor_uid: U32,
    pub local_x2apic_lint: u8,
    pub reserved: [u8; 3],
}

impl LocalX2ApicNmi {
    pub fn new(processor_uid: u32, flags: u16, lint: u8) -> Self {
        Self {
            r#type: MADT_LOCAL_X2APIC_NMI,
            length: 12,
            flags: U16::new(flags),
            processor_uid: U32::new(processor_uid),
            local_x2apic_lint: lint,
            reserved: [0; 3],
        }
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
pub struct MadtHeader {
    pub sdt: SdtHeader,
    pub base_address: U32,
    pub flags: U32,
}

/// One decoded Interrupt Controller Structure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MadtEntry {
    IoApic(IoApic),
    InterruptSourceOverride(InterruptSourceOverride),
    LocalX2Apic(LocalX2Apic),
    LocalX2ApicNmi(LocalX2ApicNmi),
    /// Any structure type this crate does not decode.
    Other(SubtableHeader),
}

impl MadtEntry {
    /// Bytes covering the decoded fields of the structure.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MadtEntry::IoApic(s) => s.as_bytes(),
            MadtEntry::InterruptSourceOverride(s) => s.as_bytes(),
            MadtEntry::LocalX2Apic(s) => s.as_bytes(),
            MadtEntry::LocalX2ApicNmi(s) => s.as_bytes(),
            MadtEntry::Other(s) => s.as_bytes(),
        }
    }
}

/// Iterator over the Interrupt Controller Structures of a MADT held in a byte buffer.
///
/// Yields the offset of every structure from the start of the table along with its decoded
/// value. Iteration stops at the declared table length; a structure that is empty or crosses
/// the declared length yields [`AcpiError::MalformedSubtable`] and ends the iteration.
#[derive(Debug)]
pub struct MadtSubtables<'a> {
    table: &'a [u8],
    offset: usize,
}

impl<'a> MadtSubtables<'a> {
    pub fn new(table: &'a [u8]) -> Result<Self> {
        let header = SdtHeader::parse(table)?;
        if header.signature != MADT_SIGNATURE {
            return Err(AcpiError::InvalidSignature(header.signature));
        }
        let end = header.length.get() as usize;
        if end < size_of::<MadtHeader>() {
            return Err(AcpiError::TableTooShort {
                expected: size_of::<MadtHeader>(),
                actual: end,
            });
        }

        Ok(MadtSubtables {
            table: &table[..end],
            offset: size_of::<MadtHeader>(),
        })
    }

    fn decode(offset: usize, bytes: &[u8]) -> Result<MadtEntry> {
        fn read<T: FromBytes>(offset: usize, bytes: &[u8]) -> Result<T> {
            T::read_from_prefix(bytes)
                .map(|(value, _)| value)
                .map_err(|_| AcpiError::MalformedSubtable(offset))
        }

        let header: SubtableHeader = read(offset, bytes)?;
        Ok(match header.r#type {
            MADT_IO_APIC => MadtEntry::IoApic(read(offset, bytes)?),
            MADT_INTERRUPT_SOURCE_OVERRIDE => {
                MadtEntry::InterruptSourceOverride(read(offset, bytes)?)
            }
            MADT_LOCAL_X2APIC => MadtEntry::LocalX2Apic(read(offset, bytes)?),
            MADT_LOCAL_X2APIC_NMI => MadtEntry::LocalX2ApicNmi(read(offset, bytes)?),
            _ => MadtEntry::Other(header),
        })
    }
}

impl Iterator for MadtSubtables<'_> {
    type Item = Result<(usize, MadtEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.table.len() {
            return None;
        }

        let offset = self.offset;
        let remaining = &self.table[offset..];
        let length = match remaining.get(1) {
            Some(&length) if length >= 2 && usize::from(length) <= remaining.len() => {
                usize::from(length)
            }
            _ => {
                self.offset = self.table.len();
                return Some(Err(AcpiError::MalformedSubtable(offset)));
            }
        };

        self.offset += length;
        let entry = Self::decode(offset, &remaining[..length]);
        if entry.is_err() {
            self.offset = self.table.len();
        }
        Some(entry.map(|entry| (offset, entry)))
    }
}

/// Multiple APIC Description Table (MADT)
///
/// This table includes information about the interrupt controllers of the device.
/// More information about this table can be found in the ACPI specification:
/// https://uefi.org/specs/ACPI/6.5/05_ACPI_Software_Programming_Model.html#multiple-apic-description-table-madt
#[derive(Debug)]
pub struct Madt {
    header: MadtHeader,
    interrupt_controllers: Vec<u8>,
}

impl Madt {
    pub fn new(
        oem_id: [u8; 6],
        oem_table_id: [u8; 8],
        oem_revision: u32,
        base_address: u32,
        interrupt_controllers: Vec<u8>,
    ) -> Result<Self> {
        let length = size_of::<MadtHeader>() + interrupt_controllers.len();
        let sdt_header = SdtHeader::new(
            MADT_SIGNATURE,
            table_length(length)?,
            MADT_REVISION,
            oem_id,
            oem_table_id,
            oem_revision,
        );

        let mut header = MadtHeader {
            sdt: sdt_header,
            base_address: U32::new(base_address),
            flags: U32::ZERO,
        };

        header.sdt.checksum = checksum(&[header.as_bytes(), interrupt_controllers.as_bytes()]);

        Ok(Madt {
            header,
            interrupt_controllers,
        })
    }
}

impl Sdt for Madt {
    fn len(&self) -> usize {
        self.header.sdt.length.get() as usize
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(self.header.as_bytes());
        bytes.extend_from_slice(&self.interrupt_controllers);
        bytes
    }
}
