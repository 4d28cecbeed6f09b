// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! System Slots (Type 9) structure, SMBIOS 3.5 layout.

use std::mem::size_of;

use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{Result, SmbiosError, SmbiosHeader, SmbiosRecord, StringTable};

pub const SMBIOS_TYPE_SYSTEM_SLOTS: u8 = 9;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    Other = 0x01,
    PciExpress = 0xA5,
    PciExpressGen2 = 0xAB,
    PciExpressGen3 = 0xB1,
    PciExpressGen4 = 0xB8,
    PciExpressGen5 = 0xBE,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDataBusWidth {
    Unknown = 0x02,
    X1 = 0x08,
    X2 = 0x09,
    X4 = 0x0A,
    X8 = 0x0B,
    X16 = 0x0D,
}

impl SlotDataBusWidth {
    /// Number of lanes behind the encoding, 0 when unknown.
    pub fn lanes(self) -> u8 {
        match self {
            SlotDataBusWidth::Unknown => 0,
            SlotDataBusWidth::X1 => 1,
            SlotDataBusWidth::X2 => 2,
            SlotDataBusWidth::X4 => 4,
            SlotDataBusWidth::X8 => 8,
            SlotDataBusWidth::X16 => 16,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUsage {
    Unknown = 0x02,
    Available = 0x03,
    InUse = 0x04,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLength {
    Unknown = 0x02,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotHeight {
    Unknown = 0x02,
}

/// Fixed part of the structure, up to and including the peer grouping count.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
pub struct SystemSlotFixed {
    pub header: SmbiosHeader,
    pub slot_designation: u8,
    pub slot_type: u8,
    pub slot_data_bus_width: u8,
    pub current_usage: u8,
    pub slot_length: u8,
    pub slot_id: U16,
    pub slot_characteristics1: u8,
    pub slot_characteristics2: u8,
    pub segment_group_num: U16,
    pub bus_num: u8,
    pub dev_func_num: u8,
    pub data_bus_width: u8,
    pub peer_grouping_count: u8,
}

#[repr(C, packed)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable,
    Unaligned,
)]
pub struct PeerGroup {
    pub segment_group_num: U16,
    pub bus_num: u8,
    pub dev_func_num: u8,
    pub data_bus_width: u8,
}

/// Fields following the peer groups (SMBIOS 3.4 and later).
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
pub struct SystemSlotExtension {
    pub slot_information: u8,
    pub slot_physical_width: u8,
    pub slot_pitch: U16,
    pub slot_height: u8,
}

/// A complete System Slots structure.
#[derive(Debug, Clone)]
pub struct Type9 {
    pub fixed: SystemSlotFixed,
    pub peer_groups: Vec<PeerGroup>,
    pub extension: SystemSlotExtension,
    pub designation: String,
}

impl Type9 {
    /// Creates a structure with the unknown/empty defaults: no segment, bus or device-function
    /// assigned, unknown length and height.
    pub fn new(designation: &str) -> Self {
        Type9 {
            fixed: SystemSlotFixed {
                header: SmbiosHeader::new(SMBIOS_TYPE_SYSTEM_SLOTS, 0),
                slot_designation: 1,
                slot_type: SlotType::Other as u8,
                slot_data_bus_width: SlotDataBusWidth::Unknown as u8,
                current_usage: SlotUsage::Unknown as u8,
                slot_length: SlotLength::Unknown as u8,
                segment_group_num: U16::new(0xFFFF),
                bus_num: 0xFF,
                dev_func_num: 0xFF,
                ..Default::default()
            },
            peer_groups: Vec::new(),
            extension: SystemSlotExtension {
                slot_height: SlotHeight::Unknown as u8,
                ..Default::default()
            },
            designation: designation.to_string(),
        }
    }

    /// Length of the formatted area, stored in the header.
    pub fn formatted_len(&self) -> usize {
        size_of::<SystemSlotFixed>()
            + self.peer_groups.len() * size_of::<PeerGroup>()
            + size_of::<SystemSlotExtension>()
    }
}

impl SmbiosRecord for Type9 {
    fn structure_type(&self) -> u8 {
        SMBIOS_TYPE_SYSTEM_SLOTS
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let formatted_len = self.formatted_len();
        let mut fixed = self.fixed;
        fixed.header.length = u8::try_from(formatted_len)
            .map_err(|_| SmbiosError::StructureTooLarge(formatted_len))?;
        // Bounded by the length check above.
        fixed.peer_grouping_count = u8::try_from(self.peer_groups.len())
            .map_err(|_| SmbiosError::StructureTooLarge(formatted_len))?;

        let mut strings = StringTable::new();
        fixed.slot_designation = strings.add(&self.designation)?;

        let mut bytes = Vec::with_capacity(formatted_len + self.designation.len() + 2);
        bytes.extend_from_slice(fixed.as_bytes());
        for group in &self.peer_groups {
            bytes.extend_from_slice(group.as_bytes());
        }
        bytes.extend_from_slice(self.extension.as_bytes());
        bytes.extend_from_slice(&strings.to_bytes());
        Ok(bytes)
    }
}
