// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! DXIO port descriptors as laid out in the board topology tables.

/// Set in the flags of the last descriptor of a topology table.
pub const DESCRIPTOR_TERMINATE_LIST: u32 = 0x8000_0000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DxioEngineType {
    #[default]
    Unused,
    Pcie,
    Sata,
    Ethernet,
}

/// Link speed capability of a port.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DxioLinkSpeed {
    #[default]
    MaxSupported,
    Gen1,
    Gen2,
    Gen3,
    Gen4,
    Gen5,
    /// Raw value this code does not know about.
    Unknown(u8),
}

impl From<u8> for DxioLinkSpeed {
    fn from(raw: u8) -> Self {
        match raw {
            0 => DxioLinkSpeed::MaxSupported,
            1 => DxioLinkSpeed::Gen1,
            2 => DxioLinkSpeed::Gen2,
            3 => DxioLinkSpeed::Gen3,
            4 => DxioLinkSpeed::Gen4,
            5 => DxioLinkSpeed::Gen5,
            raw => DxioLinkSpeed::Unknown(raw),
        }
    }
}

/// Result of endpoint detection on a port.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DxioEndpointStatus {
    #[default]
    NotPresent,
    Detected,
    /// Training did not complete.
    Unknown,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DxioEngineData {
    pub engine_type: DxioEngineType,
    pub start_lane: u16,
    pub end_lane: u16,
}

impl DxioEngineData {
    /// `end_lane - start_lane`, `None` when the lanes are reversed.
    pub fn lane_span(&self) -> Option<u16> {
        self.end_lane.checked_sub(self.start_lane)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DxioPortData {
    pub present: bool,
    /// Physical slot number, 0 for ports without a slot.
    pub slot_num: u16,
    pub link_speed_capability: DxioLinkSpeed,
    pub endpoint_status: DxioEndpointStatus,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DxioPortDescriptor {
    pub flags: u32,
    pub engine: DxioEngineData,
    pub port: DxioPortData,
}

impl DxioPortDescriptor {
    pub fn is_last(&self) -> bool {
        self.flags & DESCRIPTOR_TERMINATE_LIST != 0
    }

    /// The port is wired to a populated physical slot.
    pub fn has_slot(&self) -> bool {
        self.port.slot_num > 0 && self.port.present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_speed_from_raw() {
        assert_eq!(DxioLinkSpeed::from(0), DxioLinkSpeed::MaxSupported);
        assert_eq!(DxioLinkSpeed::from(3), DxioLinkSpeed::Gen3);
        assert_eq!(DxioLinkSpeed::from(9), DxioLinkSpeed::Unknown(9));
    }

    #[test]
    fn test_descriptor_flags() {
        let mut port = DxioPortDescriptor::default();
        assert!(!port.is_last());
        assert!(!port.has_slot());

        port.flags = DESCRIPTOR_TERMINATE_LIST;
        port.port.slot_num = 2;
        assert!(port.is_last());
        assert!(!port.has_slot());

        port.port.present = true;
        assert!(port.has_slot());

        port.engine.start_lane = 16;
        port.engine.end_lane = 31;
        assert_eq!(port.engine.lane_span(), Some(15));
        port.engine.end_lane = 0;
        assert_eq!(port.engine.lane_span(), None);
    }
}
