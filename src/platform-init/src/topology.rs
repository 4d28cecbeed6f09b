// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Processor location decoding from x2APIC identifiers.

use serde::{Deserialize, Serialize};

use crate::platform::CpuidSource;

/// Extended CPU topology leaf.
pub const LEAF_0X80000026: u32 = 0x8000_0026;
/// Highest subleaf queried from the extended topology leaf.
const MAX_TOPOLOGY_SUBLEAF: u32 = 7;

/// Bit range `[msb:lsb]` of `value`.
fn get_range(value: u32, msb: u32, lsb: u32) -> u32 {
    debug_assert!(lsb <= msb && msb < 32);
    let num_bits = msb - lsb + 1;
    let mask = if num_bits == 32 {
        u32::MAX
    } else {
        (1u32 << num_bits) - 1
    };
    (value >> lsb) & mask
}

/// Hierarchy levels reported by the extended topology leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum TopologyLevel {
    Smt = 1,
    Core = 2,
    Complex = 3,
    Ccd = 4,
    Die = 5,
    /// Not reported by hardware; one bit above the die level.
    Package = 6,
}

impl TopologyLevel {
    fn from_level_type(level_type: u32) -> Option<Self> {
        match level_type {
            1 => Some(TopologyLevel::Smt),
            2 => Some(TopologyLevel::Core),
            3 => Some(TopologyLevel::Complex),
            4 => Some(TopologyLevel::Ccd),
            5 => Some(TopologyLevel::Die),
            _ => None,
        }
    }
}

/// Location of a logical processor in the platform hierarchy.
///
/// `die` is always 0: the platform folds dies into the package.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorLocation {
    pub package: u32,
    pub die: u32,
    pub ccd: u32,
    pub complex: u32,
    pub core: u32,
    pub thread: u32,
}

/// Decodes x2APIC identifiers using the shift widths of every topology level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDecoder {
    /// Number of identifier bits below the next level, indexed by [`TopologyLevel`].
    widths: [u32; 7],
}

impl TopologyDecoder {
    /// Builds a decoder from the shift width reported for each level. Levels without a width
    /// inherit the width of the level below them.
    pub fn new(reported: &[(TopologyLevel, u32)]) -> Self {
        let mut widths = [0u32; 7];
        let mut known = [false; 7];
        for &(level, width) in reported {
            if level != TopologyLevel::Package {
                widths[level as usize] = width;
                known[level as usize] = true;
            }
        }

        for level in TopologyLevel::Core as usize..=TopologyLevel::Die as usize {
            if !known[level] || widths[level] == 0 {
                widths[level] = widths[level - 1];
            }
        }
        widths[TopologyLevel::Package as usize] = widths[TopologyLevel::Die as usize] + 1;

        TopologyDecoder { widths }
    }

    /// Queries the extended topology leaf of `cpuid` until it reports an invalid level.
    pub fn from_cpuid(cpuid: &dyn CpuidSource) -> Self {
        let mut reported = Vec::new();
        for subleaf in 0..=MAX_TOPOLOGY_SUBLEAF {
            let entry = cpuid.cpuid_count(LEAF_0X80000026, subleaf);
            let level_type = get_range(entry.ecx, 15, 8);
            if level_type == 0 {
                break;
            }
            match TopologyLevel::from_level_type(level_type) {
                Some(level) => reported.push((level, get_range(entry.eax, 4, 0))),
                None => log::debug!("topology: ignoring level type {level_type:#x}"),
            }
        }
        Self::new(&reported)
    }

    /// Width in bits of the identifier up to and including `level`.
    pub fn width(&self, level: TopologyLevel) -> u32 {
        self.widths[level as usize]
    }

    fn field(&self, id: u32, level: TopologyLevel) -> u32 {
        let upper = self.widths[level as usize];
        let lower = self.widths[level as usize - 1];
        let mask = 1u64.checked_shl(upper).map_or(u64::MAX, |bit| bit - 1);
        let masked = u64::from(id) & mask;
        // Both widths are below 33 so the result fits in 32 bits.
        u32::try_from(masked.checked_shr(lower).unwrap_or(0)).unwrap_or(0)
    }

    pub fn decode(&self, x2apic_id: u32) -> ProcessorLocation {
        ProcessorLocation {
            package: self.field(x2apic_id, TopologyLevel::Package),
            die: 0,
            ccd: self.field(x2apic_id, TopologyLevel::Ccd),
            complex: self.field(x2apic_id, TopologyLevel::Complex),
            core: self.field(x2apic_id, TopologyLevel::Core),
            thread: self.field(x2apic_id, TopologyLevel::Smt),
        }
    }
}

/// Physical placement order of the CCDs. A CCD ranks by its position in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CcdOrder(pub [u32; 16]);

/// CCD placement of family 1Ah (Turin) packages.
pub const TURIN_CCD_ORDER: CcdOrder =
    CcdOrder([0, 4, 8, 12, 2, 6, 10, 14, 3, 7, 11, 15, 1, 5, 9, 13]);

impl Default for CcdOrder {
    fn default() -> Self {
        TURIN_CCD_ORDER
    }
}

impl CcdOrder {
    /// Position of `ccd` in the order, `u32::MAX` when it is not part of it.
    pub fn rank(&self, ccd: u32) -> u32 {
        self.0
            .iter()
            .position(|&entry| entry == ccd)
            .and_then(|index| u32::try_from(index).ok())
            .unwrap_or(u32::MAX)
    }

    /// Sort key of a processor location.
    pub fn location_rank(&self, location: &ProcessorLocation) -> u32 {
        self.rank(location.ccd)
    }

    /// Returns true when no CCD number appears twice.
    pub fn is_permutation(&self) -> bool {
        let mut seen = self.0.to_vec();
        seen.sort_unstable();
        seen.windows(2).all(|pair| pair[0] != pair[1])
    }
}
