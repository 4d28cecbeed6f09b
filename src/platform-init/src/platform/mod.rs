// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Interfaces to the firmware services the platform-init code consumes.
//!
//! Everything the boot phase reads from hardware or from other drivers goes through one of the
//! traits in this module. The SoC specific data providers live in [`soc`].

use bitflags::bitflags;

pub mod dxio;
pub mod soc;

pub use dxio::DxioPortDescriptor;
pub use soc::{NullSoc, PlatformSoc, TurinSoc};

/// Failure reported by a platform collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum PlatformError {
    /// Required platform data source is not available
    NotFound,
    /// Out of resources
    OutOfResources,
    /// Invalid parameter
    InvalidParameter,
    /// Operation is not supported by the platform
    Unsupported,
}

/// Register values returned by the `CPUID` instruction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

#[cfg(target_arch = "x86_64")]
impl From<std::arch::x86_64::CpuidResult> for CpuidResult {
    fn from(result: std::arch::x86_64::CpuidResult) -> Self {
        CpuidResult {
            eax: result.eax,
            ebx: result.ebx,
            ecx: result.ecx,
            edx: result.edx,
        }
    }
}

/// Source of `CPUID` leaves.
pub trait CpuidSource {
    fn cpuid_count(&self, leaf: u32, subleaf: u32) -> CpuidResult;
}

/// Executes `CPUID` on the processor running the boot phase.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HostCpuid;

#[cfg(target_arch = "x86_64")]
impl CpuidSource for HostCpuid {
    fn cpuid_count(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        // SAFETY: `CPUID` is available on every x86_64 processor.
        #[allow(unused_unsafe)]
        let result = unsafe { std::arch::x86_64::__cpuid_count(leaf, subleaf) };
        result.into()
    }
}

bitflags! {
    /// Status flags of a processor as reported by the MP services.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProcessorStatus: u32 {
        /// The processor is the boot strap processor.
        const BSP = 0x1;
        /// The processor is enabled.
        const ENABLED = 0x2;
        /// The processor passed its health checks.
        const HEALTHY = 0x4;
    }
}

/// One logical processor as reported by the MP services.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorInformation {
    /// x2APIC identifier of the processor.
    pub processor_id: u64,
    pub status: ProcessorStatus,
}

/// Multi-processor services of the boot environment.
pub trait MpServices {
    /// Returns the number of logical processors and how many of them are enabled.
    fn number_of_processors(&self) -> Result<(usize, usize), PlatformError>;

    fn processor_info(&self, index: usize) -> Result<ProcessorInformation, PlatformError>;
}

/// PCI address of a function, or of a bus when device and function are zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub segment: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(segment: u16, bus: u8, device: u8, function: u8) -> Self {
        PciAddress {
            segment,
            bus,
            device,
            function,
        }
    }

    /// Device and function packed the way SMBIOS and ACPI expect them.
    pub fn dev_func(&self) -> u8 {
        ((self.device & 0x1F) << 3) | (self.function & 0x7)
    }
}

/// Memory mapped register access.
pub trait Mmio {
    fn write_u8(&self, address: u64, value: u8);

    fn read_u32(&self, address: u64) -> u32;
}

/// One IOAPIC as it is described in the MADT.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoApicInfo {
    pub ioapic_id: u8,
    pub ioapic_address: u32,
    pub gsi_base: u32,
}

/// Which IO hub of an NBIO holds the IOAPIC of a root bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoHub {
    IoHub0,
    IoHub1,
}

/// PCIe engine as laid out by the silicon initialization code.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PcieEngine {
    pub slot_num: u16,
    pub address: PciAddress,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PcieWrapper {
    pub engines: Vec<PcieEngine>,
}

/// One NBIO root bridge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PcieSilicon {
    /// Root bridge index within its socket.
    pub rb_index: u8,
    pub address: PciAddress,
    pub cxl_capable: bool,
    pub wrappers: Vec<PcieWrapper>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PcieComplex {
    pub silicons: Vec<PcieSilicon>,
}

/// PCIe topology of the whole platform: complex, silicon, wrapper, engine.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PciePlatformConfig {
    pub complexes: Vec<PcieComplex>,
}

impl PciePlatformConfig {
    /// Every NBIO root bridge of the platform, in topology order.
    pub fn nbio_handles(&self) -> impl Iterator<Item = &PcieSilicon> {
        self.complexes.iter().flat_map(|c| c.silicons.iter())
    }

    /// Every PCIe engine of the platform, in topology order.
    pub fn engines(&self) -> impl Iterator<Item = &PcieEngine> {
        self.nbio_handles()
            .flat_map(|s| s.wrappers.iter())
            .flat_map(|w| w.engines.iter())
    }
}

/// NBIO PCIe services.
pub trait NbioPcieServices {
    fn pcie_topology(&self) -> Result<PciePlatformConfig, PlatformError>;

    /// Reads the low IOAPIC base address register of a root bridge.
    fn ioapic_base_lo(&self, nbio: &PcieSilicon, hub: IoHub) -> Result<u32, PlatformError>;
}

/// Root bridge as described by the PCI resources service.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RootBridge {
    /// Index used to query the root ports of this root bridge.
    pub index: usize,
    pub socket_id: u8,
    pub segment: u16,
    pub base_bus: u8,
    pub max_bus: u8,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RootPort {
    pub index: usize,
    pub address: PciAddress,
}

/// PCI resources service. Root bridges and root ports are numbered from 1.
pub trait PciResources {
    fn number_of_root_bridges(&self) -> Result<usize, PlatformError>;

    fn root_bridge_info(&self, rb_index: usize) -> Result<RootBridge, PlatformError>;

    fn number_of_root_ports(&self, rb_object_index: usize) -> Result<usize, PlatformError>;

    fn root_port_info(
        &self,
        rb_object_index: usize,
        port_index: usize,
    ) -> Result<RootPort, PlatformError>;
}

/// Fabric NUMA services.
pub trait FabricNumaServices {
    /// Proximity domains attached to `address`.
    fn pxm_domain_info(&self, address: PciAddress) -> Result<Vec<u32>, PlatformError>;
}

/// Root port information reported by the CXL services.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CxlRootPortInfo {
    pub endpoint: PciAddress,
    /// Downstream port RCRB, zero for CXL 2.0 ports.
    pub ds_rcrb: u64,
}

/// NBIO CXL services.
pub trait CxlServices {
    fn cxl_count(&self) -> usize;

    fn root_port_info(&self, index: usize) -> Result<CxlRootPortInfo, PlatformError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CxlPortInfo {
    pub endpoint: PciAddress,
    pub is_cxl2: bool,
}

/// A root bridge with everything needed to describe it in the ACPI namespace.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RootBridgeInstance {
    pub root_bridge: RootBridge,
    pub global_interrupt_start: u32,
    pub pxm_domain: u32,
    pub cxl_port: Option<CxlPortInfo>,
    pub root_ports: Vec<RootPort>,
}

/// Key of an installed ACPI table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableKey(pub usize);

/// ACPI table installation service.
pub trait AcpiTableRegistry {
    /// Returns a copy of the first installed table matching `signature` and, when given, the
    /// OEM table id.
    fn find(&self, signature: [u8; 4], oem_table_id: Option<[u8; 8]>)
    -> Option<(TableKey, Vec<u8>)>;

    fn uninstall(&mut self, key: TableKey) -> Result<(), PlatformError>;

    fn install(&mut self, table: &[u8]) -> Result<TableKey, PlatformError>;
}

/// Board tables published by the platform configuration manager.
pub trait CpmTables {
    /// DXIO topology of `socket`, `None` when the board has no table for it.
    fn dxio_topology(&self, socket: u8) -> Option<Vec<DxioPortDescriptor>>;
}

/// SMBIOS structure installation service.
pub trait SmbiosRegistry {
    /// Adds a complete structure and returns its handle.
    fn add(&mut self, structure: &[u8]) -> Result<u16, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_func() {
        assert_eq!(PciAddress::new(0, 0, 1, 1).dev_func(), 0x09);
        assert_eq!(PciAddress::new(0, 0, 0x1f, 7).dev_func(), 0xff);
        // Out of range bits are dropped.
        assert_eq!(PciAddress::new(0, 0, 0x21, 0x9).dev_func(), 0x09);
    }

    #[test]
    fn test_topology_iterators() {
        let engine = |slot_num| PcieEngine {
            slot_num,
            address: PciAddress::default(),
        };
        let config = PciePlatformConfig {
            complexes: vec![
                PcieComplex {
                    silicons: vec![PcieSilicon {
                        rb_index: 0,
                        wrappers: vec![
                            PcieWrapper {
                                engines: vec![engine(1), engine(2)],
                            },
                            PcieWrapper {
                                engines: vec![engine(3)],
                            },
                        ],
                        ..Default::default()
                    }],
                },
                PcieComplex {
                    silicons: vec![
                        PcieSilicon {
                            rb_index: 4,
                            ..Default::default()
                        },
                        PcieSilicon {
                            rb_index: 5,
                            wrappers: vec![PcieWrapper {
                                engines: vec![engine(4)],
                            }],
                            ..Default::default()
                        },
                    ],
                },
            ],
        };

        let rb: Vec<_> = config.nbio_handles().map(|s| s.rb_index).collect();
        assert_eq!(rb, vec![0, 4, 5]);
        let slots: Vec<_> = config.engines().map(|e| e.slot_num).collect();
        assert_eq!(slots, vec![1, 2, 3, 4]);
    }
}
