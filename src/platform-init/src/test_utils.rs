// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-ins for the platform collaborators, shared by unit and integration tests.

#![allow(missing_docs)]

use std::cell::RefCell;
use std::collections::HashMap;

use crate::platform::{
    AcpiTableRegistry, CpmTables, CpuidResult, CpuidSource, CxlRootPortInfo, CxlServices,
    DxioPortDescriptor, FabricNumaServices, IoHub, Mmio, MpServices, NbioPcieServices, PciAddress, PcieComplex,
    PciePlatformConfig, PcieSilicon, PciResources, PlatformError, ProcessorInformation,
    ProcessorStatus, RootBridge, RootPort, SmbiosRegistry, TableKey,
};
use crate::topology::{LEAF_0X80000026, TopologyDecoder, TopologyLevel};

/// CPUID source answering from a fixed table. Unknown leaves read as zero.
#[derive(Debug, Default, Clone)]
pub struct MockCpuid {
    leaves: HashMap<(u32, u32), CpuidResult>,
}

impl MockCpuid {
    /// Extended topology leaf reporting `(level_type, shift)` on consecutive subleaves.
    pub fn topology(levels: &[(u32, u32)]) -> Self {
        let mut cpuid = MockCpuid::default();
        for (subleaf, &(level_type, shift)) in (0u32..).zip(levels) {
            cpuid.set_topology_subleaf(subleaf, level_type, shift);
        }
        cpuid
    }

    pub fn set_topology_subleaf(&mut self, subleaf: u32, level_type: u32, shift: u32) {
        self.leaves.insert(
            (LEAF_0X80000026, subleaf),
            CpuidResult {
                eax: shift & 0x1F,
                ebx: 0,
                ecx: ((level_type & 0xFF) << 8) | (subleaf & 0xFF),
                edx: 0,
            },
        );
    }
}

impl CpuidSource for MockCpuid {
    fn cpuid_count(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        self.leaves
            .get(&(leaf, subleaf))
            .copied()
            .unwrap_or_default()
    }
}

/// 1 SMT bit, 1 core bit and 1 CCD bit: 2 sockets x 2 CCDs x 2 cores x 2 threads.
pub fn round_trip_decoder() -> TopologyDecoder {
    TopologyDecoder::new(&[
        (TopologyLevel::Smt, 1),
        (TopologyLevel::Core, 2),
        (TopologyLevel::Ccd, 3),
    ])
}

/// MP services over a fixed list of processors.
#[derive(Debug, Default, Clone)]
pub struct MockMp {
    pub processors: Vec<ProcessorInformation>,
    /// Returned by every `processor_info` call when set.
    pub fail_info: Option<PlatformError>,
}

impl MockMp {
    /// Enabled and healthy processors with the given x2APIC ids, the first one being the BSP.
    pub fn with_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        let processors = ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| {
                let mut status = ProcessorStatus::ENABLED | ProcessorStatus::HEALTHY;
                if index == 0 {
                    status |= ProcessorStatus::BSP;
                }
                ProcessorInformation {
                    processor_id: u64::from(id),
                    status,
                }
            })
            .collect();
        MockMp {
            processors,
            fail_info: None,
        }
    }
}

impl MpServices for MockMp {
    fn number_of_processors(&self) -> Result<(usize, usize), PlatformError> {
        let enabled = self
            .processors
            .iter()
            .filter(|p| p.status.contains(ProcessorStatus::ENABLED))
            .count();
        Ok((self.processors.len(), enabled))
    }

    fn processor_info(&self, index: usize) -> Result<ProcessorInformation, PlatformError> {
        if let Some(err) = self.fail_info {
            return Err(err);
        }
        self.processors
            .get(index)
            .copied()
            .ok_or(PlatformError::InvalidParameter)
    }
}

#[derive(Debug, Clone, Copy)]
struct MockIoApic {
    id: u8,
    max_redirection_entry: u32,
}

/// Register file of a set of IOAPICs. Reads of unknown addresses return zero.
#[derive(Debug, Default)]
pub struct MockMmio {
    ioapics: HashMap<u64, MockIoApic>,
    selected: RefCell<HashMap<u64, u8>>,
}

impl MockMmio {
    pub fn add_ioapic(&mut self, base: u32, id: u8, max_redirection_entry: u32) {
        self.ioapics.insert(
            u64::from(base),
            MockIoApic {
                id,
                max_redirection_entry,
            },
        );
    }
}

impl Mmio for MockMmio {
    fn write_u8(&self, address: u64, value: u8) {
        self.selected.borrow_mut().insert(address, value);
    }

    fn read_u32(&self, address: u64) -> u32 {
        let base = address.wrapping_sub(0x10);
        let Some(ioapic) = self.ioapics.get(&base) else {
            return 0;
        };
        match self.selected.borrow().get(&base) {
            Some(0x00) => u32::from(ioapic.id) << 24,
            Some(0x01) => ((ioapic.max_redirection_entry & 0xFF) << 16) | 0x21,
            _ => 0,
        }
    }
}

/// NBIO services with a single complex whose silicons carry the given root bridge indexes.
#[derive(Debug, Default)]
pub struct MockNbio {
    pub topology: PciePlatformConfig,
    pub fail_topology: Option<PlatformError>,
    ioapic_bases: HashMap<u8, u32>,
    hubs: RefCell<Vec<IoHub>>,
}

impl MockNbio {
    /// `bridges` holds `(rb_index, IOAPIC base register value)` pairs.
    pub fn new(bridges: &[(u8, u32)]) -> Self {
        let silicons = bridges
            .iter()
            .map(|&(rb_index, _)| PcieSilicon {
                rb_index,
                ..Default::default()
            })
            .collect();
        MockNbio {
            topology: PciePlatformConfig {
                complexes: vec![PcieComplex { silicons }],
            },
            fail_topology: None,
            ioapic_bases: bridges.iter().copied().collect(),
            hubs: RefCell::new(Vec::new()),
        }
    }

    /// IO hubs read so far, in order.
    pub fn hubs_read(&self) -> Vec<IoHub> {
        self.hubs.borrow().clone()
    }
}

impl NbioPcieServices for MockNbio {
    fn pcie_topology(&self) -> Result<PciePlatformConfig, PlatformError> {
        match self.fail_topology {
            Some(err) => Err(err),
            None => Ok(self.topology.clone()),
        }
    }

    fn ioapic_base_lo(&self, nbio: &PcieSilicon, hub: IoHub) -> Result<u32, PlatformError> {
        self.hubs.borrow_mut().push(hub);
        self.ioapic_bases
            .get(&nbio.rb_index)
            .copied()
            .ok_or(PlatformError::NotFound)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MockCxl {
    pub ports: Vec<Result<CxlRootPortInfo, PlatformError>>,
}

impl CxlServices for MockCxl {
    fn cxl_count(&self) -> usize {
        self.ports.len()
    }

    fn root_port_info(&self, index: usize) -> Result<CxlRootPortInfo, PlatformError> {
        self.ports
            .get(index)
            .cloned()
            .unwrap_or(Err(PlatformError::InvalidParameter))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MockFabricNuma {
    pub domains: Vec<(PciAddress, Vec<u32>)>,
}

impl FabricNumaServices for MockFabricNuma {
    fn pxm_domain_info(&self, address: PciAddress) -> Result<Vec<u32>, PlatformError> {
        self.domains
            .iter()
            .find(|(known, _)| *known == address)
            .map(|(_, domains)| domains.clone())
            .ok_or(PlatformError::NotFound)
    }
}

/// PCI resources service over `(root bridge, root port count)` pairs.
#[derive(Debug, Default, Clone)]
pub struct MockPciResources {
    pub bridges: Vec<(RootBridge, usize)>,
    /// Returned by every `root_port_info` call when set.
    pub failing_root_port: Option<PlatformError>,
}

impl MockPciResources {
    pub fn new(bridges: Vec<(RootBridge, usize)>) -> Self {
        MockPciResources {
            bridges,
            failing_root_port: None,
        }
    }
}

impl PciResources for MockPciResources {
    fn number_of_root_bridges(&self) -> Result<usize, PlatformError> {
        Ok(self.bridges.len())
    }

    fn root_bridge_info(&self, rb_index: usize) -> Result<RootBridge, PlatformError> {
        rb_index
            .checked_sub(1)
            .and_then(|index| self.bridges.get(index))
            .map(|(bridge, _)| bridge.clone())
            .ok_or(PlatformError::InvalidParameter)
    }

    fn number_of_root_ports(&self, rb_object_index: usize) -> Result<usize, PlatformError> {
        self.bridges
            .iter()
            .find(|(bridge, _)| bridge.index == rb_object_index)
            .map(|&(_, count)| count)
            .ok_or(PlatformError::NotFound)
    }

    fn root_port_info(
        &self,
        _rb_object_index: usize,
        port_index: usize,
    ) -> Result<RootPort, PlatformError> {
        match self.failing_root_port {
            Some(err) => Err(err),
            None => Ok(RootPort {
                index: port_index,
                address: PciAddress::default(),
            }),
        }
    }
}

/// Installed ACPI tables. Uninstalled slots stay empty so keys remain stable.
#[derive(Debug, Default, Clone)]
pub struct MockAcpiTables {
    pub tables: Vec<Option<Vec<u8>>>,
    pub fail_install: Option<PlatformError>,
}

impl MockAcpiTables {
    /// Installed tables with the given signature, in installation order.
    pub fn with_signature(&self, signature: &[u8; 4]) -> Vec<&[u8]> {
        self.tables
            .iter()
            .flatten()
            .filter(|table| table.starts_with(signature))
            .map(Vec::as_slice)
            .collect()
    }
}

impl AcpiTableRegistry for MockAcpiTables {
    fn find(
        &self,
        signature: [u8; 4],
        oem_table_id: Option<[u8; 8]>,
    ) -> Option<(TableKey, Vec<u8>)> {
        self.tables.iter().enumerate().find_map(|(key, table)| {
            let table = table.as_ref()?;
            let matches = table.starts_with(&signature)
                && oem_table_id.is_none_or(|id| table.get(16..24) == Some(id.as_slice()));
            matches.then(|| (TableKey(key), table.clone()))
        })
    }

    fn uninstall(&mut self, key: TableKey) -> Result<(), PlatformError> {
        match self.tables.get_mut(key.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(PlatformError::NotFound),
        }
    }

    fn install(&mut self, table: &[u8]) -> Result<TableKey, PlatformError> {
        if let Some(err) = self.fail_install {
            return Err(err);
        }
        self.tables.push(Some(table.to_vec()));
        Ok(TableKey(self.tables.len() - 1))
    }
}

/// DXIO tables indexed by socket.
#[derive(Debug, Default, Clone)]
pub struct MockCpm {
    pub sockets: Vec<Vec<DxioPortDescriptor>>,
}

impl CpmTables for MockCpm {
    fn dxio_topology(&self, socket: u8) -> Option<Vec<DxioPortDescriptor>> {
        self.sockets.get(usize::from(socket)).cloned()
    }
}

/// Added SMBIOS structures; the handle is the position in `structures`.
#[derive(Debug, Default, Clone)]
pub struct MockSmbios {
    pub structures: Vec<Vec<u8>>,
    pub fail_add: Option<PlatformError>,
}

impl SmbiosRegistry for MockSmbios {
    fn add(&mut self, structure: &[u8]) -> Result<u16, PlatformError> {
        if let Some(err) = self.fail_add {
            return Err(err);
        }
        let handle =
            u16::try_from(self.structures.len()).map_err(|_| PlatformError::OutOfResources)?;
        self.structures.push(structure.to_vec());
        Ok(handle)
    }
}
