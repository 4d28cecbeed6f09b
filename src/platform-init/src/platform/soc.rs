// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use log::{debug, error, info};

use super::{
    CxlPortInfo, CxlServices, FabricNumaServices, IoApicInfo, IoHub, Mmio, NbioPcieServices,
    PciAddress, PciResources, PlatformError, RootBridgeInstance,
};

/// Offset of the register select window of an IOAPIC.
const IOAPIC_INDEX_OFFSET: u64 = 0x00;
/// Offset of the data window of an IOAPIC.
const IOAPIC_DATA_OFFSET: u64 = 0x10;
const IOAPIC_ID_REGISTER_INDEX: u8 = 0x00;
const IOAPIC_VERSION_REGISTER_INDEX: u8 = 0x01;
const IOAPIC_BASE_ADDR_LO_MASK: u32 = 0xFFFF_FF00;
/// Maximum number of IOAPICs described by the platform, FCH included.
const MAX_IOAPIC_NUM: usize = 0x20;

/// SoC specific platform data.
pub trait PlatformSoc {
    /// IOAPICs of the platform, the FCH IOAPIC first.
    fn io_apic_info(&self) -> Result<Vec<IoApicInfo>, PlatformError>;

    /// CXL ports of the platform.
    fn cxl_port_info(&self) -> Result<Vec<CxlPortInfo>, PlatformError>;

    /// PCIe root bridges of the platform with their interrupt, NUMA and CXL data.
    fn pcie_info(&self) -> Result<Vec<RootBridgeInstance>, PlatformError>;
}

/// Platforms that do not provide SoC data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSoc;

impl PlatformSoc for NullSoc {
    fn io_apic_info(&self) -> Result<Vec<IoApicInfo>, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn cxl_port_info(&self) -> Result<Vec<CxlPortInfo>, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn pcie_info(&self) -> Result<Vec<RootBridgeInstance>, PlatformError> {
        Err(PlatformError::Unsupported)
    }
}

/// SoC data of AMD family 1Ah (Turin) platforms.
pub struct TurinSoc<'a> {
    pub fch_ioapic_id: u8,
    pub fch_ioapic_address: u32,
    pub mmio: &'a dyn Mmio,
    pub nbio: Option<&'a dyn NbioPcieServices>,
    pub pci_resources: Option<&'a dyn PciResources>,
    pub fabric_numa: Option<&'a dyn FabricNumaServices>,
    pub cxl: Option<&'a dyn CxlServices>,
}

impl fmt::Debug for TurinSoc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurinSoc")
            .field("fch_ioapic_id", &self.fch_ioapic_id)
            .field("fch_ioapic_address", &self.fch_ioapic_address)
            .field("nbio", &self.nbio.is_some())
            .field("pci_resources", &self.pci_resources.is_some())
            .field("fabric_numa", &self.fabric_numa.is_some())
            .field("cxl", &self.cxl.is_some())
            .finish()
    }
}

impl TurinSoc<'_> {
    fn read_ioapic_register(&self, base: u32, index: u8) -> u32 {
        self.mmio
            .write_u8(u64::from(base) + IOAPIC_INDEX_OFFSET, index);
        self.mmio.read_u32(u64::from(base) + IOAPIC_DATA_OFFSET)
    }

    /// Number of redirection entries of the IOAPIC at `base`.
    fn redirection_entries(&self, base: u32) -> u32 {
        let version = self.read_ioapic_register(base, IOAPIC_VERSION_REGISTER_INDEX);
        ((version >> 16) & 0xFF) + 1
    }

    #[allow(clippy::cast_possible_truncation)]
    fn ioapic_id(&self, base: u32) -> u8 {
        let id = self.read_ioapic_register(base, IOAPIC_ID_REGISTER_INDEX);
        ((id >> 24) & 0xF) as u8
    }

    /// Proximity domain of a root bridge, the socket id when the fabric can't tell.
    fn pxm_domain(&self, socket_id: u8, address: PciAddress) -> u32 {
        self.fabric_numa
            .and_then(|numa| numa.pxm_domain_info(address).ok())
            .and_then(|domains| domains.first().copied())
            .unwrap_or(u32::from(socket_id))
    }

    fn cxl2_port_info(&self) -> Option<Vec<CxlPortInfo>> {
        let topology = self.nbio?.pcie_topology().ok()?;
        let ports: Vec<_> = topology
            .nbio_handles()
            .filter(|nbio| nbio.cxl_capable)
            .map(|nbio| CxlPortInfo {
                endpoint: nbio.address,
                is_cxl2: true,
            })
            .collect();
        (!ports.is_empty()).then_some(ports)
    }
}

impl PlatformSoc for TurinSoc<'_> {
    fn io_apic_info(&self) -> Result<Vec<IoApicInfo>, PlatformError> {
        let Some(nbio) = self.nbio else {
            debug!("soc: NBIO PCIe services not available");
            return Err(PlatformError::NotFound);
        };
        let topology = nbio.pcie_topology()?;

        let mut ioapics = vec![IoApicInfo {
            ioapic_id: self.fch_ioapic_id,
            ioapic_address: self.fch_ioapic_address,
            gsi_base: 0,
        }];
        let mut gsi_base = self.redirection_entries(self.fch_ioapic_address);

        for handle in topology.nbio_handles() {
            if ioapics.len() >= MAX_IOAPIC_NUM {
                error!("soc: more than {MAX_IOAPIC_NUM} IOAPICs on the platform");
                return Err(PlatformError::OutOfResources);
            }

            let hub = if handle.rb_index < 4 {
                IoHub::IoHub0
            } else {
                IoHub::IoHub1
            };
            let ioapic_address = nbio.ioapic_base_lo(handle, hub)? & IOAPIC_BASE_ADDR_LO_MASK;
            ioapics.push(IoApicInfo {
                ioapic_id: self.ioapic_id(ioapic_address),
                ioapic_address,
                gsi_base,
            });
            gsi_base += self.redirection_entries(ioapic_address);
        }

        Ok(ioapics)
    }

    fn cxl_port_info(&self) -> Result<Vec<CxlPortInfo>, PlatformError> {
        if let Some(ports) = self.cxl2_port_info() {
            return Ok(ports);
        }

        let Some(cxl) = self.cxl else {
            debug!("soc: CXL services not available");
            return Ok(Vec::new());
        };

        let mut ports = Vec::with_capacity(cxl.cxl_count());
        for index in 0..cxl.cxl_count() {
            let Ok(info) = cxl.root_port_info(index) else {
                break;
            };
            ports.push(CxlPortInfo {
                endpoint: info.endpoint,
                is_cxl2: info.ds_rcrb == 0,
            });
        }
        Ok(ports)
    }

    fn pcie_info(&self) -> Result<Vec<RootBridgeInstance>, PlatformError> {
        let ioapics = self.io_apic_info().map_err(|err| {
            error!("soc: cannot obtain NBIO IOAPIC information: {err}");
            PlatformError::NotFound
        })?;

        let Some(resources) = self.pci_resources else {
            error!("soc: PCI resources service not available");
            return Err(PlatformError::NotFound);
        };
        let count = resources.number_of_root_bridges().inspect_err(|err| {
            error!("soc: failed to get the number of root bridges: {err}");
        })?;

        let cxl_ports = self.cxl_port_info().unwrap_or_else(|err| {
            info!("soc: cannot find CXL device: {err}");
            Vec::new()
        });

        let mut root_bridges = Vec::with_capacity(count);
        for rb_index in 1..=count {
            let root_bridge = resources.root_bridge_info(rb_index).inspect_err(|err| {
                error!("soc: failed to get root bridge {rb_index} information: {err}");
            })?;
            // Entry 0 is the FCH IOAPIC.
            let Some(ioapic) = ioapics.get(rb_index) else {
                error!("soc: no IOAPIC for root bridge {rb_index}");
                return Err(PlatformError::NotFound);
            };

            let address = PciAddress::new(root_bridge.segment, root_bridge.base_bus, 0, 0);
            let pxm_domain = self.pxm_domain(root_bridge.socket_id, address);
            let cxl_port = cxl_ports
                .iter()
                .find(|port| {
                    port.endpoint.segment == root_bridge.segment
                        && port.endpoint.bus == root_bridge.base_bus
                })
                .copied();

            let port_count = resources
                .number_of_root_ports(root_bridge.index)
                .inspect_err(|err| error!("soc: failed to get the number of root ports: {err}"))?;
            let root_ports = (1..=port_count)
                .map(|port| resources.root_port_info(root_bridge.index, port))
                .collect::<Result<Vec<_>, _>>()
                .inspect_err(|err| error!("soc: failed to get root port information: {err}"))?;

            root_bridges.push(RootBridgeInstance {
                global_interrupt_start: ioapic.gsi_base,
                pxm_domain,
                cxl_port,
                root_ports,
                root_bridge,
            });
        }

        Ok(root_bridges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{CxlRootPortInfo, RootBridge};
    use crate::test_utils::{MockCxl, MockFabricNuma, MockMmio, MockNbio, MockPciResources};

    fn turin<'a>(mmio: &'a MockMmio, nbio: Option<&'a MockNbio>) -> TurinSoc<'a> {
        TurinSoc {
            fch_ioapic_id: 0xF0,
            fch_ioapic_address: 0xFEC0_0000,
            mmio,
            nbio: nbio.map(|n| n as &dyn NbioPcieServices),
            pci_resources: None,
            fabric_numa: None,
            cxl: None,
        }
    }

    #[test]
    fn test_null_soc() {
        assert_eq!(NullSoc.io_apic_info(), Err(PlatformError::Unsupported));
        assert_eq!(NullSoc.cxl_port_info(), Err(PlatformError::Unsupported));
        assert_eq!(NullSoc.pcie_info(), Err(PlatformError::Unsupported));
    }

    #[test]
    fn test_io_apic_info_without_nbio() {
        let mmio = MockMmio::default();
        let soc = turin(&mmio, None);
        assert_eq!(soc.io_apic_info(), Err(PlatformError::NotFound));
    }

    #[test]
    fn test_io_apic_info() {
        let mut mmio = MockMmio::default();
        // FCH IOAPIC: 24 redirection entries.
        mmio.add_ioapic(0xFEC0_0000, 0xF0, 23);
        // NBIO IOAPICs: 32 redirection entries each.
        mmio.add_ioapic(0xC900_0000, 1, 31);
        mmio.add_ioapic(0xD900_0000, 2, 31);
        mmio.add_ioapic(0xE900_0000, 3, 31);
        let nbio = MockNbio::new(&[(0, 0xC900_0012), (4, 0xD900_0000), (5, 0xE900_00FF)]);
        let soc = turin(&mmio, Some(&nbio));

        let ioapics = soc.io_apic_info().unwrap();
        assert_eq!(
            ioapics,
            vec![
                IoApicInfo {
                    ioapic_id: 0xF0,
                    ioapic_address: 0xFEC0_0000,
                    gsi_base: 0
                },
                IoApicInfo {
                    ioapic_id: 1,
                    ioapic_address: 0xC900_0000,
                    gsi_base: 24
                },
                IoApicInfo {
                    ioapic_id: 2,
                    ioapic_address: 0xD900_0000,
                    gsi_base: 56
                },
                IoApicInfo {
                    ioapic_id: 3,
                    ioapic_address: 0xE900_0000,
                    gsi_base: 88
                },
            ]
        );
        // Root bridges 0-3 use the first IO hub, the others the second one.
        assert_eq!(
            nbio.hubs_read(),
            vec![IoHub::IoHub0, IoHub::IoHub1, IoHub::IoHub1]
        );
    }

    #[test]
    fn test_io_apic_info_too_many() {
        let mmio = MockMmio::default();
        let bridges: Vec<_> = (0..MAX_IOAPIC_NUM as u8).map(|rb| (rb, 0)).collect();
        let nbio = MockNbio::new(&bridges);
        let soc = turin(&mmio, Some(&nbio));
        assert_eq!(soc.io_apic_info(), Err(PlatformError::OutOfResources));
    }

    #[test]
    fn test_cxl_port_info() {
        let mmio = MockMmio::default();
        let cxl = MockCxl {
            ports: vec![
                Ok(CxlRootPortInfo {
                    endpoint: PciAddress::new(0, 0x40, 0, 0),
                    ds_rcrb: 0,
                }),
                Ok(CxlRootPortInfo {
                    endpoint: PciAddress::new(0, 0x80, 0, 0),
                    ds_rcrb: 0xFED0_0000,
                }),
                Err(PlatformError::NotFound),
                Ok(CxlRootPortInfo::default()),
            ],
        };

        // No CXL services at all.
        let mut soc = turin(&mmio, None);
        assert_eq!(soc.cxl_port_info(), Ok(vec![]));

        // Enumeration stops at the first failing port.
        soc.cxl = Some(&cxl);
        assert_eq!(
            soc.cxl_port_info(),
            Ok(vec![
                CxlPortInfo {
                    endpoint: PciAddress::new(0, 0x40, 0, 0),
                    is_cxl2: true
                },
                CxlPortInfo {
                    endpoint: PciAddress::new(0, 0x80, 0, 0),
                    is_cxl2: false
                },
            ])
        );

        // CXL capable root bridges take precedence.
        let mut nbio = MockNbio::new(&[(0, 0), (1, 0)]);
        let silicon = &mut nbio.topology.complexes[0].silicons[1];
        silicon.cxl_capable = true;
        silicon.address = PciAddress::new(1, 0x20, 0, 0);
        soc.nbio = Some(&nbio);
        assert_eq!(
            soc.cxl_port_info(),
            Ok(vec![CxlPortInfo {
                endpoint: PciAddress::new(1, 0x20, 0, 0),
                is_cxl2: true
            }])
        );
    }

    #[test]
    fn test_pcie_info() {
        let mut mmio = MockMmio::default();
        mmio.add_ioapic(0xFEC0_0000, 0xF0, 23);
        mmio.add_ioapic(0xC900_0000, 1, 31);
        mmio.add_ioapic(0xD900_0000, 2, 31);
        let mut nbio = MockNbio::new(&[(0, 0xC900_0000), (1, 0xD900_0000)]);
        let silicon = &mut nbio.topology.complexes[0].silicons[1];
        silicon.cxl_capable = true;
        silicon.address = PciAddress::new(0, 0x40, 0, 0);
        let resources = MockPciResources::new(vec![
            (
                RootBridge {
                    index: 10,
                    socket_id: 0,
                    segment: 0,
                    base_bus: 0,
                    max_bus: 0x3F,
                },
                2,
            ),
            (
                RootBridge {
                    index: 11,
                    socket_id: 1,
                    segment: 0,
                    base_bus: 0x40,
                    max_bus: 0x7F,
                },
                1,
            ),
        ]);
        let numa = MockFabricNuma {
            domains: vec![(PciAddress::new(0, 0, 0, 0), vec![3])],
        };

        let mut soc = turin(&mmio, Some(&nbio));
        soc.pci_resources = Some(&resources);
        soc.fabric_numa = Some(&numa);

        let bridges = soc.pcie_info().unwrap();
        assert_eq!(bridges.len(), 2);

        assert_eq!(bridges[0].root_bridge.index, 10);
        assert_eq!(bridges[0].global_interrupt_start, 24);
        assert_eq!(bridges[0].pxm_domain, 3);
        assert_eq!(bridges[0].cxl_port, None);
        assert_eq!(bridges[0].root_ports.len(), 2);
        assert_eq!(bridges[0].root_ports[1].index, 2);

        assert_eq!(bridges[1].global_interrupt_start, 56);
        // Fabric does not know this bus, fall back to the socket id.
        assert_eq!(bridges[1].pxm_domain, 1);
        assert_eq!(
            bridges[1].cxl_port,
            Some(CxlPortInfo {
                endpoint: PciAddress::new(0, 0x40, 0, 0),
                is_cxl2: true
            })
        );
        assert_eq!(bridges[1].root_ports.len(), 1);
    }

    #[test]
    fn test_pcie_info_errors() {
        let mut mmio = MockMmio::default();
        mmio.add_ioapic(0xFEC0_0000, 0xF0, 23);
        let nbio = MockNbio::new(&[(0, 0xC900_0000)]);
        let mut resources = MockPciResources::new(vec![
            (RootBridge::default(), 1),
            (RootBridge::default(), 1),
        ]);

        // No IOAPIC information.
        let mut soc = turin(&mmio, None);
        soc.pci_resources = Some(&resources);
        assert_eq!(soc.pcie_info(), Err(PlatformError::NotFound));

        // More root bridges than NBIO IOAPICs.
        soc.nbio = Some(&nbio);
        assert_eq!(soc.pcie_info(), Err(PlatformError::NotFound));

        // Failing root port query aborts the whole enumeration.
        resources.failing_root_port = Some(PlatformError::Unsupported);
        resources.bridges.truncate(1);
        let mut soc = turin(&mmio, Some(&nbio));
        soc.pci_resources = Some(&resources);
        assert_eq!(soc.pcie_info(), Err(PlatformError::Unsupported));

        // No PCI resources service.
        soc.pci_resources = None;
        assert_eq!(soc.pcie_info(), Err(PlatformError::NotFound));
    }
}
