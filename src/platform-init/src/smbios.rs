// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! SMBIOS System Slots (Type 9) records for the PCIe slots of the board.

use log::{debug, error, warn};
use smbios_tables::type9::{SlotDataBusWidth, SlotType, SlotUsage};
use smbios_tables::{SmbiosRecord, Type9};
use zerocopy::little_endian::U16;

use crate::config::PlatformConfig;
use crate::platform::dxio::{DxioEndpointStatus, DxioEngineType, DxioLinkSpeed};
use crate::platform::{
    CpmTables, DxioPortDescriptor, NbioPcieServices, PciAddress, PciePlatformConfig,
    PlatformError, SmbiosRegistry,
};

#[derive(Debug, thiserror::Error, displaydoc::Display)]
/// Error type for SMBIOS related operations
pub enum SmbiosError {
    /// SMBIOS structure error: {0}
    Structure(#[from] smbios_tables::SmbiosError),
    /// Platform service failure: {0}
    Platform(#[from] PlatformError),
}

/// Address of the PCIe engine wired to `slot_num`.
pub fn slot_bdf_info(
    topology: &PciePlatformConfig,
    slot_num: u16,
) -> Result<PciAddress, PlatformError> {
    topology
        .engines()
        .find(|engine| engine.slot_num == slot_num)
        .map(|engine| engine.address)
        .ok_or(PlatformError::NotFound)
}

fn slot_type(port: &DxioPortDescriptor) -> SlotType {
    if port.engine.engine_type != DxioEngineType::Pcie {
        return SlotType::Other;
    }
    match port.port.link_speed_capability {
        DxioLinkSpeed::Gen1 => SlotType::PciExpress,
        DxioLinkSpeed::Gen2 => SlotType::PciExpressGen2,
        DxioLinkSpeed::Gen3 => SlotType::PciExpressGen3,
        DxioLinkSpeed::Gen4 => SlotType::PciExpressGen4,
        DxioLinkSpeed::Gen5 | DxioLinkSpeed::MaxSupported | DxioLinkSpeed::Unknown(_) => {
            SlotType::PciExpressGen5
        }
    }
}

fn slot_width(port: &DxioPortDescriptor) -> SlotDataBusWidth {
    match port.engine.lane_span() {
        Some(15) => SlotDataBusWidth::X16,
        Some(7) => SlotDataBusWidth::X8,
        Some(3) => SlotDataBusWidth::X4,
        Some(1) => SlotDataBusWidth::X2,
        _ => SlotDataBusWidth::X1,
    }
}

fn slot_usage(port: &DxioPortDescriptor) -> SlotUsage {
    match port.port.endpoint_status {
        DxioEndpointStatus::Detected => SlotUsage::InUse,
        DxioEndpointStatus::NotPresent => SlotUsage::Available,
        DxioEndpointStatus::Unknown => SlotUsage::Unknown,
    }
}

/// Builds the System Slots record of `port`.
///
/// Without a matching engine in `topology` the record keeps the unassigned segment, bus and
/// device-function values.
pub fn create_system_slot_record(
    port: &DxioPortDescriptor,
    topology: Option<&PciePlatformConfig>,
    config: &PlatformConfig,
) -> Type9 {
    let slot_num = port.port.slot_num;
    let mut record = Type9::new(&format!("PCIE-{slot_num}"));
    let width = slot_width(port);

    let fixed = &mut record.fixed;
    fixed.slot_type = slot_type(port) as u8;
    fixed.slot_data_bus_width = width as u8;
    fixed.data_bus_width = width.lanes();
    fixed.current_usage = slot_usage(port) as u8;
    fixed.slot_id = U16::new(slot_num);
    fixed.slot_characteristics1 = config.slot_characteristics1;
    fixed.slot_characteristics2 = config.slot_characteristics2;
    record.extension.slot_physical_width = width as u8;

    match topology.map(|topology| slot_bdf_info(topology, slot_num)) {
        Some(Ok(address)) => {
            record.fixed.segment_group_num = U16::new(address.segment);
            record.fixed.bus_num = address.bus;
            record.fixed.dev_func_num = address.dev_func();
        }
        Some(Err(err)) => error!("smbios: no SBDF information for slot {slot_num}: {err}"),
        None => error!("smbios: no PCIe topology for slot {slot_num}"),
    }

    record
}

/// Adds one System Slots record per populated slot of every physical socket.
///
/// Returns the handles of the added records. A record that cannot be serialized is skipped,
/// a registry failure stops the enumeration.
pub fn system_slot_info(
    registry: &mut dyn SmbiosRegistry,
    cpm: &dyn CpmTables,
    nbio: Option<&dyn NbioPcieServices>,
    config: &PlatformConfig,
) -> Result<Vec<u16>, SmbiosError> {
    let topology = nbio.and_then(|nbio| {
        nbio.pcie_topology()
            .inspect_err(|err| warn!("smbios: cannot read the PCIe topology: {err}"))
            .ok()
    });

    let mut handles = Vec::new();
    for socket in 0..config.number_of_physical_sockets {
        let Some(ports) = cpm.dxio_topology(socket) else {
            debug!("smbios: no DXIO topology for socket {socket}");
            continue;
        };

        for port in &ports {
            if port.has_slot() {
                let record = create_system_slot_record(port, topology.as_ref(), config);
                match record.to_bytes() {
                    Ok(bytes) => handles.push(registry.add(&bytes)?),
                    Err(err) => error!(
                        "smbios: system slot {} error: {err}",
                        port.port.slot_num
                    ),
                }
            }
            if port.is_last() {
                break;
            }
        }
    }

    debug!("smbios: {} system slot records", handles.len());
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use smbios_tables::type9::SMBIOS_TYPE_SYSTEM_SLOTS;

    use super::*;
    use crate::platform::dxio::{DESCRIPTOR_TERMINATE_LIST, DxioEngineData, DxioPortData};
    use crate::platform::{PcieEngine, PcieWrapper};
    use crate::test_utils::{MockCpm, MockNbio, MockSmbios};

    fn pcie_port(slot_num: u16, start_lane: u16, end_lane: u16) -> DxioPortDescriptor {
        DxioPortDescriptor {
            flags: 0,
            engine: DxioEngineData {
                engine_type: DxioEngineType::Pcie,
                start_lane,
                end_lane,
            },
            port: DxioPortData {
                present: true,
                slot_num,
                link_speed_capability: DxioLinkSpeed::Gen4,
                endpoint_status: DxioEndpointStatus::Detected,
            },
        }
    }

    /// NBIO topology with slot 3 at 0001:41:01.2.
    fn nbio() -> MockNbio {
        let mut nbio = MockNbio::new(&[(0, 0)]);
        nbio.topology.complexes[0].silicons[0].wrappers = vec![PcieWrapper {
            engines: vec![
                PcieEngine {
                    slot_num: 1,
                    address: PciAddress::new(0, 0x01, 1, 1),
                },
                PcieEngine {
                    slot_num: 3,
                    address: PciAddress::new(1, 0x41, 1, 2),
                },
            ],
        }];
        nbio
    }

    #[test]
    fn test_slot_bdf_info() {
        let nbio = nbio();
        assert_eq!(
            slot_bdf_info(&nbio.topology, 3),
            Ok(PciAddress::new(1, 0x41, 1, 2))
        );
        assert_eq!(
            slot_bdf_info(&nbio.topology, 7),
            Err(PlatformError::NotFound)
        );
    }

    #[test]
    fn test_x4_slot_record() {
        let config = PlatformConfig::default();
        let nbio = nbio();
        let record = create_system_slot_record(&pcie_port(3, 16, 19), Some(&nbio.topology), &config);

        assert_eq!(record.fixed.data_bus_width, 4);
        assert_eq!(record.fixed.slot_data_bus_width, SlotDataBusWidth::X4 as u8);
        assert_eq!(record.extension.slot_physical_width, SlotDataBusWidth::X4 as u8);
        assert_eq!(record.fixed.slot_type, SlotType::PciExpressGen4 as u8);
        assert_eq!(record.fixed.current_usage, SlotUsage::InUse as u8);
        assert_eq!(record.fixed.slot_id.get(), 3);
        assert_eq!(record.fixed.segment_group_num.get(), 1);
        assert_eq!(record.fixed.bus_num, 0x41);
        assert_eq!(record.fixed.dev_func_num, 0x0A);
        assert_eq!(record.fixed.slot_characteristics1, config.slot_characteristics1);
        assert_eq!(record.fixed.slot_characteristics2, config.slot_characteristics2);
        assert_eq!(record.designation, "PCIE-3");
        assert!(record.peer_groups.is_empty());
    }

    #[test]
    fn test_slot_record_fields() {
        let config = PlatformConfig::default();
        let mut port = pcie_port(9, 0, 15);

        // Unknown slot keeps the unassigned address.
        let record = create_system_slot_record(&port, None, &config);
        assert_eq!(record.fixed.slot_data_bus_width, SlotDataBusWidth::X16 as u8);
        assert_eq!(record.fixed.data_bus_width, 16);
        assert_eq!(record.fixed.segment_group_num.get(), 0xFFFF);
        assert_eq!(record.fixed.bus_num, 0xFF);
        assert_eq!(record.fixed.dev_func_num, 0xFF);

        for (start, end, width, lanes) in [
            (0, 7, SlotDataBusWidth::X8, 8),
            (4, 5, SlotDataBusWidth::X2, 2),
            (2, 2, SlotDataBusWidth::X1, 1),
            (0, 11, SlotDataBusWidth::X1, 1),
            (5, 0, SlotDataBusWidth::X1, 1),
        ] {
            port.engine.start_lane = start;
            port.engine.end_lane = end;
            let record = create_system_slot_record(&port, None, &config);
            assert_eq!(record.fixed.slot_data_bus_width, width as u8, "{start}-{end}");
            assert_eq!(record.fixed.data_bus_width, lanes, "{start}-{end}");
        }

        for (speed, slot_type) in [
            (DxioLinkSpeed::Gen1, SlotType::PciExpress),
            (DxioLinkSpeed::Gen2, SlotType::PciExpressGen2),
            (DxioLinkSpeed::Gen3, SlotType::PciExpressGen3),
            (DxioLinkSpeed::Gen5, SlotType::PciExpressGen5),
            (DxioLinkSpeed::MaxSupported, SlotType::PciExpressGen5),
            (DxioLinkSpeed::Unknown(7), SlotType::PciExpressGen5),
        ] {
            port.port.link_speed_capability = speed;
            let record = create_system_slot_record(&port, None, &config);
            assert_eq!(record.fixed.slot_type, slot_type as u8, "{speed:?}");
        }

        port.engine.engine_type = DxioEngineType::Sata;
        let record = create_system_slot_record(&port, None, &config);
        assert_eq!(record.fixed.slot_type, SlotType::Other as u8);

        for (status, usage) in [
            (DxioEndpointStatus::Detected, SlotUsage::InUse),
            (DxioEndpointStatus::NotPresent, SlotUsage::Available),
            (DxioEndpointStatus::Unknown, SlotUsage::Unknown),
        ] {
            port.port.endpoint_status = status;
            let record = create_system_slot_record(&port, None, &config);
            assert_eq!(record.fixed.current_usage, usage as u8);
        }
    }

    #[test]
    fn test_system_slot_info() {
        let config = PlatformConfig {
            max_cpu_socket_count: 2,
            number_of_physical_sockets: 2,
            ..Default::default()
        };
        let mut absent = pcie_port(2, 0, 15);
        absent.port.present = false;
        let mut last = pcie_port(3, 16, 19);
        last.flags = DESCRIPTOR_TERMINATE_LIST;
        let cpm = MockCpm {
            sockets: vec![
                vec![
                    pcie_port(0, 0, 0),
                    pcie_port(1, 0, 7),
                    absent,
                    last,
                    // Never reached.
                    pcie_port(4, 0, 3),
                ],
                vec![pcie_port(5, 0, 1)],
            ],
        };
        let nbio = nbio();
        let mut registry = MockSmbios::default();

        let handles = system_slot_info(&mut registry, &cpm, Some(&nbio), &config).unwrap();
        assert_eq!(handles, vec![0, 1, 2]);

        let slot_ids: Vec<u16> = registry
            .structures
            .iter()
            .map(|s| u16::from_le_bytes([s[9], s[10]]))
            .collect();
        assert_eq!(slot_ids, vec![1, 3, 5]);

        let slot3 = &registry.structures[1];
        assert_eq!(slot3[0], SMBIOS_TYPE_SYSTEM_SLOTS);
        assert_eq!(slot3[1], 0x18);
        assert_eq!(&slot3[0x18..], b"PCIE-3\0\0");
        // Segment 1, bus 0x41, device 1 function 2.
        assert_eq!(&slot3[13..16], &[0x01, 0x00, 0x41]);
        assert_eq!(slot3[16], 0x0A);
    }

    #[test]
    fn test_system_slot_info_sockets() {
        let cpm = MockCpm {
            sockets: vec![vec![], vec![pcie_port(5, 0, 1)]],
        };
        let mut registry = MockSmbios::default();

        // Only the first socket is populated.
        let handles =
            system_slot_info(&mut registry, &cpm, None, &PlatformConfig::default()).unwrap();
        assert!(handles.is_empty());

        let config = PlatformConfig {
            max_cpu_socket_count: 2,
            number_of_physical_sockets: 2,
            ..Default::default()
        };
        let handles = system_slot_info(&mut registry, &cpm, None, &config).unwrap();
        assert_eq!(handles, vec![0]);
        // No topology: the address stays unassigned.
        assert_eq!(&registry.structures[0][13..17], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_system_slot_info_registry_failure() {
        let cpm = MockCpm {
            sockets: vec![vec![pcie_port(1, 0, 15)]],
        };
        let mut registry = MockSmbios {
            fail_add: Some(PlatformError::OutOfResources),
            ..Default::default()
        };
        assert!(matches!(
            system_slot_info(&mut registry, &cpm, None, &PlatformConfig::default()),
            Err(SmbiosError::Platform(PlatformError::OutOfResources))
        ));
    }
}
