// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! ACPI processor devices for every logical processor.

use acpi_tables::aml::{self, Aml, AmlError, Path};
use acpi_tables::{Sdt, Ssdt};
use log::{debug, info};

use super::{AcpiError, append_to_existing_table};
use crate::collator::ProcessorRecord;
use crate::config::PlatformConfig;
use crate::platform::{AcpiTableRegistry, ProcessorStatus, TableKey};

/// Hardware id of ACPI processor devices.
const ACPI_PROCESSOR_HID: &str = "ACPI0007";
const CPU_SSDT_OEM_REVISION: u32 = 0;

/// `_STA` bits.
pub const STA_PRESENT: u32 = 0x1;
pub const STA_ENABLED: u32 = 0x2;
pub const STA_SHOW_IN_UI: u32 = 0x4;
pub const STA_FUNCTIONING: u32 = 0x8;

/// `_STA` value of a processor.
pub fn processor_sta(status: ProcessorStatus) -> u32 {
    let mut sta = STA_PRESENT | STA_SHOW_IN_UI;
    if status.contains(ProcessorStatus::ENABLED) {
        sta |= STA_ENABLED;
    }
    if status.contains(ProcessorStatus::HEALTHY) {
        sta |= STA_FUNCTIONING;
    }
    sta
}

/// Device name of the processor at `index` in the collated list.
fn device_name(index: usize) -> String {
    format!("C{index:03X}")
}

struct CpuDevice<'a> {
    index: usize,
    processor: &'a ProcessorRecord,
}

impl Aml for CpuDevice<'_> {
    fn append_aml_bytes(&self, v: &mut Vec<u8>) -> Result<(), AmlError> {
        let location = &self.processor.location;
        let sta = processor_sta(self.processor.status) as usize;
        aml::Device::new(
            Path::new(&device_name(self.index))?,
            vec![
                &aml::Name::new("_HID".try_into()?, &ACPI_PROCESSOR_HID)?,
                &aml::Name::new("_UID".try_into()?, &(self.processor.uid as usize))?,
                &aml::Method::new("_STA".try_into()?, 0, false, vec![&aml::Return::new(&sta)]),
                &aml::Name::new("PACK".try_into()?, &(location.package as usize))?,
                &aml::Name::new("CCD_".try_into()?, &(location.ccd as usize))?,
                &aml::Name::new("CCX_".try_into()?, &(location.complex as usize))?,
                &aml::Name::new("CORE".try_into()?, &(location.core as usize))?,
                &aml::Name::new("THRD".try_into()?, &(location.thread as usize))?,
            ],
        )
        .append_aml_bytes(v)
    }
}

/// Builds the processor devices of every present processor under `\_SB_`.
///
/// `processors` must already be collated: device names and `_UID` follow the list order.
pub fn build_cpu_ssdt(
    processors: &[ProcessorRecord],
    config: &PlatformConfig,
) -> Result<Ssdt, AcpiError> {
    let devices: Vec<CpuDevice> = processors
        .iter()
        .enumerate()
        .filter(|(_, processor)| processor.is_present())
        .map(|(index, processor)| CpuDevice { index, processor })
        .collect();
    debug!(
        "cpu-ssdt: {} processor devices for {} processors",
        devices.len(),
        processors.len()
    );

    let children: Vec<&dyn Aml> = devices.iter().map(|device| device as &dyn Aml).collect();
    let body = aml::Scope::new(Path::new("\\_SB_")?, children).to_aml_bytes()?;

    Ok(Ssdt::new(
        config.ssdt_oem_id(),
        config.ssdt_oem_table_id(),
        CPU_SSDT_OEM_REVISION,
        body,
    )?)
}

/// Builds the processor devices and merges them into the platform DSDT.
pub fn install_cpu_ssdt(
    registry: &mut dyn AcpiTableRegistry,
    processors: &[ProcessorRecord],
    config: &PlatformConfig,
) -> Result<TableKey, AcpiError> {
    let ssdt = build_cpu_ssdt(processors, config)?;
    let key = append_to_existing_table(registry, config.dsdt_oem_table_id(), &ssdt)?;
    info!("cpu-ssdt: merged {} bytes of processor devices", ssdt.len());
    Ok(key)
}
