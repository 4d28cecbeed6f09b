// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Platform initialization for AMD family 1Ah server boards: processor ordering, MADT fixups,
//! processor devices in the ACPI namespace and SMBIOS system slot records.
#![warn(clippy::undocumented_unsafe_blocks)]

/// ACPI table generation and fixups.
pub mod acpi;
/// Ordering of logical processors and assignment of their UIDs.
pub mod collator;
pub mod config;
pub mod logger;
/// Services consumed from the rest of the firmware.
pub mod platform;
pub mod smbios;
pub mod test_utils;
/// Decoding of x2APIC ids into processor locations.
pub mod topology;

use log::info;

use crate::acpi::madt::MadtPatchSummary;
use crate::acpi::{AcpiError, install_cpu_ssdt, patch_installed_madt};
use crate::collator::{CollateError, Collation, ProcessorRecord, collect_processors};
use crate::config::{ConfigError, PlatformConfig};
use crate::platform::{
    AcpiTableRegistry, CpmTables, CpuidSource, MpServices, NbioPcieServices, PlatformSoc,
    SmbiosRegistry, TableKey,
};
use crate::smbios::{SmbiosError, system_slot_info};
use crate::topology::TopologyDecoder;

/// Errors of a board initialization pass.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum BoardInitError {
    /// Invalid platform configuration: {0}
    Config(#[from] ConfigError),
    /// Cannot collect the processors: {0}
    Collate(#[from] CollateError),
    /// ACPI error: {0}
    Acpi(#[from] AcpiError),
    /// SMBIOS error: {0}
    Smbios(#[from] SmbiosError),
}

/// Collaborators of one boot.
pub struct BoardInit<'a> {
    pub config: &'a PlatformConfig,
    pub cpuid: &'a dyn CpuidSource,
    pub mp: &'a dyn MpServices,
    pub soc: &'a dyn PlatformSoc,
    pub cpm: &'a dyn CpmTables,
    pub nbio: Option<&'a dyn NbioPcieServices>,
}

impl std::fmt::Debug for BoardInit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardInit")
            .field("config", &self.config)
            .field("nbio", &self.nbio.is_some())
            .finish_non_exhaustive()
    }
}

/// What a board initialization pass published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInitReport {
    /// Processors in their collated order.
    pub processors: Vec<ProcessorRecord>,
    /// Key of the DSDT holding the processor devices.
    pub dsdt: TableKey,
    /// `None` when the platform had no IOAPIC to describe.
    pub madt: Option<MadtPatchSummary>,
    pub slot_handles: Vec<u16>,
}

impl BoardInit<'_> {
    /// Runs the whole pass.
    ///
    /// Processors are collated once so the processor devices and the MADT x2APIC structures
    /// carry the same UIDs.
    pub fn run(
        &self,
        acpi: &mut dyn AcpiTableRegistry,
        smbios: &mut dyn SmbiosRegistry,
    ) -> Result<BoardInitReport, BoardInitError> {
        self.config.validate()?;

        let decoder = TopologyDecoder::from_cpuid(self.cpuid);
        let collation = Collation {
            decoder: &decoder,
            ccd_order: &self.config.ccd_order,
            multi_socket: self.config.multi_socket(),
        };
        let mut processors = collect_processors(self.mp, &decoder)?;
        collation.collate(&mut processors)?;

        let dsdt = install_cpu_ssdt(acpi, &processors, self.config)?;
        let madt = patch_installed_madt(acpi, self.soc, &collation)?;
        let slot_handles = system_slot_info(smbios, self.cpm, self.nbio, self.config)?;

        info!(
            "{} processors published, {} system slots",
            processors.len(),
            slot_handles.len()
        );
        Ok(BoardInitReport {
            processors,
            dsdt,
            madt,
            slot_handles,
        })
    }
}
