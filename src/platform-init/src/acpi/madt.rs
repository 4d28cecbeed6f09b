// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-place fixups of the MADT installed by the silicon initialization code.

use std::mem::size_of;

use acpi_tables::madt::{
    LocalX2Apic, MADT_RESERVED_TYPE, MADT_REVISION, MADT_SIGNATURE, MadtEntry, MadtHeader,
    MadtSubtables,
};
use acpi_tables::update_checksum;
use log::{debug, error, info, warn};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, IntoBytes};

use super::AcpiError;
use crate::collator::{Collatable, Collation};
use crate::platform::{AcpiTableRegistry, PlatformSoc};

/// Interrupt source override flags: active low, level triggered.
pub const ISO_FLAGS: u16 = 0x000F;
/// Local x2APIC NMI flags: active high, edge triggered.
pub const X2APIC_NMI_FLAGS: u16 = 0x0005;

impl Collatable for LocalX2Apic {
    fn apic_id(&self) -> u32 {
        self.x2apic_id.get()
    }

    fn set_uid(&mut self, uid: u32) {
        self.processor_uid = U32::new(uid);
    }
}

/// What [`patch_madt`] changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MadtPatchSummary {
    pub ioapics: usize,
    /// IOAPIC structures without a platform IOAPIC, turned into reserved structures.
    pub reserved: usize,
    pub interrupt_source_overrides: usize,
    pub x2apic_nmis: usize,
    pub x2apics: usize,
}

fn write_at(table: &mut [u8], offset: usize, bytes: &[u8]) {
    table[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Patches the MADT held in `table` with the platform IOAPICs and orders its local x2APIC
/// structures with `collation`.
///
/// Returns `Ok(None)` without touching the table when the platform does not report any IOAPIC.
/// The whole table is validated before the first byte is written.
pub fn patch_madt(
    table: &mut [u8],
    soc: &dyn PlatformSoc,
    collation: &Collation<'_>,
) -> Result<Option<MadtPatchSummary>, AcpiError> {
    let ioapics = match soc.io_apic_info() {
        Ok(ioapics) if !ioapics.is_empty() => ioapics,
        Ok(_) => {
            warn!("madt: platform reports no IOAPIC, table left unchanged");
            return Ok(None);
        }
        Err(err) => {
            warn!("madt: no IOAPIC information ({err}), table left unchanged");
            return Ok(None);
        }
    };

    let entries = MadtSubtables::new(table)?.collect::<Result<Vec<_>, _>>()?;
    if let Some((offset, _)) = entries.iter().find(|(_, entry)| {
        matches!(entry, MadtEntry::LocalX2Apic(x2apic)
            if usize::from(x2apic.length) != size_of::<LocalX2Apic>())
    }) {
        return Err(acpi_tables::AcpiError::MalformedSubtable(*offset).into());
    }

    let (header, _) = MadtHeader::mut_from_prefix(table).map_err(|_| {
        acpi_tables::AcpiError::TableTooShort {
            expected: size_of::<MadtHeader>(),
            actual: 0,
        }
    })?;
    header.sdt.revision = MADT_REVISION;
    // Bounded by the buffer, checked by `MadtSubtables::new`.
    let declared = header.sdt.length.get() as usize;

    let mut summary = MadtPatchSummary::default();
    let mut x2apics = Vec::new();
    for (offset, entry) in entries {
        match entry {
            MadtEntry::IoApic(mut ioapic) => {
                if let Some(info) = ioapics.get(summary.ioapics) {
                    ioapic.ioapic_id = info.ioapic_id;
                    ioapic.apic_address = U32::new(info.ioapic_address);
                    ioapic.gsi_base = U32::new(info.gsi_base);
                    write_at(table, offset, ioapic.as_bytes());
                } else {
                    table[offset] = MADT_RESERVED_TYPE;
                    summary.reserved += 1;
                }
                summary.ioapics += 1;
            }
            MadtEntry::InterruptSourceOverride(mut iso) => {
                iso.flags = U16::new(ISO_FLAGS);
                write_at(table, offset, iso.as_bytes());
                summary.interrupt_source_overrides += 1;
            }
            MadtEntry::LocalX2ApicNmi(mut nmi) => {
                nmi.flags = U16::new(X2APIC_NMI_FLAGS);
                write_at(table, offset, nmi.as_bytes());
                summary.x2apic_nmis += 1;
            }
            MadtEntry::LocalX2Apic(x2apic) => x2apics.push((offset, x2apic)),
            MadtEntry::Other(_) => {}
        }
    }

    if !x2apics.is_empty() {
        let mut ordered: Vec<LocalX2Apic> = x2apics.iter().map(|&(_, x2apic)| x2apic).collect();
        collation.collate(&mut ordered)?;
        for ((offset, _), x2apic) in x2apics.iter().zip(&ordered) {
            write_at(table, *offset, x2apic.as_bytes());
        }
        summary.x2apics = ordered.len();
    }

    if summary.reserved > 0 {
        info!(
            "madt: {} IOAPIC structures beyond the {} platform IOAPICs marked reserved",
            summary.reserved,
            ioapics.len()
        );
    }

    update_checksum(&mut table[..declared])?;
    debug!("madt: patched {summary:?}");
    Ok(Some(summary))
}

/// Patches the installed MADT and replaces it in `registry`.
///
/// The registry is left untouched when the platform reports no IOAPIC.
pub fn patch_installed_madt(
    registry: &mut dyn AcpiTableRegistry,
    soc: &dyn PlatformSoc,
    collation: &Collation<'_>,
) -> Result<Option<MadtPatchSummary>, AcpiError> {
    let Some((key, mut table)) = registry.find(MADT_SIGNATURE, None) else {
        error!("madt: no MADT installed");
        return Err(AcpiError::TableNotFound(
            String::from_utf8_lossy(&MADT_SIGNATURE).into_owned(),
            String::from("*"),
        ));
    };

    let Some(summary) = patch_madt(&mut table, soc, collation)? else {
        return Ok(None);
    };

    registry
        .uninstall(key)
        .inspect_err(|err| error!("madt: cannot uninstall the MADT: {err}"))?;
    registry
        .install(&table)
        .inspect_err(|err| error!("madt: cannot install the patched MADT: {err}"))?;
    Ok(Some(summary))
}
