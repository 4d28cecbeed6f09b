// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use acpi_tables::dsdt::DSDT_SIGNATURE;
use acpi_tables::{Dsdt, Sdt, Ssdt, aml};
use log::{debug, error};

use crate::collator::CollateError;
use crate::platform::{AcpiTableRegistry, PlatformError, TableKey};

pub mod cpu_ssdt;
pub mod madt;

pub use cpu_ssdt::{build_cpu_ssdt, install_cpu_ssdt};
pub use madt::{patch_installed_madt, patch_madt};

#[derive(Debug, thiserror::Error, displaydoc::Display)]
/// Error type for ACPI related operations
pub enum AcpiError {
    /// ACPI tables error: {0}
    AcpiTables(#[from] acpi_tables::AcpiError),
    /// Error creating AML bytecode: {0}
    AmlError(#[from] aml::AmlError),
    /// Cannot order the processors: {0}
    Collate(#[from] CollateError),
    /// Platform service failure: {0}
    Platform(#[from] PlatformError),
    /// No installed {0} table with OEM table id {1}
    TableNotFound(String, String),
}

impl From<AcpiError> for PlatformError {
    fn from(err: AcpiError) -> Self {
        match err {
            AcpiError::Collate(err) => err.into(),
            AcpiError::Platform(err) => err,
            AcpiError::TableNotFound(..) => PlatformError::NotFound,
            AcpiError::AcpiTables(_) | AcpiError::AmlError(_) => PlatformError::InvalidParameter,
        }
    }
}

/// Merges the definition block of `ssdt` into the installed DSDT carrying `oem_table_id`.
///
/// The merged copy replaces the original table and its new key is returned.
pub fn append_to_existing_table(
    registry: &mut dyn AcpiTableRegistry,
    oem_table_id: [u8; 8],
    ssdt: &Ssdt,
) -> Result<TableKey, AcpiError> {
    let Some((key, table)) = registry.find(DSDT_SIGNATURE, Some(oem_table_id)) else {
        let signature = String::from_utf8_lossy(&DSDT_SIGNATURE).into_owned();
        let oem_table_id = String::from_utf8_lossy(&oem_table_id).into_owned();
        error!("acpi: cannot find {signature} table {oem_table_id:?}");
        return Err(AcpiError::TableNotFound(signature, oem_table_id));
    };

    let mut dsdt = Dsdt::from_bytes(&table)?;
    dsdt.append_definition_block(ssdt.definition_block())?;
    let merged = dsdt.to_bytes();

    registry
        .uninstall(key)
        .inspect_err(|err| error!("acpi: cannot uninstall the DSDT: {err}"))?;
    let key = registry
        .install(&merged)
        .inspect_err(|err| error!("acpi: cannot install the merged DSDT: {err}"))?;

    debug!(
        "acpi: appended {} bytes to the DSDT ({} bytes)",
        ssdt.definition_block().len(),
        merged.len()
    );
    Ok(key)
}

#[cfg(test)]
mod tests {
    use acpi_tables::{Dsdt, checksum_is_valid};

    use super::*;
    use crate::test_utils::MockAcpiTables;

    fn registry_with_dsdt() -> MockAcpiTables {
        let mut registry = MockAcpiTables::default();
        let other = Dsdt::new(*b"AMD   ", *b"OTHERTBL", 1, vec![0xA3]).unwrap();
        let dsdt = Dsdt::new(*b"AMD   ", *b"AmdTable", 1, vec![0xA3, 0xA3]).unwrap();
        registry.install(&other.to_bytes()).unwrap();
        registry.install(&dsdt.to_bytes()).unwrap();
        registry
    }

    #[test]
    fn test_append_to_existing_table() {
        let mut registry = registry_with_dsdt();
        let ssdt = Ssdt::new(*b"AMD   ", *b"SSDTPROC", 0, vec![1, 2, 3]).unwrap();

        let key = append_to_existing_table(&mut registry, *b"AmdTable", &ssdt).unwrap();
        assert_eq!(key, TableKey(2));
        // The original table is gone, the other DSDT is untouched.
        assert!(registry.tables[1].is_none());
        assert_eq!(registry.tables[0].as_ref().unwrap().len(), 37);

        let merged = registry.tables[2].as_ref().unwrap();
        assert_eq!(merged.len(), 36 + 2 + 3);
        assert_eq!(&merged[36..], &[0xA3, 0xA3, 1, 2, 3]);
        assert!(checksum_is_valid(merged));
        let dsdt = Dsdt::from_bytes(merged).unwrap();
        assert_eq!(dsdt.oem_table_id(), *b"AmdTable");
    }

    #[test]
    fn test_append_to_missing_table() {
        let mut registry = registry_with_dsdt();
        let ssdt = Ssdt::new(*b"AMD   ", *b"SSDTPROC", 0, vec![1]).unwrap();

        let err = append_to_existing_table(&mut registry, *b"NOTTHERE", &ssdt).unwrap_err();
        assert!(matches!(err, AcpiError::TableNotFound(..)));
        assert_eq!(
            err.to_string(),
            "No installed DSDT table with OEM table id NOTTHERE"
        );
        assert_eq!(PlatformError::from(err), PlatformError::NotFound);
        assert_eq!(registry.tables.len(), 2);
    }

    #[test]
    fn test_append_install_failure() {
        let mut registry = registry_with_dsdt();
        registry.fail_install = Some(PlatformError::OutOfResources);
        let ssdt = Ssdt::new(*b"AMD   ", *b"SSDTPROC", 0, vec![1]).unwrap();

        let err = append_to_existing_table(&mut registry, *b"AmdTable", &ssdt).unwrap_err();
        assert!(matches!(
            err,
            AcpiError::Platform(PlatformError::OutOfResources)
        ));
    }
}
