// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Board configuration consumed by the platform-init code.

use serde::{Deserialize, Serialize};

use crate::topology::CcdOrder;

/// Errors associated with loading a [`PlatformConfig`].
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum ConfigError {
    /// Cannot parse the platform configuration: {0}
    Json(#[from] serde_json::Error),
    /// The CCD order lists CCD {0} more than once
    DuplicateCcd(u32),
    /// Invalid socket counts: {physical} physical sockets for a maximum of {max}
    SocketCount { physical: u8, max: u8 },
    /// `{field}` must hold at most {max} ASCII characters: {value:?}
    InvalidOemField {
        field: &'static str,
        max: usize,
        value: String,
    },
}

/// Values the board firmware is built with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    /// Highest number of sockets the board supports. More than one splits processor collation
    /// per socket.
    pub max_cpu_socket_count: u8,
    /// Number of populated sockets, bounds the SMBIOS slot enumeration.
    pub number_of_physical_sockets: u8,
    pub ccd_order: CcdOrder,
    pub fch_ioapic_id: u8,
    pub fch_ioapic_address: u32,
    /// Slot characteristics 1 of every SMBIOS system slot record.
    pub slot_characteristics1: u8,
    /// Slot characteristics 2 of every SMBIOS system slot record.
    pub slot_characteristics2: u8,
    /// OEM table id of the DSDT the CPU devices are merged into.
    pub dsdt_oem_table_id: String,
    pub ssdt_oem_id: String,
    pub ssdt_oem_table_id: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            max_cpu_socket_count: 1,
            number_of_physical_sockets: 1,
            ccd_order: CcdOrder::default(),
            fch_ioapic_id: 0xF0,
            fch_ioapic_address: 0xFEC0_0000,
            slot_characteristics1: 0x04,
            slot_characteristics2: 0x01,
            dsdt_oem_table_id: String::from("AmdTable"),
            ssdt_oem_id: String::from("AMD   "),
            ssdt_oem_table_id: String::from("SSDTPROC"),
        }
    }
}

/// Pads `value` with spaces to the fixed width of an ACPI OEM field.
fn oem_field<const N: usize>(value: &str) -> [u8; N] {
    let mut field = [b' '; N];
    for (dst, src) in field.iter_mut().zip(value.bytes()) {
        *dst = src;
    }
    field
}

fn check_oem_field(field: &'static str, value: &str, max: usize) -> Result<(), ConfigError> {
    if value.len() > max || !value.is_ascii() {
        return Err(ConfigError::InvalidOemField {
            field,
            max,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl PlatformConfig {
    /// Parses and validates a JSON document. Missing fields keep their default value.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PlatformConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ccd_order.is_permutation() {
            let mut seen = Vec::with_capacity(self.ccd_order.0.len());
            for &ccd in &self.ccd_order.0 {
                if seen.contains(&ccd) {
                    return Err(ConfigError::DuplicateCcd(ccd));
                }
                seen.push(ccd);
            }
        }

        if self.max_cpu_socket_count == 0
            || self.number_of_physical_sockets == 0
            || self.number_of_physical_sockets > self.max_cpu_socket_count
        {
            return Err(ConfigError::SocketCount {
                physical: self.number_of_physical_sockets,
                max: self.max_cpu_socket_count,
            });
        }

        check_oem_field("dsdt_oem_table_id", &self.dsdt_oem_table_id, 8)?;
        check_oem_field("ssdt_oem_id", &self.ssdt_oem_id, 6)?;
        check_oem_field("ssdt_oem_table_id", &self.ssdt_oem_table_id, 8)?;
        Ok(())
    }

    /// Processors are collated per socket.
    pub fn multi_socket(&self) -> bool {
        self.max_cpu_socket_count > 1
    }

    pub fn dsdt_oem_table_id(&self) -> [u8; 8] {
        oem_field(&self.dsdt_oem_table_id)
    }

    pub fn ssdt_oem_id(&self) -> [u8; 6] {
        oem_field(&self.ssdt_oem_id)
    }

    pub fn ssdt_oem_table_id(&self) -> [u8; 8] {
        oem_field(&self.ssdt_oem_table_id)
    }
}
