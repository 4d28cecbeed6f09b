// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ordering of logical processors and assignment of their ACPI processor UIDs.
//!
//! The same ordering is applied to the processor list used to build the CPU namespace and to
//! the local x2APIC structures of the MADT, so that both tables agree on every UID:
//!
//! 1. Processors are sorted by the rank of their CCD in the [`CcdOrder`]. On multi-socket
//!    platforms each half of the list is sorted on its own.
//! 2. When SMT is enabled, first threads are moved in front of second threads, keeping the
//!    relative order inside each group.
//! 3. Every processor gets its final position as UID.

use log::debug;

use crate::platform::{MpServices, PlatformError, ProcessorStatus};
use crate::topology::{CcdOrder, ProcessorLocation, TopologyDecoder};

#[derive(Debug, thiserror::Error, displaydoc::Display, PartialEq, Eq)]
pub enum CollateError {
    /// Cannot allocate the processor list
    OutOfResources,
    /// Too many processors for 32-bit UIDs: {0}
    TooManyProcessors(usize),
    /// Processor {index} has an identifier wider than 32 bits: {processor_id:#x}
    InvalidProcessorId { index: usize, processor_id: u64 },
    /// MP services failure: {0}
    Platform(#[from] PlatformError),
}

impl From<CollateError> for PlatformError {
    fn from(err: CollateError) -> Self {
        match err {
            CollateError::OutOfResources => PlatformError::OutOfResources,
            CollateError::TooManyProcessors(_) | CollateError::InvalidProcessorId { .. } => {
                PlatformError::InvalidParameter
            }
            CollateError::Platform(err) => err,
        }
    }
}

/// An entry that takes part in processor collation.
pub trait Collatable: Clone {
    /// x2APIC identifier of the logical processor.
    fn apic_id(&self) -> u32;

    fn set_uid(&mut self, uid: u32);

    /// Returns true for the second thread of an SMT core.
    fn is_secondary_thread(&self) -> bool {
        self.apic_id() & 1 == 1
    }
}

/// One logical processor of the platform.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorRecord {
    pub processor_id: u32,
    pub status: ProcessorStatus,
    pub location: ProcessorLocation,
    /// ACPI processor UID, valid once the list is collated.
    pub uid: u32,
}

impl ProcessorRecord {
    pub fn is_present(&self) -> bool {
        !self.status.is_empty()
    }
}

impl Collatable for ProcessorRecord {
    fn apic_id(&self) -> u32 {
        self.processor_id
    }

    fn set_uid(&mut self, uid: u32) {
        self.uid = uid;
    }
}

/// How a list of processors is ordered.
#[derive(Debug, Clone, Copy)]
pub struct Collation<'a> {
    pub decoder: &'a TopologyDecoder,
    pub ccd_order: &'a CcdOrder,
    /// Sort each half of the list on its own.
    pub multi_socket: bool,
}

impl Collation<'_> {
    fn sort_by_ccd<T: Collatable>(&self, items: &mut [T]) {
        items.sort_by_cached_key(|item| {
            self.ccd_order
                .location_rank(&self.decoder.decode(item.apic_id()))
        });
    }

    /// Orders `items` and assigns each one its final position as UID.
    pub fn collate<T: Collatable>(&self, items: &mut [T]) -> Result<(), CollateError> {
        if u32::try_from(items.len()).is_err() {
            return Err(CollateError::TooManyProcessors(items.len()));
        }

        if self.multi_socket {
            let (first, second) = items.split_at_mut(items.len() / 2);
            self.sort_by_ccd(first);
            self.sort_by_ccd(second);
        } else {
            self.sort_by_ccd(items);
        }

        if items.len() >= 2 && items[1].is_secondary_thread() {
            partition_threads(items)?;
        }

        for (uid, item) in (0u32..).zip(items.iter_mut()) {
            item.set_uid(uid);
        }
        Ok(())
    }
}

/// Moves first threads in front of second threads, keeping the relative order of each group.
fn partition_threads<T: Collatable>(items: &mut [T]) -> Result<(), CollateError> {
    let mut partitioned = Vec::new();
    partitioned
        .try_reserve_exact(items.len())
        .map_err(|_| CollateError::OutOfResources)?;

    partitioned.extend(items.iter().filter(|item| !item.is_secondary_thread()).cloned());
    partitioned.extend(items.iter().filter(|item| item.is_secondary_thread()).cloned());

    items.clone_from_slice(&partitioned);
    Ok(())
}

/// Reads every logical processor from the MP services and decodes its location.
pub fn collect_processors(
    mp: &dyn MpServices,
    decoder: &TopologyDecoder,
) -> Result<Vec<ProcessorRecord>, CollateError> {
    let (total, enabled) = mp.number_of_processors()?;
    debug!("collator: {total} logical processors, {enabled} enabled");

    let mut processors = Vec::new();
    processors
        .try_reserve_exact(total)
        .map_err(|_| CollateError::OutOfResources)?;

    for index in 0..total {
        let info = mp.processor_info(index)?;
        let processor_id =
            u32::try_from(info.processor_id).map_err(|_| CollateError::InvalidProcessorId {
                index,
                processor_id: info.processor_id,
            })?;
        processors.push(ProcessorRecord {
            processor_id,
            status: info.status,
            location: decoder.decode(processor_id),
            uid: 0,
        });
    }

    Ok(processors)
}
