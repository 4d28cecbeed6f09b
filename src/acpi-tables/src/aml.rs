// Copyright © 2019 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum AmlError {
    /// Aml Path is empty
    NameEmpty,
    /// Invalid name part length
    InvalidPartLength,
}

pub trait Aml {
    fn append_aml_bytes(&self, _v: &mut Vec<u8>) -> Result<(), AmlError>;

    fn to_aml_bytes(&self) -> Result<Vec<u8>, AmlError> {
        let mut v = Vec::new();
        self.append_aml_bytes(&mut v)?;
        Ok(v)
    }
}

pub const ZERO: Zero = Zero {};
#[derive(Debug)]
pub struct Zero {}

impl Aml for Zero {
    fn append_aml_bytes(&self, v: &mut Vec<u8>) -> Result<(), AmlError> {
        v.push(0u8);
        Ok(())
    }
}

pub const ONE: One = One {};
#[derive(Debug)]
pub struct One {}

impl Aml for One {
    fn append_aml_bytes(&self, v: &mut Vec<u8>) -> Result<(), AmlError> {
        v.push(1u8);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Path {
    root: bool,
    name_parts: Vec<[u8; 4]>,
}

impl Aml for Path {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        if self.root {
            bytes.push(b'\\');
        }

        match self.name_parts.len() {
            0 => return Err(AmlError::NameEmpty),
            1 => {}
            2 => {
                bytes.push(0x2e); /* DualNamePrefix */
            }
            n => {
                bytes.push(0x2f); /* MultiNamePrefix */
                bytes.push(u8::try_from(n).map_err(|_| AmlError::InvalidPartLength)?);
            }
        };

        for part in &self.name_parts {
            bytes.extend_from_slice(part);
        }

        Ok(())
    }
}

impl Path {
    pub fn new(name: &str) -> Result<Self, AmlError> {
        let root = name.starts_with('\\');
        let offset = root as usize;
        let mut name_parts = Vec::new();
        for part in name[offset..].split('.') {
            if part.len() != 4 {
                return Err(AmlError::InvalidPartLength);
            }
            let mut name_part = [0u8; 4];
            name_part.copy_from_slice(part.as_bytes());
            name_parts.push(name_part);
        }

        Ok(Path { root, name_parts })
    }
}

impl TryFrom<&str> for Path {
    type Error = AmlError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Path::new(s)
    }
}

impl Aml for u8 {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        match self {
            0 => ZERO.append_aml_bytes(bytes),
            1 => ONE.append_aml_bytes(bytes),
            x => {
                bytes.push(0x0a); /* BytePrefix */
                bytes.push(*x);
                Ok(())
            }
        }
    }
}

impl Aml for u16 {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x0b); /* WordPrefix */
        bytes.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Aml for u32 {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x0c); /* DWordPrefix */
        bytes.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Aml for u64 {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0x0e); /* QWordPrefix */
        bytes.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

// Integers given as `usize` use the shortest encoding that holds the value.
impl Aml for usize {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        if let Ok(v) = u8::try_from(*self) {
            v.append_aml_bytes(bytes)
        } else if let Ok(v) = u16::try_from(*self) {
            v.append_aml_bytes(bytes)
        } else if let Ok(v) = u32::try_from(*self) {
            v.append_aml_bytes(bytes)
        } else {
            (*self as u64).append_aml_bytes(bytes)
        }
    }
}

fn append_aml_string(v: &str, bytes: &mut Vec<u8>) {
    bytes.push(0x0D); /* String Op */
    bytes.extend_from_slice(v.as_bytes());
    bytes.push(0x0); /* NullChar */
}

impl Aml for &str {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        append_aml_string(self, bytes);
        Ok(())
    }
}

impl Aml for String {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        append_aml_string(self, bytes);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Name {
    bytes: Vec<u8>,
}

impl Aml for Name {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.extend_from_slice(&self.bytes);
        Ok(())
    }
}

impl Name {
    pub fn new(path: Path, inner: &dyn Aml) -> Result<Self, AmlError> {
        let mut bytes = vec![0x08]; /* NameOp */
        path.append_aml_bytes(&mut bytes)?;
        inner.append_aml_bytes(&mut bytes)?;
        Ok(Name { bytes })
    }
}

/*

From the ACPI spec for PkgLength:

"The high 2 bits of the first byte reveal how many follow bytes are in the PkgLength. If the
PkgLength has only one byte, bit 0 through 5 are used to encode the package length (in other
words, values 0-63). If the package length value is more than 63, more than one byte must be
used for the encoding in which case bit 4 and 5 of the PkgLeadByte are reserved and must be zero.
If the multiple bytes encoding is used, bits 0-3 of the PkgLeadByte become the least significant 4
bits of the resulting package length value. The next ByteData will become the next least
significant 8 bits of the resulting value and so on, up to 3 ByteData bytes. Thus, the maximum
package length is 2**28."

*/

/* Also used for NamedField but in that case the length is not included in itself */
#[allow(clippy::cast_possible_truncation)]
fn create_pkg_length(data: &[u8], include_self: bool) -> Vec<u8> {
    let mut result = Vec::new();

    /* PkgLength is inclusive and includes the length bytes */
    let length_length = if data.len() < (2usize.pow(6) - 1) {
        1
    } else if data.len() < (2usize.pow(12) - 2) {
        2
    } else if data.len() < (2usize.pow(20) - 3) {
        3
    } else {
        4
    };

    let length = data.len() + if include_self { length_length } else { 0 };

    match length_length {
        1 => result.push(length as u8),
        2 => {
            result.push((1u8 << 6) | (length & 0xf) as u8);
            result.push((length >> 4) as u8)
        }
        3 => {
            result.push((2u8 << 6) | (length & 0xf) as u8);
            result.push((length >> 4) as u8);
            result.push((length >> 12) as u8);
        }
        _ => {
            result.push((3u8 << 6) | (length & 0xf) as u8);
            result.push((length >> 4) as u8);
            result.push((length >> 12) as u8);
            result.push((length >> 20) as u8);
        }
    }

    result
}

/// Emits `op`, the package length and `body` for every PkgLength-delimited term.
fn append_pkg(op: &[u8], body: &[u8], bytes: &mut Vec<u8>) {
    bytes.extend_from_slice(op);
    bytes.extend_from_slice(&create_pkg_length(body, true));
    bytes.extend_from_slice(body);
}

pub struct Device<'a> {
    path: Path,
    children: Vec<&'a dyn Aml>,
}

impl Aml for Device<'_> {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        let mut tmp = Vec::new();
        self.path.append_aml_bytes(&mut tmp)?;
        for child in &self.children {
            child.append_aml_bytes(&mut tmp)?;
        }

        append_pkg(&[0x5b, 0x82], &tmp, bytes); /* ExtOpPrefix, DeviceOp */
        Ok(())
    }
}

impl<'a> Device<'a> {
    pub fn new(path: Path, children: Vec<&'a dyn Aml>) -> Self {
        Device { path, children }
    }
}

pub struct Scope<'a> {
    path: Path,
    children: Vec<&'a dyn Aml>,
}

impl Aml for Scope<'_> {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        let mut tmp = Vec::new();
        self.path.append_aml_bytes(&mut tmp)?;
        for child in &self.children {
            child.append_aml_bytes(&mut tmp)?;
        }

        append_pkg(&[0x10], &tmp, bytes); /* ScopeOp */
        Ok(())
    }
}

impl<'a> Scope<'a> {
    pub fn new(path: Path, children: Vec<&'a dyn Aml>) -> Self {
        Scope { path, children }
    }
}

pub struct Method<'a> {
    path: Path,
    children: Vec<&'a dyn Aml>,
    args: u8,
    serialized: bool,
}

impl<'a> Method<'a> {
    pub fn new(path: Path, args: u8, serialized: bool, children: Vec<&'a dyn Aml>) -> Self {
        Method {
            path,
            children,
            args,
            serialized,
        }
    }
}

impl Aml for Method<'_> {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        let mut tmp = Vec::new();
        self.path.append_aml_bytes(&mut tmp)?;
        let flags: u8 = (self.args & 0x7) | (u8::from(self.serialized) << 3);
        tmp.push(flags);
        for child in &self.children {
            child.append_aml_bytes(&mut tmp)?;
        }

        append_pkg(&[0x14], &tmp, bytes); /* MethodOp */
        Ok(())
    }
}

pub struct Return<'a> {
    value: &'a dyn Aml,
}

impl<'a> Return<'a> {
    pub fn new(value: &'a dyn Aml) -> Self {
        Return { value }
    }
}

impl Aml for Return<'_> {
    fn append_aml_bytes(&self, bytes: &mut Vec<u8>) -> Result<(), AmlError> {
        bytes.push(0xa4); /* ReturnOp */
        self.value.append_aml_bytes(bytes)
    }
}
