//! Byte-positional access to the backing image.
//!
//! Every other component reads and writes the volume through this seam; the
//! engine itself never touches `std::fs` directly. [`ImageFile`] is the host
//! file implementation used by the shell, [`RamDisk`] keeps a whole image in
//! memory and backs the test suite.

use spin::RwLock;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErr {
    ReadError,
    WriteError,
}

pub trait BlockDevice: Send + Sync {
    /// Read exactly `buf.len()` bytes starting at byte `offset`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), DeviceErr>;

    /// Write all of `buf` starting at byte `offset`.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), DeviceErr>;

    /// Total size of the image in bytes.
    fn size(&self) -> Result<u64, DeviceErr>;
}

/// A FAT32 image stored as an ordinary host file.
///
/// The file handle lives behind a lock so the I/O methods can take `&self`;
/// the shell is single-threaded, so the lock is never contended.
pub struct ImageFile(RwLock<File>);

impl ImageFile {
    pub fn new(file: File) -> Self {
        Self(RwLock::new(file))
    }
}

impl BlockDevice for ImageFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), DeviceErr> {
        let mut file = self.0.write();
        file.seek(SeekFrom::Start(offset))
            .map_err(|_| DeviceErr::ReadError)?;
        file.read_exact(buf).map_err(|_| DeviceErr::ReadError)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), DeviceErr> {
        let mut file = self.0.write();
        file.seek(SeekFrom::Start(offset))
            .map_err(|_| DeviceErr::WriteError)?;
        file.write_all(buf).map_err(|_| DeviceErr::WriteError)
    }

    fn size(&self) -> Result<u64, DeviceErr> {
        let file = self.0.read();
        file.metadata()
            .map(|m| m.len())
            .map_err(|_| DeviceErr::ReadError)
    }
}

/// An image held entirely in memory.
pub struct RamDisk(RwLock<Vec<u8>>);

impl RamDisk {
    pub fn new(size: usize) -> Self {
        Self(RwLock::new(vec![0u8; size]))
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(RwLock::new(bytes))
    }
}

impl BlockDevice for RamDisk {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), DeviceErr> {
        let bytes = self.0.read();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(DeviceErr::ReadError)?;
        if end > bytes.len() {
            return Err(DeviceErr::ReadError);
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), DeviceErr> {
        let mut bytes = self.0.write();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(DeviceErr::WriteError)?;
        if end > bytes.len() {
            return Err(DeviceErr::WriteError);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> Result<u64, DeviceErr> {
        Ok(self.0.read().len() as u64)
    }
}
