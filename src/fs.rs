//! The volume engine.
//!
//! [`FileSystem`] owns the device handle, the decoded geometry, the FAT
//! accessor, the directory context and the open-file table; every shell
//! command maps to one method on it. The directory operations live in
//! [`crate::dir`], the open-file operations in [`crate::file`].

use crate::bpb::BiosParameterBlock;
use crate::device::BlockDevice;
use crate::dir::DirectoryContext;
use crate::fat::Fat;
use crate::file::OpenFileTable;
use crate::{FsError, BOOT_SECTOR_SIZE};

use log::debug;
use std::sync::Arc;

pub struct FileSystem {
    pub(crate) device: Arc<dyn BlockDevice>,
    pub(crate) bpb: BiosParameterBlock,
    pub(crate) fat: Fat,
    pub(crate) cwd: DirectoryContext,
    pub(crate) open_files: OpenFileTable,
}

impl FileSystem {
    /// Open a FAT32 volume: read the boot sector, decode the geometry and
    /// start out at the root directory with no open files.
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Self, FsError> {
        let image_size = device.size().map_err(|_| FsError::InvalidImage)?;

        let mut boot = [0u8; BOOT_SECTOR_SIZE];
        device
            .read_at(&mut boot, 0)
            .map_err(|_| FsError::InvalidImage)?;
        let bpb = BiosParameterBlock::parse(&boot, image_size)?;

        debug!(
            "opened volume: {} B/sector, {} sectors/cluster, root at cluster {}, {} clusters",
            bpb.bytes_per_sector(),
            bpb.sectors_per_cluster(),
            bpb.root_cluster(),
            bpb.data_cluster_cnt()
        );

        let fat = Fat::new(&bpb, Arc::clone(&device));
        let cwd = DirectoryContext::root(bpb.root_cluster());

        Ok(Self {
            device,
            bpb,
            fat,
            cwd,
            open_files: OpenFileTable::new(),
        })
    }

    /// The immutable volume geometry, for `info`.
    pub fn geometry(&self) -> &BiosParameterBlock {
        &self.bpb
    }

    /// Current directory path, beginning with `/`.
    pub fn path(&self) -> &str {
        self.cwd.path()
    }

    /// Read one whole cluster into a fresh buffer.
    pub(crate) fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>, FsError> {
        let mut buf = vec![0u8; self.bpb.cluster_size()];
        self.device.read_at(&mut buf, self.bpb.offset(cluster))?;
        Ok(buf)
    }

    /// Write one whole cluster back.
    pub(crate) fn write_cluster(&self, cluster: u32, buf: &[u8]) -> Result<(), FsError> {
        assert_eq!(buf.len(), self.bpb.cluster_size());
        self.device.write_at(buf, self.bpb.offset(cluster))?;
        Ok(())
    }

    /// Zero-fill a freshly allocated cluster.
    pub(crate) fn clear_cluster(&self, cluster: u32) -> Result<(), FsError> {
        let zeroes = vec![0u8; self.bpb.cluster_size()];
        self.write_cluster(cluster, &zeroes)
    }
}
