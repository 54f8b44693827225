//! Open-file table and positional file I/O.
//!
//! A fixed table of ten slots keyed by name. Opening validates everything
//! up front; afterwards read, write and seek move a byte offset that never
//! leaves `[0, size]`. Reads and writes step through the file sector by
//! sector, consulting the FAT before every cluster hop.

use crate::dir::DirEntryPos;
use crate::entry::{patch_file_size, patch_first_cluster};
use crate::fat::ClusterLink;
use crate::fs::FileSystem;
use crate::{FsError, DIRENT_SIZE, FIRST_VALID_CLUSTER, MAX_OPEN_FILES};

use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    ReadWrite,
}

impl Mode {
    /// Parse the shell's mode flag: `-r`, `-w`, `-rw` or `-wr`.
    pub fn parse(flag: &str) -> Result<Self, FsError> {
        match flag {
            "-r" => Ok(Mode::Read),
            "-w" => Ok(Mode::Write),
            "-rw" | "-wr" => Ok(Mode::ReadWrite),
            _ => Err(FsError::BadMode),
        }
    }

    pub fn readable(self) -> bool {
        !matches!(self, Mode::Write)
    }

    pub fn writable(self) -> bool {
        !matches!(self, Mode::Read)
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Read => "Read-Only",
            Mode::Write => "Write-Only",
            Mode::ReadWrite => "Read-Write",
        }
    }
}

/// One active slot of the open-file table.
pub struct OpenFile {
    name: String,
    mode: Mode,
    /// Starting cluster; 0 until the first write allocates a chain.
    cluster: u32,
    /// Cached copy of the entry's fileSize field.
    size: u32,
    /// Position for the next read or write; never exceeds `size`.
    offset: u32,
    /// Where the 32-byte directory entry lives on disk, so size and
    /// start-cluster updates can be persisted in place.
    entry_pos: DirEntryPos,
}

impl OpenFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

pub(crate) struct OpenFileTable {
    slots: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl OpenFileTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|f| f.name == name))
    }

    fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }

    fn get(&self, index: usize) -> &OpenFile {
        self.slots[index].as_ref().unwrap()
    }

    fn get_mut(&mut self, index: usize) -> &mut OpenFile {
        self.slots[index].as_mut().unwrap()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &OpenFile)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|f| (i, f)))
    }
}

impl FileSystem {
    /// `open`: validate, then populate a free slot with offset 0.
    pub fn open_file(&mut self, name: &str, mode_flag: &str) -> Result<(), FsError> {
        if self.open_files.index_of(name).is_some() {
            return Err(FsError::AlreadyOpen);
        }
        let index = self.open_files.first_free().ok_or(FsError::TooManyOpen)?;
        let mode = Mode::parse(mode_flag)?;

        let (entry, entry_pos) = self.lookup_entry(name)?;
        if entry.is_dir() {
            return Err(FsError::IsADirectory);
        }

        self.open_files.slots[index] = Some(OpenFile {
            name: name.to_string(),
            mode,
            cluster: entry.first_cluster(),
            size: entry.file_size(),
            offset: 0,
            entry_pos,
        });
        debug!("opened '{name}' in slot {index} ({})", mode.label());
        Ok(())
    }

    /// `close`: free the slot.
    pub fn close_file(&mut self, name: &str) -> Result<(), FsError> {
        let index = self.open_files.index_of(name).ok_or(FsError::NotOpen)?;
        self.open_files.slots[index] = None;
        debug!("closed '{name}'");
        Ok(())
    }

    /// `lsof`: active slots in table order.
    pub fn open_files(&self) -> impl Iterator<Item = (usize, &OpenFile)> {
        self.open_files.iter()
    }

    /// `lseek`: reposition within `[0, size]`.
    pub fn seek_file(&mut self, name: &str, offset: u32) -> Result<(), FsError> {
        let index = self.open_files.index_of(name).ok_or(FsError::NotOpen)?;
        if offset > self.open_files.get(index).size {
            return Err(FsError::OffsetTooLarge);
        }
        self.open_files.get_mut(index).offset = offset;
        Ok(())
    }

    /// `read`: up to `count` bytes from the current offset, clamped to the
    /// end of the file. The offset advances by what was actually read.
    pub fn read_file(&mut self, name: &str, count: usize) -> Result<Vec<u8>, FsError> {
        let index = self.open_files.index_of(name).ok_or(FsError::NotOpen)?;
        let file = self.open_files.get(index);
        if !file.mode.readable() {
            return Err(FsError::NotReadable);
        }
        let (cluster, size, offset) = (file.cluster, file.size, file.offset);

        let available = (size - offset) as usize;
        let wanted = count.min(available);
        let mut out = vec![0u8; wanted];
        if wanted > 0 {
            let got = self.read_chain(cluster, offset as u64, &mut out)?;
            out.truncate(got);
        }

        self.open_files.get_mut(index).offset += out.len() as u32;
        Ok(out)
    }

    /// `write`: `data` at the current offset, extending the file (and its
    /// cluster chain) as needed. On success the offset moves past the data
    /// and any new size is persisted into the directory entry.
    pub fn write_file(&mut self, name: &str, data: &[u8]) -> Result<usize, FsError> {
        let index = self.open_files.index_of(name).ok_or(FsError::NotOpen)?;
        let file = self.open_files.get(index);
        if !file.mode.writable() {
            return Err(FsError::NotWritable);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let (mut cluster, size, offset, entry_pos) =
            (file.cluster, file.size, file.offset, file.entry_pos);

        // A zero-byte file has no chain yet; the first write allocates one
        // and records it in the directory entry. The slot is updated right
        // away so the handle and the entry agree even if the write below
        // runs out of space.
        if cluster < FIRST_VALID_CLUSTER {
            let first = self.fat.allocate_cluster()?;
            self.clear_cluster(first)?;
            self.patch_entry(entry_pos, |slot| patch_first_cluster(slot, first))?;
            self.open_files.get_mut(index).cluster = first;
            cluster = first;
        }

        self.write_chain(cluster, offset as u64, data)?;

        let new_offset = offset + data.len() as u32;
        let new_size = size.max(new_offset);
        if new_size != size {
            self.patch_entry(entry_pos, |slot| patch_file_size(slot, new_size))?;
        }

        let file = self.open_files.get_mut(index);
        file.cluster = cluster;
        file.offset = new_offset;
        file.size = new_size;
        Ok(data.len())
    }

    /// Read `buf.len()` bytes of a chain starting `offset` bytes in,
    /// sector by sector. Returns how much was actually read; a chain that
    /// ends before the cached size does is logged and cut short.
    fn read_chain(&self, start: u32, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let bps = self.bpb.bytes_per_sector() as u64;
        let spc = self.bpb.sectors_per_cluster() as u64;
        let cluster_size = self.bpb.cluster_size() as u64;

        if start < FIRST_VALID_CLUSTER {
            warn!("read from a file with no cluster chain");
            return Ok(0);
        }
        let mut cluster = match self.fat.walk(start, offset / cluster_size)? {
            ClusterLink::Next(cluster) => cluster,
            ClusterLink::EndOfChain => {
                warn!("cluster chain at {start} is shorter than the file offset");
                return Ok(0);
            }
        };

        let mut sector_in_cluster = (offset % cluster_size) / bps;
        let mut byte_in_sector = (offset % bps) as usize;
        let mut done = 0usize;

        while done < buf.len() {
            let sector = self.bpb.first_sector_of_cluster(cluster) + sector_in_cluster;
            let len = (bps as usize - byte_in_sector).min(buf.len() - done);
            self.device
                .read_at(&mut buf[done..done + len], sector * bps + byte_in_sector as u64)?;
            done += len;
            byte_in_sector = 0;

            sector_in_cluster += 1;
            if sector_in_cluster == spc && done < buf.len() {
                sector_in_cluster = 0;
                match self.fat.next_cluster(cluster)? {
                    ClusterLink::Next(next) => cluster = next,
                    ClusterLink::EndOfChain => {
                        warn!(
                            "cluster chain at {start} ended with {} bytes unread",
                            buf.len() - done
                        );
                        break;
                    }
                }
            }
        }
        Ok(done)
    }

    /// Write `data` into a chain starting `offset` bytes in, allocating and
    /// linking fresh clusters whenever the chain runs out.
    fn write_chain(&self, start: u32, offset: u64, data: &[u8]) -> Result<(), FsError> {
        let bps = self.bpb.bytes_per_sector() as u64;
        let spc = self.bpb.sectors_per_cluster() as u64;
        let cluster_size = self.bpb.cluster_size() as u64;

        let mut cluster = start;
        for _ in 0..offset / cluster_size {
            cluster = match self.fat.next_cluster(cluster)? {
                ClusterLink::Next(next) => next,
                ClusterLink::EndOfChain => self.extend_chain(cluster)?,
            };
        }

        let mut sector_in_cluster = (offset % cluster_size) / bps;
        let mut byte_in_sector = (offset % bps) as usize;
        let mut done = 0usize;

        while done < data.len() {
            let sector = self.bpb.first_sector_of_cluster(cluster) + sector_in_cluster;
            let len = (bps as usize - byte_in_sector).min(data.len() - done);
            self.device
                .write_at(&data[done..done + len], sector * bps + byte_in_sector as u64)?;
            done += len;
            byte_in_sector = 0;

            sector_in_cluster += 1;
            if sector_in_cluster == spc && done < data.len() {
                sector_in_cluster = 0;
                cluster = match self.fat.next_cluster(cluster)? {
                    ClusterLink::Next(next) => next,
                    ClusterLink::EndOfChain => self.extend_chain(cluster)?,
                };
            }
        }
        Ok(())
    }

    /// Allocate a zeroed cluster and hang it off `tail`.
    fn extend_chain(&self, tail: u32) -> Result<u32, FsError> {
        let fresh = self.fat.allocate_cluster()?;
        self.clear_cluster(fresh)?;
        self.fat.set_next_cluster(tail, fresh)?;
        Ok(fresh)
    }

    /// Read-modify-write the cluster holding a directory entry slot.
    fn patch_entry(
        &self,
        pos: DirEntryPos,
        patch: impl FnOnce(&mut [u8]),
    ) -> Result<(), FsError> {
        let mut buf = self.read_cluster(pos.cluster)?;
        patch(&mut buf[pos.offset..pos.offset + DIRENT_SIZE]);
        self.write_cluster(pos.cluster, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_volume;
    use rand::{Rng, SeedableRng};

    #[test]
    fn open_validates_names_slots_and_modes() {
        let mut fs = open_volume(1, 8);
        fs.create_file("F").unwrap();
        fs.create_directory("D").unwrap();

        assert_eq!(fs.open_file("NOPE", "-r").unwrap_err(), FsError::NotFound);
        assert_eq!(fs.open_file("F", "-x").unwrap_err(), FsError::BadMode);
        assert_eq!(fs.open_file("F", "r").unwrap_err(), FsError::BadMode);
        assert_eq!(fs.open_file("D", "-r").unwrap_err(), FsError::IsADirectory);

        fs.open_file("F", "-r").unwrap();
        assert_eq!(fs.open_file("F", "-w").unwrap_err(), FsError::AlreadyOpen);

        fs.close_file("F").unwrap();
        assert_eq!(fs.close_file("F").unwrap_err(), FsError::NotOpen);
    }

    #[test]
    fn table_holds_at_most_ten_files() {
        let mut fs = open_volume(1, 8);
        for i in 0..11 {
            fs.create_file(&format!("F{i}")).unwrap();
        }
        for i in 0..10 {
            fs.open_file(&format!("F{i}"), "-r").unwrap();
        }
        assert_eq!(fs.open_file("F10", "-r").unwrap_err(), FsError::TooManyOpen);

        // Closing one frees its slot for the next open.
        fs.close_file("F3").unwrap();
        fs.open_file("F10", "-r").unwrap();
    }

    #[test]
    fn modes_gate_reads_and_writes() {
        let mut fs = open_volume(1, 8);
        fs.create_file("F").unwrap();

        fs.open_file("F", "-r").unwrap();
        assert_eq!(fs.write_file("F", b"x").unwrap_err(), FsError::NotWritable);
        fs.close_file("F").unwrap();

        fs.open_file("F", "-w").unwrap();
        assert_eq!(fs.read_file("F", 1).unwrap_err(), FsError::NotReadable);
        fs.write_file("F", b"x").unwrap();
        fs.close_file("F").unwrap();

        fs.open_file("F", "-wr").unwrap();
        fs.write_file("F", b"y").unwrap();
        fs.seek_file("F", 0).unwrap();
        assert_eq!(fs.read_file("F", 1).unwrap(), b"y");
    }

    #[test]
    fn first_write_allocates_a_chain_and_updates_the_entry() {
        let mut fs = open_volume(1, 8);
        fs.create_file("HELLO.TXT").unwrap();
        fs.open_file("HELLO.TXT", "-rw").unwrap();
        fs.write_file("HELLO.TXT", b"hi").unwrap();

        let (entry, _) = fs.lookup_entry("HELLO.TXT").unwrap();
        assert!(entry.first_cluster() >= FIRST_VALID_CLUSTER);
        assert_eq!(entry.file_size(), 2);

        fs.seek_file("HELLO.TXT", 0).unwrap();
        assert_eq!(fs.read_file("HELLO.TXT", 2).unwrap(), b"hi");
    }

    #[test]
    fn seek_is_bounded_by_the_file_size() {
        let mut fs = open_volume(1, 8);
        fs.create_file("F").unwrap();
        fs.open_file("F", "-rw").unwrap();
        fs.write_file("F", b"abcde").unwrap();

        fs.seek_file("F", 5).unwrap();
        assert_eq!(fs.seek_file("F", 6).unwrap_err(), FsError::OffsetTooLarge);
        assert_eq!(fs.seek_file("MISSING", 0).unwrap_err(), FsError::NotOpen);
    }

    #[test]
    fn read_clamps_to_the_end_of_the_file() {
        let mut fs = open_volume(1, 8);
        fs.create_file("F").unwrap();
        fs.open_file("F", "-rw").unwrap();
        fs.write_file("F", b"abcde").unwrap();
        fs.seek_file("F", 0).unwrap();

        assert_eq!(fs.read_file("F", 100).unwrap(), b"abcde");
        // Offset is parked at the end; further reads return nothing.
        assert_eq!(fs.read_file("F", 10).unwrap(), b"");

        fs.seek_file("F", 3).unwrap();
        assert_eq!(fs.read_file("F", 100).unwrap(), b"de");
    }

    #[test]
    fn overwrite_in_the_middle_keeps_the_size() {
        let mut fs = open_volume(1, 8);
        fs.create_file("F").unwrap();
        fs.open_file("F", "-rw").unwrap();
        fs.write_file("F", b"abcdef").unwrap();

        fs.seek_file("F", 2).unwrap();
        fs.write_file("F", b"XY").unwrap();
        fs.seek_file("F", 0).unwrap();
        assert_eq!(fs.read_file("F", 6).unwrap(), b"abXYef");

        let (entry, _) = fs.lookup_entry("F").unwrap();
        assert_eq!(entry.file_size(), 6);
    }

    #[test]
    fn writes_extend_across_cluster_boundaries() {
        let mut fs = open_volume(1, 8);
        fs.create_file("BIG").unwrap();
        fs.open_file("BIG", "-rw").unwrap();

        // Three 512-byte clusters worth of data.
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut data = vec![0u8; 1300];
        rng.fill(&mut data[..]);

        assert_eq!(fs.write_file("BIG", &data).unwrap(), 1300);
        fs.seek_file("BIG", 0).unwrap();
        assert_eq!(fs.read_file("BIG", 1300).unwrap(), data);

        let (entry, _) = fs.lookup_entry("BIG").unwrap();
        assert_eq!(entry.file_size(), 1300);
    }

    #[test]
    fn append_at_a_cluster_boundary_extends_the_chain() {
        let mut fs = open_volume(1, 8);
        fs.create_file("F").unwrap();
        fs.open_file("F", "-rw").unwrap();

        let first = vec![0x41u8; 512];
        fs.write_file("F", &first).unwrap();
        // offset == size == one full cluster; the next write must hop past
        // the end of the chain and allocate.
        fs.write_file("F", b"tail").unwrap();

        fs.seek_file("F", 510).unwrap();
        assert_eq!(fs.read_file("F", 6).unwrap(), b"AAtail");

        let (entry, _) = fs.lookup_entry("F").unwrap();
        assert_eq!(entry.file_size(), 516);
    }

    #[test]
    fn write_fails_with_no_space_when_the_fat_is_exhausted() {
        // Two data clusters: the root takes one, the file can get the other.
        let mut fs = open_volume(1, 2);
        fs.create_file("F").unwrap();
        fs.open_file("F", "-w").unwrap();
        fs.write_file("F", &[0u8; 512]).unwrap();
        assert_eq!(
            fs.write_file("F", b"overflow").unwrap_err(),
            FsError::NoSpace
        );
    }

    #[test]
    fn size_and_chain_survive_close_and_reopen() {
        let mut fs = open_volume(1, 8);
        fs.create_file("KEEP").unwrap();
        fs.open_file("KEEP", "-w").unwrap();
        fs.write_file("KEEP", b"persistent").unwrap();
        fs.close_file("KEEP").unwrap();

        fs.open_file("KEEP", "-r").unwrap();
        assert_eq!(fs.read_file("KEEP", 100).unwrap(), b"persistent");
        fs.close_file("KEEP").unwrap();
    }

    #[test]
    fn removing_a_file_releases_its_chain() {
        let mut fs = open_volume(1, 8);
        fs.create_file("F").unwrap();
        fs.open_file("F", "-w").unwrap();
        fs.write_file("F", &[1u8; 1100]).unwrap();
        fs.close_file("F").unwrap();

        let (entry, _) = fs.lookup_entry("F").unwrap();
        let first = entry.first_cluster();
        fs.remove_file("F").unwrap();

        // All three clusters are free again; allocation restarts at the
        // lowest one.
        assert_eq!(fs.fat.allocate_cluster().unwrap(), first);
        assert_eq!(fs.fat.allocate_cluster().unwrap(), first + 1);
        assert_eq!(fs.fat.allocate_cluster().unwrap(), first + 2);
    }

    #[test]
    fn lsof_reports_index_name_mode_and_offset() {
        let mut fs = open_volume(1, 8);
        fs.create_file("A").unwrap();
        fs.create_file("B").unwrap();
        fs.open_file("A", "-r").unwrap();
        fs.open_file("B", "-rw").unwrap();
        fs.write_file("B", b"abc").unwrap();

        let rows: Vec<(usize, String, &str, u32)> = fs
            .open_files()
            .map(|(i, f)| (i, f.name().to_string(), f.mode().label(), f.offset()))
            .collect();
        assert_eq!(
            rows,
            vec![
                (0, "A".to_string(), "Read-Only", 0),
                (1, "B".to_string(), "Read-Write", 3),
            ]
        );
    }
}
