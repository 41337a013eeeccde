//! File backed memory region shared by all worker processes of one server instance.
//!
//! A region is a header followed by `capacity` fixed-width records. Every access goes
//! through [`RegionGuard`], which holds both an in-process mutex (threads of one worker
//! share a mapping) and an exclusive `flock` (workers map the file independently).

use crate::error::Error;
use crate::{muted_error, pldbg_debug};
use bytes::{Buf, BufMut};
use memmap2::MmapMut;
use nix::fcntl::{flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bump when a record layout changes, so stale files are re-initialized.
const LAYOUT_VERSION: u32 = 1;

pub const HEADER_LEN: usize = 16;

/// Shape of one shared region.
#[derive(Debug, Clone, Copy)]
pub struct RegionLayout {
    pub name: &'static str,
    pub magic: u32,
    pub capacity: usize,
    pub record_len: usize,
}

impl RegionLayout {
    fn byte_len(&self) -> usize {
        HEADER_LEN + self.capacity * self.record_len
    }

    fn write_header(&self, mut buf: &mut [u8]) {
        buf.put_u32(self.magic);
        buf.put_u32(LAYOUT_VERSION);
        buf.put_u32(self.capacity as u32);
        buf.put_u32(self.record_len as u32);
    }

    fn header_matches(&self, mut buf: &[u8]) -> bool {
        buf.get_u32() == self.magic
            && buf.get_u32() == LAYOUT_VERSION
            && buf.get_u32() as usize == self.capacity
            && buf.get_u32() as usize == self.record_len
    }
}

/// Exclusive advisory lock on a file, released on drop.
struct FileLock(RawFd);

impl FileLock {
    fn acquire(fd: RawFd) -> Result<Self, Error> {
        flock(fd, FlockArg::LockExclusive).map_err(|e| Error::Syscall("flock", e))?;
        Ok(Self(fd))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        muted_error!(flock(self.0, FlockArg::Unlock), "flock unlock:");
    }
}

pub struct SharedRegion {
    layout: RegionLayout,
    path: PathBuf,
    file: File,
    map: Mutex<MmapMut>,
}

impl SharedRegion {
    /// Open (creating if needed) the region file. With `reset` the region is zeroed
    /// unconditionally, otherwise only when the header is missing or does not match.
    pub fn open(dir: &Path, layout: RegionLayout, reset: bool) -> Result<Self, Error> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(layout.name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let map = {
            let _lock = FileLock::acquire(file.as_raw_fd())?;

            let expected = layout.byte_len() as u64;
            let resized = file.metadata()?.len() != expected;
            if resized {
                file.set_len(expected)?;
            }

            // SAFETY: the file is only ever mutated through a mapping while holding the flock
            let mut map = unsafe { MmapMut::map_mut(&file)? };
            if reset || resized || !layout.header_matches(&map[..HEADER_LEN]) {
                pldbg_debug!(target: "comm", "initialize shared region {}", path.display());
                map.fill(0);
                layout.write_header(&mut map[..HEADER_LEN]);
                map.flush()?;
            }
            map
        };

        Ok(Self {
            layout,
            path,
            file,
            map: Mutex::new(map),
        })
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// Lock the region for a short read-modify-write section.
    /// Never hold the guard across a socket operation.
    pub fn lock(&self) -> Result<RegionGuard<'_>, Error> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = FileLock::acquire(self.file.as_raw_fd())?;
        if !self.layout.header_matches(&map[..HEADER_LEN]) {
            return Err(Error::RegionCorrupted(
                self.path.display().to_string(),
                "header mismatch",
            ));
        }
        Ok(RegionGuard {
            layout: self.layout,
            map,
            _lock: lock,
        })
    }
}

/// Locked view of a region, gives access to records by index.
pub struct RegionGuard<'a> {
    layout: RegionLayout,
    map: MutexGuard<'a, MmapMut>,
    _lock: FileLock,
}

impl RegionGuard<'_> {
    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    pub fn record(&self, idx: usize) -> &[u8] {
        let start = HEADER_LEN + idx * self.layout.record_len;
        &self.map[start..start + self.layout.record_len]
    }

    pub fn record_mut(&mut self, idx: usize) -> &mut [u8] {
        let start = HEADER_LEN + idx * self.layout.record_len;
        let len = self.layout.record_len;
        &mut self.map.deref_mut()[start..start + len]
    }

    /// Iterate over all records in index order.
    pub fn records(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.map.deref()[HEADER_LEN..].chunks_exact(self.layout.record_len)
    }
}
