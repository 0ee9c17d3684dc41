//! Image-file block device using positioned system calls

use crate::disk::error::{DiskError, DiskResult};
use crate::disk::BlockDevice;
use crate::types::{BlockNo, DeviceId};
use libc::{c_int, c_void, mode_t, off_t, size_t};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One attached disk image
struct DeviceImage {
    fd: c_int,
    nblocks: u64,
    path: PathBuf,
}

impl DeviceImage {
    fn close(self) {
        let result = unsafe { libc::close(self.fd) };
        if result < 0 {
            warn!(path = %self.path.display(), "close of disk image failed");
        }
    }
}

/// Block device backed by one image file per device.
///
/// Each image is opened once on `attach`; transfers use `pread`/`pwrite` on
/// the shared descriptor, so concurrent transfers to different blocks need
/// no extra locking.
pub struct FileDisk {
    block_size: usize,
    devices: RwLock<HashMap<DeviceId, DeviceImage>>,
}

impl FileDisk {
    pub fn new(block_size: usize) -> Self {
        FileDisk {
            block_size,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Attaches `path` as device `dev` with room for `nblocks` blocks.
    ///
    /// The image is created if missing and extended with zeros if shorter
    /// than `nblocks` blocks. Re-attaching a device replaces its image.
    pub fn attach(&self, dev: DeviceId, path: impl AsRef<Path>, nblocks: u64) -> DiskResult<()> {
        let path = path.as_ref();
        // Create CString in scope so it lives during the system call
        let c_path = CString::new(path.as_os_str().as_bytes())?;
        let flags = libc::O_CREAT | libc::O_RDWR | libc::O_CLOEXEC;
        let mode: mode_t = 0o644;

        let fd = unsafe { libc::open(c_path.as_ptr(), flags, mode as libc::c_uint) };
        if fd < 0 {
            return Err(DiskError::last_os_error("open"));
        }

        let wanted = nblocks * self.block_size as u64;
        if let Err(err) = Self::ensure_len(fd, wanted) {
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let image = DeviceImage {
            fd,
            nblocks,
            path: path.to_path_buf(),
        };
        debug!(dev, nblocks, path = %path.display(), "attached disk image");
        if let Some(old) = self.devices.write().insert(dev, image) {
            old.close();
        }
        Ok(())
    }

    /// Detaches a device and closes its image
    pub fn detach(&self, dev: DeviceId) -> DiskResult<()> {
        match self.devices.write().remove(&dev) {
            Some(image) => {
                image.close();
                Ok(())
            }
            None => Err(DiskError::UnknownDevice { dev }),
        }
    }

    /// Number of blocks on an attached device
    pub fn nblocks(&self, dev: DeviceId) -> Option<u64> {
        self.devices.read().get(&dev).map(|image| image.nblocks)
    }

    fn ensure_len(fd: c_int, wanted: u64) -> DiskResult<()> {
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            return Err(DiskError::last_os_error("fstat"));
        }
        if (stat.st_size as u64) < wanted && unsafe { libc::ftruncate(fd, wanted as off_t) } < 0 {
            return Err(DiskError::last_os_error("ftruncate"));
        }
        Ok(())
    }

    /// Looks up the image and the byte offset of a block
    fn locate(
        &self,
        image: Option<&DeviceImage>,
        dev: DeviceId,
        blockno: BlockNo,
    ) -> DiskResult<(c_int, off_t)> {
        let image = image.ok_or(DiskError::UnknownDevice { dev })?;
        if u64::from(blockno) >= image.nblocks {
            return Err(DiskError::OutOfRange {
                dev,
                blockno,
                nblocks: image.nblocks,
            });
        }
        Ok((image.fd, (u64::from(blockno) * self.block_size as u64) as off_t))
    }

    fn check_len(&self, len: usize) -> DiskResult<()> {
        if len != self.block_size {
            return Err(DiskError::BadBufferSize {
                expected: self.block_size,
                actual: len,
            });
        }
        Ok(())
    }
}

impl BlockDevice for FileDisk {
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut [u8]) -> DiskResult<()> {
        self.check_len(buf.len())?;
        let devices = self.devices.read();
        let (fd, offset) = self.locate(devices.get(&dev), dev, blockno)?;

        let result = unsafe {
            libc::pread(
                fd,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as size_t,
                offset,
            )
        };

        if result < 0 {
            return Err(DiskError::last_os_error("pread"));
        }
        if result as usize != buf.len() {
            return Err(DiskError::ShortTransfer {
                op: "read",
                dev,
                blockno,
                expected: buf.len(),
                actual: result as usize,
            });
        }
        Ok(())
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &[u8]) -> DiskResult<()> {
        self.check_len(buf.len())?;
        let devices = self.devices.read();
        let (fd, offset) = self.locate(devices.get(&dev), dev, blockno)?;

        let result = unsafe {
            libc::pwrite(
                fd,
                buf.as_ptr() as *const c_void,
                buf.len() as size_t,
                offset,
            )
        };

        if result < 0 {
            return Err(DiskError::last_os_error("pwrite"));
        }
        if result as usize != buf.len() {
            return Err(DiskError::ShortTransfer {
                op: "write",
                dev,
                blockno,
                expected: buf.len(),
                actual: result as usize,
            });
        }
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Drop for FileDisk {
    fn drop(&mut self) {
        for (_, image) in self.devices.get_mut().drain() {
            image.close();
        }
    }
}
