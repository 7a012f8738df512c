//! Persisted memory state: flat binary snapshots of the DDR banks and the
//! system memory

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::controller::MemoryController;

/// File holding the concatenated DDR bank bytes
pub const GPU_SNAPSHOT_FILE: &str = "gpumem.snapshot";
/// File holding the system memory buffer
pub const SYSTEM_SNAPSHOT_FILE: &str = "sysmem.snapshot";

/// Errors of the snapshot save/load path. The only non-fatal error surface
/// of the controller: callers decide how to react to missing or malformed
/// snapshot files.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot file {file} holds {found} bytes, expected {expected}")]
    SizeMismatch {
        file: &'static str,
        expected: usize,
        found: usize,
    },
}

impl MemoryController {
    /// Writes the two snapshot files into `dir`: the DDR contents walked
    /// in linear-address order through the active splitters, each word
    /// little-endian, and the system memory verbatim.
    pub fn snapshot_save(&self, dir: &Path) -> Result<(), SnapshotError> {
        let burst_bytes = self.burst_bytes();
        let mut gpu = Vec::with_capacity(self.gpu_memory_size() as usize);
        let mut address = 0;
        while address < self.gpu_memory_size() {
            let info = self
                .splitter(address, burst_bytes)
                .extract_address_info(address);
            self.module(info.channel)
                .read_data(info.bank, info.row, info.start_col, burst_bytes, &mut gpu);
            address += burst_bytes;
        }
        fs::write(dir.join(GPU_SNAPSHOT_FILE), &gpu)?;
        fs::write(dir.join(SYSTEM_SNAPSHOT_FILE), self.system_memory())?;
        Ok(())
    }

    /// Restores both snapshot files verbatim
    pub fn snapshot_load(&mut self, dir: &Path) -> Result<(), SnapshotError> {
        let gpu = fs::read(dir.join(GPU_SNAPSHOT_FILE))?;
        if gpu.len() != self.gpu_memory_size() as usize {
            return Err(SnapshotError::SizeMismatch {
                file: GPU_SNAPSHOT_FILE,
                expected: self.gpu_memory_size() as usize,
                found: gpu.len(),
            });
        }

        let burst_bytes = self.burst_bytes();
        let mut address = 0;
        while address < self.gpu_memory_size() {
            let from = address as usize;
            let info = self
                .splitter(address, burst_bytes)
                .extract_address_info(address);
            self.module_mut(info.channel).write_data(
                info.bank,
                info.row,
                info.start_col,
                &gpu[from..from + burst_bytes as usize],
            );
            address += burst_bytes;
        }

        let system = fs::read(dir.join(SYSTEM_SNAPSHOT_FILE))?;
        if system.len() != self.system_memory().len() {
            return Err(SnapshotError::SizeMismatch {
                file: SYSTEM_SNAPSHOT_FILE,
                expected: self.system_memory().len(),
                found: system.len(),
            });
        }
        self.system_memory_mut().copy_from_slice(&system);
        Ok(())
    }
}
