// src/engine/store.rs
//! On-disk dataset persistence
//!
//! Regenerating a DAG takes minutes, so a finished DAG can be written to
//! `<dir>/ethash-<recipe>-<epoch>-<items>.dag` and restored later. The file is
//! a fixed 72-byte header followed by the raw little-endian item bytes:
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 8    | magic `ETHASHDG`              |
//! | 8      | 4    | format version (LE)           |
//! | 12     | 1    | cache recipe tag              |
//! | 13     | 3    | reserved, zero                |
//! | 16     | 8    | epoch (LE)                    |
//! | 24     | 8    | cache bytes (LE)              |
//! | 32     | 8    | dataset bytes (LE)            |
//! | 40     | 32   | content checksum              |
//!
//! The checksum is Keccak-256 over the concatenated Keccak-256 digests of
//! consecutive 64 MiB chunks of the item bytes. A file that fails any check
//! is reported as stale or corrupt and never yields a partial dataset.

use crate::engine::device::{ComputeDevice, DeviceDag};
use crate::engine::partition::PartitionLayout;
use crate::ethash::keccak::keccak_256;
use crate::ethash::{CacheRecipe, DatasetParams};
use crate::utils::error::MinerError;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File magic
pub const STORE_MAGIC: [u8; 8] = *b"ETHASHDG";
/// Current format version
pub const STORE_VERSION: u32 = 1;
/// Header length in bytes
pub const HEADER_BYTES: usize = 72;
/// Checksum chunk length
pub const CHECKSUM_CHUNK_BYTES: usize = 64 << 20;

/// Words converted per I/O step
const IO_WORDS: usize = 1 << 20;

/// Decoded file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader {
    /// Format version
    pub version: u32,
    /// Cache recipe
    pub recipe: CacheRecipe,
    /// Epoch
    pub epoch: u64,
    /// Cache size in bytes
    pub cache_bytes: u64,
    /// Dataset size in bytes
    pub dataset_bytes: u64,
    /// Content checksum
    pub checksum: [u8; 32],
}

impl StoreHeader {
    fn for_params(params: &DatasetParams, checksum: [u8; 32]) -> Self {
        StoreHeader {
            version: STORE_VERSION,
            recipe: params.recipe,
            epoch: params.epoch,
            cache_bytes: params.cache_bytes,
            dataset_bytes: params.dataset_bytes,
            checksum,
        }
    }

    /// Serializes the header
    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        out[0..8].copy_from_slice(&STORE_MAGIC);
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12] = self.recipe.tag();
        out[16..24].copy_from_slice(&self.epoch.to_le_bytes());
        out[24..32].copy_from_slice(&self.cache_bytes.to_le_bytes());
        out[32..40].copy_from_slice(&self.dataset_bytes.to_le_bytes());
        out[40..72].copy_from_slice(&self.checksum);
        out
    }

    /// Parses a header, rejecting unknown magic, versions and recipes
    pub fn decode(bytes: &[u8; HEADER_BYTES]) -> Result<Self, MinerError> {
        if bytes[0..8] != STORE_MAGIC {
            return Err(MinerError::StoreError("not a dataset file".to_string()));
        }
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if version != STORE_VERSION {
            return Err(MinerError::StoreError(format!(
                "format version {} (expected {})",
                version, STORE_VERSION
            )));
        }
        let recipe = CacheRecipe::from_tag(bytes[12])
            .ok_or_else(|| MinerError::StoreError(format!("unknown recipe tag {}", bytes[12])))?;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[40..72]);

        Ok(StoreHeader {
            version,
            recipe,
            epoch: u64_at(16),
            cache_bytes: u64_at(24),
            dataset_bytes: u64_at(32),
            checksum,
        })
    }

    fn matches(&self, params: &DatasetParams) -> Result<(), MinerError> {
        if self.epoch != params.epoch
            || self.recipe != params.recipe
            || self.cache_bytes != params.cache_bytes
            || self.dataset_bytes != params.dataset_bytes
        {
            return Err(MinerError::StoreError(format!(
                "stale file: holds {} epoch {} ({} / {} bytes), wanted {} epoch {} ({} / {} bytes)",
                self.recipe,
                self.epoch,
                self.cache_bytes,
                self.dataset_bytes,
                params.recipe,
                params.epoch,
                params.cache_bytes,
                params.dataset_bytes
            )));
        }
        Ok(())
    }
}

/// Streaming two-level Keccak-256 checksum
pub struct ChunkedChecksum {
    chunk_bytes: usize,
    pending: Vec<u8>,
    digests: Vec<u8>,
}

impl ChunkedChecksum {
    /// Checksum over chunks of `chunk_bytes`
    pub fn new(chunk_bytes: usize) -> Self {
        ChunkedChecksum {
            chunk_bytes,
            pending: Vec::new(),
            digests: Vec::new(),
        }
    }

    /// Feeds the next bytes of content
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (self.chunk_bytes - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == self.chunk_bytes {
                self.digests.extend_from_slice(&keccak_256(&self.pending));
                self.pending.clear();
            }
        }
    }

    /// Digest over everything fed so far
    pub fn finish(mut self) -> [u8; 32] {
        if !self.pending.is_empty() {
            self.digests.extend_from_slice(&keccak_256(&self.pending));
        }
        keccak_256(&self.digests)
    }
}

/// Directory of persisted datasets
#[derive(Debug, Clone)]
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    /// Opens (creating if needed) a store directory
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DatasetStore { dir })
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a dataset is stored under
    pub fn path_for(&self, params: &DatasetParams) -> PathBuf {
        self.dir.join(format!(
            "ethash-{}-{}-{}.dag",
            params.recipe,
            params.epoch,
            params.dataset_items()
        ))
    }

    /// Whether a file exists for `params` (it may still be stale or corrupt)
    pub fn contains(&self, params: &DatasetParams) -> bool {
        self.path_for(params).is_file()
    }

    /// Writes a resident DAG to disk
    ///
    /// The file is written under a temporary name and renamed into place once
    /// the header carries the final checksum.
    pub fn save(&self, params: &DatasetParams, dag: &dyn DeviceDag) -> Result<PathBuf, MinerError> {
        let path = self.path_for(params);
        let tmp = path.with_extension("dag.tmp");
        if let Err(e) = Self::write_file(&tmp, params, dag) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, &path)?;

        info!("Stored dataset for epoch {} at {}", params.epoch, path.display());
        Ok(path)
    }

    fn write_file(tmp: &Path, params: &DatasetParams, dag: &dyn DeviceDag) -> Result<(), MinerError> {
        let mut writer = BufWriter::new(File::create(tmp)?);
        writer.write_all(&[0u8; HEADER_BYTES])?;

        let mut checksum = ChunkedChecksum::new(CHECKSUM_CHUNK_BYTES);
        let mut bytes = Vec::new();
        for p in 0..dag.layout().partitions() {
            let words = dag.read_partition(p)?;
            for chunk in words.chunks(IO_WORDS) {
                bytes.clear();
                for word in chunk {
                    bytes.extend_from_slice(&word.to_le_bytes());
                }
                checksum.update(&bytes);
                writer.write_all(&bytes)?;
            }
        }

        let header = StoreHeader::for_params(params, checksum.finish());
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header.encode())?;
        let file = writer
            .into_inner()
            .map_err(|e| MinerError::IoError(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }

    /// Restores a DAG onto `device`
    ///
    /// # Returns
    /// `Ok(None)` when no file exists, the DAG when every check passes, and
    /// `StoreError` for a stale or corrupt file
    pub fn load(
        &self,
        params: &DatasetParams,
        device: &dyn ComputeDevice,
        layout: &PartitionLayout,
    ) -> Result<Option<Box<dyn DeviceDag>>, MinerError> {
        let path = self.path_for(params);
        if !path.is_file() {
            debug!("No stored dataset at {}", path.display());
            return Ok(None);
        }

        let file = File::open(&path)?;
        let expected_len = HEADER_BYTES as u64 + params.dataset_bytes;
        let actual_len = file.metadata()?.len();
        if actual_len != expected_len {
            return Err(MinerError::StoreError(format!(
                "{} is {} bytes, expected {}",
                path.display(),
                actual_len,
                expected_len
            )));
        }

        let mut reader = BufReader::new(file);
        let mut raw = [0u8; HEADER_BYTES];
        reader.read_exact(&mut raw)?;
        let header = StoreHeader::decode(&raw)?;
        header.matches(params)?;

        let mut checksum = ChunkedChecksum::new(CHECKSUM_CHUNK_BYTES);
        let mut bytes = vec![0u8; IO_WORDS * 4];
        let dag = device.upload_dag(layout, &mut |_, words: &mut [u32]| -> Result<(), MinerError> {
            for chunk in words.chunks_mut(IO_WORDS) {
                let staging = &mut bytes[..chunk.len() * 4];
                reader.read_exact(staging)?;
                checksum.update(staging);
                for (word, b) in chunk.iter_mut().zip(staging.chunks_exact(4)) {
                    *word = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                }
            }
            Ok(())
        })?;

        if checksum.finish() != header.checksum {
            warn!("Checksum mismatch in {}", path.display());
            return Err(MinerError::StoreError(format!(
                "{} is corrupt (checksum mismatch)",
                path.display()
            )));
        }
        info!("Loaded dataset for epoch {} from {}", params.epoch, path.display());
        Ok(Some(dag))
    }

    /// Deletes the file for `params`, if any
    pub fn remove(&self, params: &DatasetParams) -> Result<(), MinerError> {
        let path = self.path_for(params);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cpu::CpuDevice;
    use crate::ethash::Cache;
    use std::sync::Arc;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ethash-store-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn small_dag(device: &CpuDevice) -> (DatasetParams, PartitionLayout, Box<dyn DeviceDag>) {
        let params = DatasetParams::custom(0, 1024, 32 * 1024, CacheRecipe::Canonical).unwrap();
        let cache = Arc::new(Cache::build(&params).unwrap());
        let layout = PartitionLayout::with_partitions(512, 64, 2, 1 << 20, 8).unwrap();
        let dag = device.build_dag(&cache, &layout).unwrap();
        (params, layout, dag)
    }

    #[test]
    fn chunked_checksum_layout() {
        let mut sum = ChunkedChecksum::new(4);
        sum.update(b"abc");
        sum.update(b"defgh");
        let mut digests = Vec::new();
        digests.extend_from_slice(&keccak_256(b"abcd"));
        digests.extend_from_slice(&keccak_256(b"efgh"));
        assert_eq!(sum.finish(), keccak_256(&digests));

        let mut partial = ChunkedChecksum::new(4);
        partial.update(b"abcde");
        let mut digests = Vec::new();
        digests.extend_from_slice(&keccak_256(b"abcd"));
        digests.extend_from_slice(&keccak_256(b"e"));
        assert_eq!(partial.finish(), keccak_256(&digests));
    }

    #[test]
    fn header_round_trip() {
        let params = DatasetParams::for_epoch(3, CacheRecipe::EpochKeyed).unwrap();
        let header = StoreHeader::for_params(&params, [9u8; 32]);
        assert_eq!(StoreHeader::decode(&header.encode()).unwrap(), header);

        let mut bad = header.encode();
        bad[0] = b'X';
        assert!(matches!(StoreHeader::decode(&bad), Err(MinerError::StoreError(_))));
    }

    /// Serves partition 0 and fails on the rest
    struct FailingDag(Box<dyn DeviceDag>);

    impl DeviceDag for FailingDag {
        fn layout(&self) -> &PartitionLayout {
            self.0.layout()
        }

        fn search(
            &self,
            header: &[u8; 32],
            nonces: &[u64],
            threshold: Option<&[u32; 8]>,
        ) -> Result<crate::engine::SearchOutput, MinerError> {
            self.0.search(header, nonces, threshold)
        }

        fn read_item(&self, index: u64) -> Result<crate::ethash::Node, MinerError> {
            self.0.read_item(index)
        }

        fn read_partition(&self, partition: usize) -> Result<Vec<u32>, MinerError> {
            match partition {
                0 => self.0.read_partition(0),
                _ => Err(MinerError::DeviceError("read back failed".to_string())),
            }
        }
    }

    #[test]
    fn failed_save_leaves_no_files() {
        let device = CpuDevice::new(2, None).unwrap();
        let (params, _, dag) = small_dag(&device);
        let store = DatasetStore::new(scratch_dir("failed-save")).unwrap();

        let failing = FailingDag(dag);
        assert!(matches!(
            store.save(&params, &failing),
            Err(MinerError::DeviceError(_))
        ));
        assert!(!store.contains(&params));
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 0);
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn save_then_load_restores_items() {
        let device = CpuDevice::new(2, None).unwrap();
        let (params, layout, dag) = small_dag(&device);
        let store = DatasetStore::new(scratch_dir("roundtrip")).unwrap();

        assert!(store.load(&params, &device, &layout).unwrap().is_none());
        let path = store.save(&params, dag.as_ref()).unwrap();
        assert!(path.ends_with("ethash-canonical-0-512.dag"));
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_BYTES as u64 + 32 * 1024);

        let restored = store.load(&params, &device, &layout).unwrap().unwrap();
        for p in 0..layout.partitions() {
            assert_eq!(restored.read_partition(p).unwrap(), dag.read_partition(p).unwrap());
        }
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn corrupt_and_stale_files_are_rejected() {
        let device = CpuDevice::new(2, None).unwrap();
        let (params, layout, dag) = small_dag(&device);
        let store = DatasetStore::new(scratch_dir("corrupt")).unwrap();
        let path = store.save(&params, dag.as_ref()).unwrap();

        // Flip one content byte
        let mut contents = fs::read(&path).unwrap();
        contents[HEADER_BYTES + 1000] ^= 0x01;
        fs::write(&path, &contents).unwrap();
        assert!(matches!(
            store.load(&params, &device, &layout),
            Err(MinerError::StoreError(_))
        ));

        // Restore the byte but claim another epoch in the header
        contents[HEADER_BYTES + 1000] ^= 0x01;
        contents[16] = 7;
        fs::write(&path, &contents).unwrap();
        assert!(matches!(
            store.load(&params, &device, &layout),
            Err(MinerError::StoreError(_))
        ));

        // Truncated
        fs::write(&path, &contents[..HEADER_BYTES + 64]).unwrap();
        assert!(matches!(
            store.load(&params, &device, &layout),
            Err(MinerError::StoreError(_))
        ));

        store.remove(&params).unwrap();
        assert!(!store.contains(&params));
        let _ = fs::remove_dir_all(store.dir());
    }
}
