//! A single append-only file [`LeafStore`].
//!
//! Layout: a fixed header (magic, format version, algorithm tag, security
//! flag, digest width) written once at creation, followed by one
//! fixed-width digest record per leaf in append order. Reopening an
//! existing file re-reads the header and rejects a configuration mismatch
//! before any leaf is read.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::StoreError;
use crate::hash::{Digest, HashAlgorithm};

use super::LeafStore;

const MAGIC: &[u8; 4] = b"MRKL";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: u64 = 8;

fn algorithm_tag(algorithm: HashAlgorithm) -> u8 {
    match algorithm {
        HashAlgorithm::Sha224 => 0,
        HashAlgorithm::Sha256 => 1,
        HashAlgorithm::Sha384 => 2,
        HashAlgorithm::Sha512 => 3,
        HashAlgorithm::Sha3_224 => 4,
        HashAlgorithm::Sha3_256 => 5,
        HashAlgorithm::Sha3_384 => 6,
        HashAlgorithm::Sha3_512 => 7,
    }
}

fn algorithm_from_tag(tag: u8) -> Result<HashAlgorithm, StoreError> {
    match tag {
        0 => Ok(HashAlgorithm::Sha224),
        1 => Ok(HashAlgorithm::Sha256),
        2 => Ok(HashAlgorithm::Sha384),
        3 => Ok(HashAlgorithm::Sha512),
        4 => Ok(HashAlgorithm::Sha3_224),
        5 => Ok(HashAlgorithm::Sha3_256),
        6 => Ok(HashAlgorithm::Sha3_384),
        7 => Ok(HashAlgorithm::Sha3_512),
        other => Err(StoreError::ConfigurationMismatch(format!(
            "unrecognised algorithm tag {other} in store header"
        ))),
    }
}

/// A [`LeafStore`] backed by a single append-only file on disk.
#[derive(Debug)]
pub struct FileLeafStore {
    file: File,
    algorithm: HashAlgorithm,
    security: bool,
    width: u64,
    len: usize,
}

impl FileLeafStore {
    /// Opens `path`, creating and initialising it with a fresh header if it
    /// does not exist. If the file already exists, its header must match
    /// `algorithm` and `security` or this fails with
    /// [`StoreError::ConfigurationMismatch`].
    pub fn open(path: impl AsRef<Path>, algorithm: HashAlgorithm, security: bool) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let is_new = !path.exists();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if is_new {
            write_header(&mut file, algorithm, security)?;
        } else {
            let (header_algorithm, header_security) = read_header(&mut file)?;
            if header_algorithm != algorithm || header_security != security {
                return Err(StoreError::ConfigurationMismatch(format!(
                    "store at {} was created with algorithm={header_algorithm}, security={header_security}, but algorithm={algorithm}, security={security} was requested",
                    path.display()
                )));
            }
        }

        let width = algorithm.width() as u64;
        let data_len = file.metadata()?.len().saturating_sub(HEADER_LEN);
        if data_len % width != 0 {
            return Err(StoreError::ConfigurationMismatch(format!(
                "store at {} has a truncated trailing record",
                path.display()
            )));
        }
        let len = (data_len / width) as usize;

        Ok(FileLeafStore {
            file,
            algorithm,
            security,
            width,
            len,
        })
    }

    fn record_offset(&self, zero_based_index: usize) -> u64 {
        HEADER_LEN + zero_based_index as u64 * self.width
    }

    /// Reads one record through an independent file descriptor so this can
    /// be offered on `&self` (matching [`LeafStore::get_leaf`]'s signature)
    /// without an interior-mutability wrapper around `File`.
    fn read_record(&self, zero_based_index: usize) -> Result<Digest, StoreError> {
        let mut buf = vec![0u8; self.width as usize];
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(self.record_offset(zero_based_index)))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn write_header(file: &mut File, algorithm: HashAlgorithm, security: bool) -> Result<(), StoreError> {
    let mut header = [0u8; HEADER_LEN as usize];
    header[0..4].copy_from_slice(MAGIC);
    header[4] = FORMAT_VERSION;
    header[5] = algorithm_tag(algorithm);
    header[6] = security as u8;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.flush()?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<(HashAlgorithm, bool), StoreError> {
    let mut header = [0u8; HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)?;
    if &header[0..4] != MAGIC {
        return Err(StoreError::ConfigurationMismatch(
            "missing MRKL magic bytes".to_string(),
        ));
    }
    if header[4] != FORMAT_VERSION {
        return Err(StoreError::ConfigurationMismatch(format!(
            "unsupported store format version {}",
            header[4]
        )));
    }
    let algorithm = algorithm_from_tag(header[5])?;
    let security = header[6] != 0;
    Ok((algorithm, security))
}

impl LeafStore for FileLeafStore {
    fn size(&self) -> usize {
        self.len
    }

    fn append(&mut self, leaf_digest: Digest) -> Result<usize, StoreError> {
        if leaf_digest.len() as u64 != self.width {
            return Err(StoreError::ConfigurationMismatch(format!(
                "leaf digest of {} bytes does not match store width {}",
                leaf_digest.len(),
                self.width
            )));
        }
        self.file.seek(SeekFrom::Start(self.record_offset(self.len)))?;
        self.file.write_all(&leaf_digest)?;
        self.file.flush()?;
        self.len += 1;
        Ok(self.len)
    }

    fn get_leaf(&self, index: usize) -> Result<Digest, StoreError> {
        if index == 0 || index > self.len {
            return Err(StoreError::OutOfRange(format!(
                "leaf index {index} outside [1, {}]",
                self.len
            )));
        }
        self.read_record(index - 1)
    }

    fn get_range(&self, start: usize, end: usize) -> Result<Vec<Digest>, StoreError> {
        if start > end || end > self.len {
            return Err(StoreError::OutOfRange(format!(
                "range [{start}, {end}) outside [0, {}]",
                self.len
            )));
        }
        (start..end).map(|i| self.read_record(i)).collect()
    }
}
