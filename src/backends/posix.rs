//! POSIX-tree backend: one file per fragment under a root directory.
//!
//! A fragment file is a fixed little-endian header, the region geometry
//! (offsets then sizes, one i64 each), and the dense row-major payload. The
//! header carries a CRC of the payload so a damaged file is detected at
//! retrieve time rather than handed to the application.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::backend::{Backend, BackendConfig};
use crate::error::{NdStoreError, Result};
use crate::fragment::{Fragment, FragmentStatus};
use crate::types::Dtype;

/// Fragment file magic: "NDFR"
const FRAGMENT_MAGIC: u32 = 0x4E44_4652;
const FRAGMENT_VERSION: u16 = 1;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct FragmentFileHeader {
    magic: U32,
    version: U16,
    dtype: u8,
    dims: u8,
    payload_len: U64,
    payload_crc: U32,
    reserved: [u8; 4],
}

const HEADER_LEN: usize = size_of::<FragmentFileHeader>();

pub struct PosixBackend {
    name: String,
    root: PathBuf,
    config: BackendConfig,
}

impl PosixBackend {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, config: BackendConfig) -> PosixBackend {
        PosixBackend {
            name: name.into(),
            root: root.into(),
            config,
        }
    }

    fn fragment_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Backend for PosixBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn commit(&self, fragment: &mut Fragment) -> Result<()> {
        let space = fragment.space().clone();
        if space.dims() > u8::MAX as usize {
            return Err(NdStoreError::InvalidArgument(
                "fragment dimensionality exceeds storage format",
            ));
        }
        let payload = fragment.pack_dense()?;

        let header = FragmentFileHeader {
            magic: U32::new(FRAGMENT_MAGIC),
            version: U16::new(FRAGMENT_VERSION),
            dtype: space.dtype().code(),
            dims: space.dims() as u8,
            payload_len: U64::new(payload.len() as u64),
            payload_crc: U32::new(crc32c::crc32c(&payload)),
            reserved: [0; 4],
        };

        let path = self.fragment_path(&fragment.storage_key());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp name and rename so a concurrent retrieve never
        // observes a half-written fragment.
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(header.as_bytes())?;
            let mut geometry = Vec::with_capacity(space.dims() * 16);
            for &o in space.offset() {
                geometry.extend_from_slice(&o.to_le_bytes());
            }
            for &s in space.size() {
                geometry.extend_from_slice(&s.to_le_bytes());
            }
            file.write_all(&geometry)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        fragment.set_status(FragmentStatus::Persisted);
        Ok(())
    }

    fn retrieve(&self, fragment: &mut Fragment) -> Result<()> {
        let path = self.fragment_path(&fragment.storage_key());
        let mut file = fs::File::open(&path)?;

        let mut head = [0u8; HEADER_LEN];
        file.read_exact(&mut head)?;
        let header = FragmentFileHeader::ref_from_bytes(&head)
            .map_err(|_| NdStoreError::Internal("fragment header layout"))?;

        if header.magic.get() != FRAGMENT_MAGIC {
            return Err(NdStoreError::BadMagic("fragment file"));
        }
        if header.version.get() != FRAGMENT_VERSION {
            return Err(NdStoreError::Parse("unsupported fragment file version"));
        }

        let space = fragment.space().clone();
        if Dtype::from_code(header.dtype) != Some(space.dtype()) {
            return Err(NdStoreError::Parse("fragment element type mismatch"));
        }
        if header.dims as usize != space.dims() {
            return Err(NdStoreError::Parse("fragment dimensionality mismatch"));
        }

        let mut geometry = vec![0u8; space.dims() * 16];
        file.read_exact(&mut geometry)?;
        for (d, chunk) in geometry.chunks_exact(8).enumerate() {
            let value = i64::from_le_bytes(chunk.try_into().unwrap());
            let expected = if d < space.dims() {
                space.offset()[d]
            } else {
                space.size()[d - space.dims()]
            };
            if value != expected {
                return Err(NdStoreError::Parse("fragment geometry mismatch"));
            }
        }

        let buf = fragment.bytes_mut()?;
        if header.payload_len.get() as usize != buf.len() {
            return Err(NdStoreError::Parse("fragment payload length mismatch"));
        }
        file.read_exact(buf)?;
        if crc32c::crc32c(buf) != header.payload_crc.get() {
            return Err(NdStoreError::CrcMismatch("fragment payload"));
        }

        fragment.set_status(FragmentStatus::Loaded);
        Ok(())
    }

    fn mkfs(&self, enforce: bool) -> Result<()> {
        if self.root.exists() {
            if !enforce {
                return Ok(());
            }
            log::warn!(
                "reformatting '{}': existing fragments are destroyed",
                self.root.display()
            );
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}
