//! Storage backend for the local save store
//!
//! A store directory holds `store.meta`, a JSON catalog of collections and the
//! schema generation, plus one `<collection>.icvs` file per collection:
//! the `ICVS` magic, a little-endian `u16` format version, then a Zstd frame
//! of tagged JSON holding the collection's records.

use crate::FORMAT_VERSION;
use crate::STORE_MAGIC;
use crate::compression::Codec;
use crate::compression::CompressionLevel;
use crate::compression::StreamCompressor;
use crate::ejson;
use crate::ejson::Value;
use crate::error::PersistenceError;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use tempfile::NamedTempFile;

const META_FILE: &str = "store.meta";
const COLLECTION_EXTENSION: &str = "icvs";

/// Catalog entry for one collection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub indexes: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// Contents of `store.meta`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreMeta {
    pub generation: u32,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionMeta>,
}

/// Storage backend trait for different storage implementations
pub trait StorageBackend: Send + Sync {
    /// Load the store catalog, `None` for a store never opened before
    fn read_meta(&self) -> impl std::future::Future<Output = Result<Option<StoreMeta>>> + Send;

    /// Replace the store catalog
    fn write_meta(&self, meta: &StoreMeta) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Load every record of a collection; a missing collection is empty
    fn read_collection(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Value>>> + Send;

    /// Replace every record of a collection
    fn write_collection(
        &self,
        name: &str,
        records: &[Value],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// File-based storage implementation
#[derive(Debug, Clone)]
pub struct CollectionStorage {
    base_path: PathBuf,
    level: CompressionLevel,
}

impl CollectionStorage {
    /// Create a new collection storage rooted at `base_path`
    pub fn new(base_path: PathBuf, level: CompressionLevel) -> Result<Self> {
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path, level })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn meta_path(&self) -> PathBuf {
        self.base_path.join(META_FILE)
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.base_path
            .join(format!("{name}.{COLLECTION_EXTENSION}"))
    }
}

/// Writes through a temp file in the same directory, then renames over `path`.
fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<()>,
) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(&mut temp);
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| PersistenceError::Io(e.error))?;
    Ok(())
}

fn write_collection_file(path: &Path, records: &[Value], level: CompressionLevel) -> Result<()> {
    let text = ejson::encode(&Value::Array(records.to_vec()))?;
    write_atomically(path, |writer| {
        writer.write_all(STORE_MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        StreamCompressor::new(level).compress_stream(text.as_bytes(), writer, Codec::Zstd)?;
        Ok(())
    })
}

fn read_collection_file(path: &Path) -> Result<Vec<Value>> {
    let mut reader = BufReader::new(fs::File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != STORE_MAGIC {
        return Err(PersistenceError::InvalidMagic);
    }

    let mut version_bytes = [0u8; 2];
    reader.read_exact(&mut version_bytes)?;
    let version = u16::from_le_bytes(version_bytes);
    if version != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(version, FORMAT_VERSION));
    }

    let mut text = Vec::new();
    StreamCompressor::new(CompressionLevel::default()).decompress_stream(
        reader,
        &mut text,
        Codec::Zstd,
    )?;
    let text = String::from_utf8(text)
        .map_err(|e| PersistenceError::CorruptData(format!("{}: {e}", path.display())))?;
    match ejson::decode(&text)? {
        Value::Array(records) => Ok(records),
        _ => Err(PersistenceError::CorruptData(format!(
            "{} does not hold a record list",
            path.display()
        ))),
    }
}

impl StorageBackend for CollectionStorage {
    async fn read_meta(&self) -> Result<Option<StoreMeta>> {
        let path = self.meta_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(&self, meta: &StoreMeta) -> Result<()> {
        let path = self.meta_path();
        let bytes = serde_json::to_vec_pretty(meta)?;
        tokio::task::spawn_blocking(move || {
            write_atomically(&path, |writer| Ok(writer.write_all(&bytes)?))
        })
        .await?
    }

    async fn read_collection(&self, name: &str) -> Result<Vec<Value>> {
        let path = self.collection_path(name);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        // Use blocking I/O in a spawn_blocking task
        tokio::task::spawn_blocking(move || read_collection_file(&path)).await?
    }

    async fn write_collection(&self, name: &str, records: &[Value]) -> Result<()> {
        let path = self.collection_path(name);
        let records = records.to_vec();
        let level = self.level;
        tokio::task::spawn_blocking(move || write_collection_file(&path, &records, level)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, CollectionStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage =
            CollectionStorage::new(temp_dir.path().join("store"), CompressionLevel::Fast).unwrap();
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn test_missing_store_reads_empty() {
        let (_dir, storage) = storage();
        assert_eq!(storage.read_meta().await.unwrap(), None);
        assert!(storage.read_collection("sessions").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collection_round_trip() {
        let (_dir, storage) = storage();
        let records = vec![
            Value::from("first"),
            Value::Map(vec![(Value::Number(1.0), Value::Number(f64::NAN))]),
        ];
        storage.write_collection("sessions", &records).await.unwrap();
        assert_eq!(storage.read_collection("sessions").await.unwrap(), records);

        let bytes = fs::read(storage.collection_path("sessions")).unwrap();
        assert_eq!(&bytes[..4], STORE_MAGIC);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), FORMAT_VERSION);
    }

    #[tokio::test]
    async fn test_meta_round_trip() {
        let (_dir, storage) = storage();
        let meta = StoreMeta {
            generation: 2,
            collections: BTreeMap::from([(
                "sessions".to_owned(),
                CollectionMeta {
                    indexes: vec!["by-date".into(), "by-name".into()],
                    read_only: true,
                },
            )]),
        };
        storage.write_meta(&meta).await.unwrap();
        assert_eq!(storage.read_meta().await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn test_bad_header_is_rejected() {
        let (_dir, storage) = storage();
        fs::write(storage.collection_path("sessions"), b"AGCX\x01\x00junk").unwrap();
        assert!(matches!(
            storage.read_collection("sessions").await,
            Err(PersistenceError::InvalidMagic)
        ));

        fs::write(storage.collection_path("sessions"), b"ICVS\x09\x00junk").unwrap();
        assert!(matches!(
            storage.read_collection("sessions").await,
            Err(PersistenceError::UnsupportedVersion(9, FORMAT_VERSION))
        ));
    }
}
