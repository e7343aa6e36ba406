//! Session persistence for the IC10 emulator
//!
//! This crate turns a running VM session into share-link tokens and back,
//! migrates saved state between snapshot schemas, and keeps named local saves
//! in a generation-versioned store.

pub mod compression;
pub mod demo;
pub mod ejson;
pub mod envelope;
pub mod error;
pub mod fragment;
pub mod migration;
pub mod session_manager;
pub mod session_store;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod upgrade;
pub mod vm;


pub use compression::Codec;
pub use compression::CompressionLevel;
pub use compression::Compressor;
pub use envelope::WireEnvelope;
pub use envelope::decode_token;
pub use envelope::encode_token;
pub use error::PersistenceError;
pub use error::Result;
pub use fragment::FragmentLocation;
pub use fragment::MemoryLocation;
pub use migration::MigrationError;
pub use migration::migrate;
pub use session_manager::SessionController;
pub use session_manager::SessionControllerConfig;
pub use session_manager::SessionEvent;
pub use session_manager::SessionPhase;
pub use session_store::LocalStore;
pub use snapshot::AnySnapshot;
pub use snapshot::ObjectId;
pub use snapshot::SchemaVersion;
pub use snapshot::SnapshotV1;
pub use snapshot::SnapshotV2;
pub use storage::CollectionStorage;
pub use storage::StorageBackend;
pub use types::SaveIndex;
pub use types::SavedSessionRecord;
pub use types::SessionState;
pub use vm::MemoryVm;
pub use vm::VmHost;

/// Magic bytes opening every store collection file
pub const STORE_MAGIC: &[u8] = b"ICVS";

/// Current collection file format version
pub const FORMAT_VERSION: u16 = 1;

/// Circuit the demo session and raw-source links load into
pub const DEFAULT_OBJECT_ID: ObjectId = 1;
