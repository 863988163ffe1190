//! Vault engine for LotS.
//!
//! This module provides:
//! - Vault configuration and persistence
//! - Session handling with secure key management
//! - JSON object encryption through an unlocked session
//! - Stored item model
//! - JSON and CSV import/export
//!
//! # Architecture
//! The session is the only holder of the derived key. Everything that
//! encrypts or decrypts borrows an unlocked session and fails with
//! `VaultLocked` otherwise.

pub mod codec;
pub mod config;
pub mod item;
pub mod session;
pub mod transfer;

pub use codec::ObjectCodec;
pub use config::{VaultConfig, VaultVersion, CONFIG_FILENAME, MIN_MASTER_PASSWORD_LENGTH};
pub use item::{Fields, ItemType, StorageItem, StorageItemBuilder};
pub use session::{SessionState, VaultSession};
pub use transfer::{export_csv, export_json, import_csv, import_json, ImportResult};
