//! # snowline-store
//!
//! The remote record store as seen by Snowline.
//!
//! Transport and authentication live behind the [`RecordStore`] trait; the
//! resolver and the orchestrator only ever talk to it. This crate also ships:
//!
//! - [`LimitedStore`]: bounds the number of in-flight remote calls
//! - [`MemoryRecordStore`]: an in-process store, loadable from fixture files,
//!   with call recording and scripted failures for tests and offline runs

pub mod error;
pub mod limited;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use limited::LimitedStore;
pub use memory::{InjectedFailure, MemoryRecordStore, StoreCall};
pub use store::{RecordStore, StoreOperation};
