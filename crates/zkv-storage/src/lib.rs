//! zkv-storage: OpenDAL-backed record store for zkvault
//!
//! The store is a stand-in for the server side: it only ever sees the opaque
//! records produced by `zkv-crypto`.

pub mod operator;
pub mod store;

pub use operator::build_operator;
pub use store::{email_hash, RecordStore};
