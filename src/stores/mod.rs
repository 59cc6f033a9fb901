//! Vector storage for embedded chunks.
//!
//! One backend lives here: [`flat::FlatVectorStore`], an exhaustive
//! inner-product index whose vector rows and metadata records are parallel
//! arrays correlated purely by position. The snapshot layout it persists is
//! described in [`flat`].

pub mod flat;

pub use flat::{FlatVectorStore, INDEX_FILE, METADATA_FILE, StoreError};
