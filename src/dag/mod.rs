//! DAG primitives.
//!
//! - [`ContentId`]: 32-byte SHA3-256 content address of any stored object
//! - [`DagNum`]: which logical history a changeset belongs to
//! - [`Dagnode`]: id + parents + generation of one history node
//! - DAG algorithms: generation law, ancestor-first ordering

mod dagnode;
mod dagnum;
mod hash;
pub mod ops;

pub use dagnode::Dagnode;
pub use dagnum::{DagKind, DagNum};
pub use hash::{current_timestamp_millis, ContentId, CONTENT_ID_LEN};
pub use ops::{expected_generation, sort_by_generation, DagNodeOps};
