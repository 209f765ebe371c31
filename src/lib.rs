//! A list that keeps its first `capacity` items in memory and spills the rest
//! to disk, one file per item, behind a single indexed, sortable, iterable
//! interface.
//!
//! ```no_run
//! use spillover::{CancelToken, SpillList};
//!
//! # fn main() -> spillover::Result<()> {
//! let list: SpillList<u64> = SpillList::new("/tmp/results", 1024);
//! list.add_all(0..10_000)?;
//! list.sort_by(|a, b| a > b)?;
//! assert_eq!(9_999, list.get(0)?);
//!
//! let cancel = CancelToken::new();
//! for value in list.iter(&cancel).take(3) {
//!     println!("{}", value);
//! }
//! # Ok(())
//! # }
//! ```

mod cancel;
mod config;
mod encoding;
mod error;
mod fs;
mod list;
mod sort;

pub use cancel::CancelToken;
pub use config::Config;
pub use encoding::{Codec, FnCodec, JsonCodec};
pub use error::{BoxError, ListError, Result};
pub use fs::{Event, MockDir, MockFs, OsDir, SpillDir};
pub use list::{FailureSink, Iter, SpillList, TracingSink};
