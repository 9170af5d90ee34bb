//! Feed retrieval and conversion.
//!
//! - [`fetcher`] - one bounded GET through a [`Transport`](crate::net::Transport)
//! - [`parser`] - projection of the feed-rs document model
//! - [`thumbnail`] - quick-xml scan for per-entry thumbnails
//! - [`convert`] - orchestration and the two-kind error taxonomy
//! - [`model`] - JSON response shapes
//!
//! # Example
//!
//! ```ignore
//! let transport = HttpTransport::build(&ProxySetting::Environment)?;
//! let converter = Converter::new(transport, ConverterOptions::default());
//! let response = converter.convert("https://example.com/feed.xml", &HeaderMap::new()).await?;
//! ```

pub mod convert;
pub mod fetcher;
pub mod model;
pub mod parser;
pub mod thumbnail;

pub use convert::{pair_thumbnails, ConvertCause, ConvertError, Converter, ConverterOptions, ErrorKind};
pub use fetcher::{fetch, FetchError, FetchRequest, DEFAULT_MAX_FEED_BYTES, DEFAULT_USER_AGENT};
pub use model::{FeedMeta, Item, Response, Status, API_VERSION};
pub use parser::{parse_feed, ParsedEntry, ParsedFeed};
pub use thumbnail::scan_thumbnails;
