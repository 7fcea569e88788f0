#![allow(clippy::uninlined_format_args)]

pub mod account;
pub mod app;
pub mod config;
pub mod html;
pub mod logging;
pub mod paging;
pub mod session;
pub mod v2ex;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use html::{decode_cloaked_email, process, ImageSize, ImageSizes, MalformedInput};
pub use paging::{
    refresh_key, CountSink, FetchError, ListingFetcher, ListingPage, LoadedState, NoopSink,
    PageKey, PageSequencer, PageWindow, PagingConfig,
};
pub use session::PagingSession;
