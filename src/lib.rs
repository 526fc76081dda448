pub mod api;
pub mod app;
pub mod error;
pub mod inbox;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
pub use inbox::{Inbox, InboxSnapshot};
