pub mod config;
pub mod document;
pub mod encoding;
pub mod epub;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod library;
pub mod markdown;
pub mod position;
pub mod security;
pub mod session;
pub mod settings;
pub mod text;

pub mod prelude {
    pub use crate::document::*;
    pub use crate::error::*;
    pub use crate::position::{capture, PositionSnapshot};
    pub use crate::settings::ReaderSettings;
    pub use crate::text::ChunkedText;
}
