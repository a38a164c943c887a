//! Share server (spec.md §4.C): signed-token file/directory download,
//! preview, and upload surface, tunnelled to the public internet by
//! `bridge-tunnel`.

pub mod error;
pub mod html;
pub mod paths;
pub mod server;
pub mod sink;
pub mod token;

pub use error::{Result, ShareError};
pub use server::{router, ShareState};
pub use sink::UploadSink;
pub use token::{generate_token, load_secret, parse_ttl, verify_token, DEFAULT_TTL, MAX_UPLOAD_FILES, MAX_UPLOAD_FILE_BYTES};
