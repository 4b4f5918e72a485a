//! Route tables, merged and given middleware in `main`.

pub mod api;
pub mod stream;

pub use api::create_api_router;
pub use stream::create_stream_router;
