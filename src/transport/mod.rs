//! Git smart-HTTP transport (§4.2).

pub mod http;
pub mod pktline;

pub use http::{router, GitHttpServer};
