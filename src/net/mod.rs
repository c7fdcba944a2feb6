//! Request/response model and the network seam the interceptor fetches through.

mod client;
#[cfg(test)]
pub mod mock;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{duplicate, Request, Response, ResponseHeaders, ResponseKind};
