mod client;
mod wbi;

pub use client::{build_http_client, BiliClient, FetchOutcome, MissReason};
pub use wbi::WbiSigner;
