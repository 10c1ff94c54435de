mod client;
mod rate_limit;

pub use client::PlatformClient;
pub use rate_limit::{RateLimitState, REMAINING_HEADER, RESET_HEADER};
