//! loadgrid-ratelimit — sliding-window admission control.
//!
//! Each key carries a `RatePolicy` (`max_requests` per `window`) and a
//! queue of recent admission timestamps. A check prunes timestamps that have
//! aged out of the window, then admits and records `now` if the remaining
//! count is below the limit.
//!
//! ```text
//! window = 1000ms, max = 3
//!
//! t=0    admit   [0]
//! t=100  admit   [0, 100]
//! t=200  admit   [0, 100, 200]
//! t=300  reject  [0, 100, 200]        (rejections are not recorded)
//! t=1001 admit   [100, 200, 1001]     (0 aged out)
//! ```
//!
//! Keys without a policy of their own use the limiter's default policy;
//! with no default they are always admitted.

pub mod limiter;

pub use limiter::{RateLimiter, RatePolicy};
