//! SSRF-guarded HTTP fetching.
//!
//! `fetchguard` decides whether a caller-supplied URL may be fetched
//! before any connection is opened: it parses the URL, checks scheme,
//! port, domain, and every resolved IP against allow/deny rules, pins the
//! DNS answer so the transport cannot be rebound to a different address,
//! and re-runs the full validation on every redirect hop.
//!
//! ```rust,no_run
//! use fetchguard::{FetchPolicy, fetch};
//!
//! # async fn example() -> Result<(), fetchguard::FetchError> {
//! let policy = FetchPolicy::default();
//! let response = fetch("https://example.com/api", &policy).await?;
//! println!("{} ({} bytes)", response.status, response.body.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod fetch;
mod policy;
mod resolver;
mod validate;

pub use error::FetchError;
pub use fetch::{FetchResponse, fetch, fetch_with_resolver};
pub use policy::{
    Decision, DomainRule, FetchPolicy, IpRule, Match, PolicyOptions, PortRule, PortSpec, RuleSet,
};
pub use resolver::{DnsResolver, TokioDnsResolver};
pub use validate::{ValidatedTarget, validate};

/// User agent sent with every guarded request.
pub const USER_AGENT: &str = concat!("fetchguard/", env!("CARGO_PKG_VERSION"));
