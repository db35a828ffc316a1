//! Error taxonomy for guarded fetching.
//!
//! Policy rejections (`InvalidUrl` through `InvalidIp`) are permanent:
//! the request was refused and retrying it against the same policy cannot
//! succeed. Transport errors are surfaced verbatim from the HTTP client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// URL failed to parse, has no usable host, or carries credentials
    /// while credential forwarding is disabled.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("scheme not allowed: {0}")]
    InvalidScheme(String),

    #[error("port not allowed: {0}")]
    InvalidPort(u16),

    #[error("domain not allowed: {0}")]
    InvalidDomain(String),

    /// A resolved or literal IP violates the IP rules. DNS failures and
    /// empty resolutions also land here: a host we cannot pin an address
    /// for is never connected to.
    #[error("IP not allowed: {0}")]
    InvalidIp(String),

    /// A rule pattern failed to compile while building a policy.
    #[error("invalid policy rule: {0}")]
    InvalidRule(String),

    /// Redirect limit reached; carries the URL of the hop that was not taken.
    #[error("redirect limit {limit} reached at {url}")]
    RedirectLimit { url: String, limit: u32 },

    #[error("fetch failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response too large (>{0} bytes)")]
    TooLarge(usize),
}

impl FetchError {
    /// True for policy rejections ("request refused"), as opposed to
    /// transport failures or configuration mistakes.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::InvalidScheme(_)
                | Self::InvalidPort(_)
                | Self::InvalidDomain(_)
                | Self::InvalidIp(_)
        )
    }
}
