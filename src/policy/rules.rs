//! Typed rule matchers, one per policy dimension.
//!
//! Every dimension carries an allow list and a deny list of the same rule
//! type. Matching yields a tri-state [`Decision`] with deny taking
//! precedence over allow, so rule order within a list never matters.

use std::net::IpAddr;
use std::ops::RangeInclusive;

use globset::{Glob, GlobMatcher};
use ipnet::IpNet;

use crate::error::FetchError;

/// Outcome of matching one value against one dimension's rule lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
    /// No rule in either list covers the value.
    Unmatched,
}

/// Matching behavior shared by all rule types.
pub trait Match<T: ?Sized> {
    fn matches(&self, value: &T) -> bool;
}

/// A single port or an inclusive port range.
#[derive(Debug, Clone)]
pub struct PortRule(RangeInclusive<u16>);

impl PortRule {
    pub fn single(port: u16) -> Self {
        Self(port..=port)
    }

    pub fn range(lo: u16, hi: u16) -> Self {
        Self(lo..=hi)
    }

    /// Parse `"8080"` or `"1024-65535"`.
    pub fn parse(spec: &str) -> Result<Self, FetchError> {
        let bad = || FetchError::InvalidRule(format!("bad port rule '{spec}'"));
        if let Some((lo, hi)) = spec.split_once('-') {
            let lo: u16 = lo.trim().parse().map_err(|_| bad())?;
            let hi: u16 = hi.trim().parse().map_err(|_| bad())?;
            if lo > hi {
                return Err(bad());
            }
            Ok(Self::range(lo, hi))
        } else {
            Ok(Self::single(spec.trim().parse().map_err(|_| bad())?))
        }
    }
}

impl Match<u16> for PortRule {
    fn matches(&self, port: &u16) -> bool {
        self.0.contains(port)
    }
}

/// An exact hostname or a wildcard pattern such as `*.example.com`.
///
/// Patterns containing `*` or `?` are compiled as globs; anything else
/// matches the hostname exactly. Matching is case-insensitive (hostnames
/// are lowercased before comparison).
#[derive(Debug, Clone)]
pub enum DomainRule {
    Exact(String),
    Wildcard(GlobMatcher),
}

impl DomainRule {
    pub fn new(pattern: &str) -> Result<Self, FetchError> {
        let lower = pattern.to_ascii_lowercase();
        if lower.contains(['*', '?']) {
            let glob = Glob::new(&lower).map_err(|e| {
                FetchError::InvalidRule(format!("bad domain pattern '{pattern}': {e}"))
            })?;
            Ok(Self::Wildcard(glob.compile_matcher()))
        } else {
            Ok(Self::Exact(lower))
        }
    }
}

impl Match<str> for DomainRule {
    fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(name) => name == host,
            Self::Wildcard(matcher) => matcher.is_match(host),
        }
    }
}

/// An IP literal or a CIDR block.
#[derive(Debug, Clone)]
pub struct IpRule(IpNet);

impl IpRule {
    /// Parse `"10.0.0.5"`, `"10.0.0.0/8"`, `"fc00::/7"`, etc. Bare
    /// addresses become host-length networks.
    pub fn new(spec: &str) -> Result<Self, FetchError> {
        if let Ok(net) = spec.parse::<IpNet>() {
            return Ok(Self(net));
        }
        let addr: IpAddr = spec
            .parse()
            .map_err(|_| FetchError::InvalidRule(format!("bad IP rule '{spec}'")))?;
        Ok(Self(IpNet::from(addr)))
    }

    pub fn addr(addr: IpAddr) -> Self {
        Self(IpNet::from(addr))
    }
}

impl Match<IpAddr> for IpRule {
    fn matches(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }
}

/// Allow and deny rule lists for one dimension.
#[derive(Debug, Clone)]
pub struct RuleSet<R> {
    allow: Vec<R>,
    deny: Vec<R>,
}

impl<R> Default for RuleSet<R> {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

impl<R> RuleSet<R> {
    pub fn allow(&mut self, rule: R) -> &mut Self {
        self.allow.push(rule);
        self
    }

    pub fn deny(&mut self, rule: R) -> &mut Self {
        self.deny.push(rule);
        self
    }

    pub fn replace_allow(&mut self, rules: Vec<R>) -> &mut Self {
        self.allow = rules;
        self
    }

    pub fn replace_deny(&mut self, rules: Vec<R>) -> &mut Self {
        self.deny = rules;
        self
    }

    pub fn has_allow_rules(&self) -> bool {
        !self.allow.is_empty()
    }

    /// Deny rules win over allow rules regardless of list order.
    pub fn decide<T: ?Sized>(&self, value: &T) -> Decision
    where
        R: Match<T>,
    {
        if self.deny.iter().any(|r| r.matches(value)) {
            return Decision::Denied;
        }
        if self.allow.iter().any(|r| r.matches(value)) {
            return Decision::Allowed;
        }
        Decision::Unmatched
    }

    /// Collapse the tri-state: denied values are refused, and once an
    /// allow list exists anything it does not cover is refused too.
    pub fn permits<T: ?Sized>(&self, value: &T) -> bool
    where
        R: Match<T>,
    {
        match self.decide(value) {
            Decision::Denied => false,
            Decision::Allowed => true,
            Decision::Unmatched => !self.has_allow_rules(),
        }
    }
}
