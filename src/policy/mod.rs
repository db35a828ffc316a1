//! Fetch policy: allow/deny rules per dimension plus behavioral flags.
//!
//! A policy is built (or deserialized) up front, then shared read-only for
//! the duration of a fetch. Nothing in the fetch path mutates it, so one
//! policy can back any number of concurrent fetches.

mod rules;

pub use rules::{Decision, DomainRule, IpRule, Match, PortRule, RuleSet};

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::FetchError;

/// IP ranges denied by default: loopback, RFC 1918 private, link-local,
/// CGN, reserved/benchmarking/TEST-NET blocks, multicast, broadcast, and
/// the IPv6 specials including IPv4-mapped addresses.
const DEFAULT_DENIED_NETS: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.88.99.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.255.255.255/32",
    "::/128",
    "::1/128",
    "fe80::/10",
    "fc00::/7",
    "::ffff:0:0/96",
];

/// Hostnames denied by default: localhost and the common internal-only
/// suffixes that resolve outside public DNS.
const DEFAULT_DENIED_DOMAINS: &[&str] =
    &["localhost", "*.localhost", "*.local", "*.internal", "*.arpa"];

/// Immutable-in-use configuration deciding which targets a fetch may reach.
///
/// [`FetchPolicy::default`] is the restrictive configuration: HTTP(S) only,
/// ports 80/443, private/reserved/internal targets denied, credentials
/// refused, DNS pinning and redirect following on with a limit of 5 hops.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    schemes: Vec<String>,
    ports: RuleSet<PortRule>,
    domains: RuleSet<DomainRule>,
    ips: RuleSet<IpRule>,
    send_credentials: bool,
    pin_dns: bool,
    follow_redirects: bool,
    redirect_limit: u32,
    headers: HashMap<String, String>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        let mut ports = RuleSet::default();
        ports.allow(PortRule::single(80)).allow(PortRule::single(443));

        let mut domains = RuleSet::default();
        for pattern in DEFAULT_DENIED_DOMAINS {
            domains.deny(DomainRule::new(pattern).expect("built-in domain pattern"));
        }

        let mut ips = RuleSet::default();
        for net in DEFAULT_DENIED_NETS {
            ips.deny(IpRule::new(net).expect("built-in CIDR"));
        }

        Self {
            schemes: vec!["http".into(), "https".into()],
            ports,
            domains,
            ips,
            send_credentials: false,
            pin_dns: true,
            follow_redirects: true,
            redirect_limit: 5,
            headers: HashMap::new(),
        }
    }
}

impl FetchPolicy {
    /// Build a policy from a structured options object. Lists present in
    /// the options replace the corresponding default lists wholesale.
    pub fn from_options(options: PolicyOptions) -> Result<Self, FetchError> {
        let mut policy = Self::default();

        if let Some(schemes) = options.schemes {
            policy.schemes = schemes.iter().map(|s| s.to_ascii_lowercase()).collect();
        }
        if let Some(specs) = options.allow_ports {
            policy.ports.replace_allow(parse_ports(&specs)?);
        }
        if let Some(specs) = options.deny_ports {
            policy.ports.replace_deny(parse_ports(&specs)?);
        }
        if let Some(patterns) = options.allow_domains {
            policy.domains.replace_allow(parse_domains(&patterns)?);
        }
        if let Some(patterns) = options.deny_domains {
            policy.domains.replace_deny(parse_domains(&patterns)?);
        }
        if let Some(specs) = options.allow_ips {
            policy.ips.replace_allow(parse_ips(&specs)?);
        }
        if let Some(specs) = options.deny_ips {
            policy.ips.replace_deny(parse_ips(&specs)?);
        }
        if let Some(flag) = options.send_credentials {
            policy.send_credentials = flag;
        }
        if let Some(flag) = options.pin_dns {
            policy.pin_dns = flag;
        }
        if let Some(flag) = options.follow_redirects {
            policy.follow_redirects = flag;
        }
        if let Some(limit) = options.redirect_limit {
            policy.redirect_limit = limit;
        }
        if let Some(headers) = options.headers {
            policy.headers = headers;
        }

        Ok(policy)
    }

    pub fn allows_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }

    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    /// Replace the scheme allow list (stored lowercase).
    pub fn replace_schemes(&mut self, schemes: Vec<String>) -> &mut Self {
        self.schemes = schemes.iter().map(|s| s.to_ascii_lowercase()).collect();
        self
    }

    pub fn ports(&self) -> &RuleSet<PortRule> {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut RuleSet<PortRule> {
        &mut self.ports
    }

    pub fn domains(&self) -> &RuleSet<DomainRule> {
        &self.domains
    }

    pub fn domains_mut(&mut self) -> &mut RuleSet<DomainRule> {
        &mut self.domains
    }

    pub fn ips(&self) -> &RuleSet<IpRule> {
        &self.ips
    }

    pub fn ips_mut(&mut self) -> &mut RuleSet<IpRule> {
        &mut self.ips
    }

    pub fn send_credentials(&self) -> bool {
        self.send_credentials
    }

    pub fn set_send_credentials(&mut self, flag: bool) -> &mut Self {
        self.send_credentials = flag;
        self
    }

    pub fn pin_dns(&self) -> bool {
        self.pin_dns
    }

    pub fn set_pin_dns(&mut self, flag: bool) -> &mut Self {
        self.pin_dns = flag;
        self
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn set_follow_redirects(&mut self, flag: bool) -> &mut Self {
        self.follow_redirects = flag;
        self
    }

    /// Redirect hop limit; 0 means unlimited.
    pub fn redirect_limit(&self) -> u32 {
        self.redirect_limit
    }

    pub fn set_redirect_limit(&mut self, limit: u32) -> &mut Self {
        self.redirect_limit = limit;
        self
    }

    /// Fixed headers added to every request of a fetch.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Structured options for building a [`FetchPolicy`]; every key is
/// optional and unknown keys are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyOptions {
    pub schemes: Option<Vec<String>>,
    pub allow_ports: Option<Vec<PortSpec>>,
    pub deny_ports: Option<Vec<PortSpec>>,
    pub allow_domains: Option<Vec<String>>,
    pub deny_domains: Option<Vec<String>>,
    pub allow_ips: Option<Vec<String>>,
    pub deny_ips: Option<Vec<String>>,
    pub send_credentials: Option<bool>,
    pub pin_dns: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub redirect_limit: Option<u32>,
    pub headers: Option<HashMap<String, String>>,
}

/// A port in options form: a bare number or a `"lo-hi"` range string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Port(u16),
    Range(String),
}

fn parse_ports(specs: &[PortSpec]) -> Result<Vec<PortRule>, FetchError> {
    specs
        .iter()
        .map(|spec| match spec {
            PortSpec::Port(port) => Ok(PortRule::single(*port)),
            PortSpec::Range(text) => PortRule::parse(text),
        })
        .collect()
}

fn parse_domains(patterns: &[String]) -> Result<Vec<DomainRule>, FetchError> {
    patterns.iter().map(|p| DomainRule::new(p)).collect()
}

fn parse_ips(specs: &[String]) -> Result<Vec<IpRule>, FetchError> {
    specs.iter().map(|s| IpRule::new(s)).collect()
}
