//! Guarded fetch orchestration: validate, pin, execute, re-validate.
//!
//! The orchestrator is the sole authority over redirects and DNS. The
//! transport's own redirect following is always disabled, and when DNS
//! pinning is on the transport is forced onto the address set obtained at
//! validation time. Every hop, the initial request included, goes through
//! [`validate`] before any connection is attempted.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};
use url::Host;

use crate::error::FetchError;
use crate::policy::FetchPolicy;
use crate::resolver::{DnsResolver, TokioDnsResolver};
use crate::validate::{ValidatedTarget, redact_credentials, validate};

/// TCP connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Global transport timeout covering connect + response body.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Cap on accepted response body size.
const MAX_RESPONSE_BYTES: usize = 10_000_000;

/// Terminal response of a guarded fetch.
#[derive(Debug)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: reqwest::header::HeaderMap,
    pub body: Vec<u8>,
    /// URL the terminal response came from.
    pub url: String,
    /// Redirect hops taken to get there.
    pub hops: u32,
}

/// Fetch a URL under the given policy, using the system resolver.
///
/// Non-redirect HTTP statuses (including 4xx/5xx) terminate the fetch and
/// are returned in the [`FetchResponse`]; only policy rejections and
/// transport failures produce errors.
pub async fn fetch(url: &str, policy: &FetchPolicy) -> Result<FetchResponse, FetchError> {
    fetch_with_resolver(url, policy, &TokioDnsResolver).await
}

/// [`fetch`] with a caller-supplied resolver.
pub async fn fetch_with_resolver(
    url: &str,
    policy: &FetchPolicy,
    resolver: &impl DnsResolver,
) -> Result<FetchResponse, FetchError> {
    let mut current = url.to_string();
    let mut hops = 0u32;

    loop {
        let target = validate(&current, policy, resolver).await?;
        let client = build_transport(&target, policy)?;
        let response = execute(&client, &target, policy).await?;

        let status = response.status();
        if !(policy.follow_redirects() && is_redirect(status)) {
            debug!(url = %target.url, %status, hops, "fetch complete");
            return read_response(response, hops).await;
        }

        hops += 1;
        let limit = policy.redirect_limit();
        if limit != 0 && hops >= limit {
            warn!(url = %redact_credentials(&current), limit, "redirect limit reached");
            return Err(FetchError::RedirectLimit { url: current, limit });
        }

        current = redirect_target(&response, &target)?;
        debug!(to = %redact_credentials(&current), hops, "following redirect");
    }
}

/// Build the per-hop transport handle. Auto-redirects are always off, and
/// domain targets are locked to the pinned address set when `pin_dns` is
/// enabled.
fn build_transport(target: &ValidatedTarget, policy: &FetchPolicy) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .redirect(RedirectPolicy::none())
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(HTTP_TIMEOUT)
        .user_agent(crate::USER_AGENT);

    if policy.pin_dns()
        && let Host::Domain(domain) = &target.host
    {
        let addrs: Vec<SocketAddr> = target
            .ips
            .iter()
            .map(|ip| SocketAddr::new(*ip, target.port))
            .collect();
        builder = builder.resolve_to_addrs(domain, &addrs);
    }

    Ok(builder.build()?)
}

/// One request/response cycle against the already-validated target.
async fn execute(
    client: &Client,
    target: &ValidatedTarget,
    policy: &FetchPolicy,
) -> Result<Response, FetchError> {
    let mut request = client.get(target.url.as_str());
    for (name, value) in policy.headers() {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some((user, password)) = &target.credentials {
        request = request.basic_auth(user, password.as_deref());
    }
    Ok(request.send().await?)
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Extract the next hop from a redirect response, resolving relative
/// `Location` values against the URL that produced them.
fn redirect_target(response: &Response, target: &ValidatedTarget) -> Result<String, FetchError> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            FetchError::InvalidUrl(format!("redirect from {} without Location header", target.url))
        })?;

    let next = target
        .url
        .join(location)
        .map_err(|e| FetchError::InvalidUrl(format!("bad redirect target '{location}': {e}")))?;
    Ok(next.into())
}

async fn read_response(response: Response, hops: u32) -> Result<FetchResponse, FetchError> {
    let status = response.status();
    let url = response.url().to_string();
    let headers = response.headers().clone();

    if let Some(len) = response.content_length()
        && len as usize > MAX_RESPONSE_BYTES
    {
        return Err(FetchError::TooLarge(MAX_RESPONSE_BYTES));
    }

    let mut body = Vec::new();
    let mut stream = response;
    while let Some(chunk) = stream.chunk().await? {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_RESPONSE_BYTES {
            return Err(FetchError::TooLarge(MAX_RESPONSE_BYTES));
        }
    }

    Ok(FetchResponse {
        status,
        headers,
        body,
        url,
        hops,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::policy::{IpRule, PortRule};

    /// Policy that lets tests reach a wiremock server on loopback.
    fn local_policy() -> FetchPolicy {
        let mut policy = FetchPolicy::default();
        policy.ips_mut().replace_deny(Vec::new());
        policy
            .ports_mut()
            .replace_allow(vec![PortRule::range(1, 65535)]);
        policy
    }

    struct StaticDns(Vec<IpAddr>);

    impl DnsResolver for StaticDns {
        async fn lookup(&self, _host: &str, _port: u16) -> Result<Vec<IpAddr>, FetchError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fetch_returns_terminal_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let response = fetch(&format!("{}/page", server.uri()), &local_policy())
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(response.body, b"hello");
        assert_eq!(response.hops, 0);
        assert!(response.url.ends_with("/page"));
    }

    #[tokio::test]
    async fn non_success_statuses_terminate_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = fetch(&format!("{}/missing", server.uri()), &local_policy())
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 404);
    }

    #[tokio::test]
    async fn follows_redirect_chain_with_revalidation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
            .mount(&server)
            .await;

        let response = fetch(&format!("{}/a", server.uri()), &local_policy())
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(response.body, b"landed");
        assert_eq!(response.hops, 1);
        assert!(response.url.ends_with("/b"));
    }

    #[tokio::test]
    async fn redirect_following_can_be_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
            .mount(&server)
            .await;

        let mut policy = local_policy();
        policy.set_follow_redirects(false);

        let response = fetch(&format!("{}/a", server.uri()), &policy).await.unwrap();
        assert_eq!(response.status.as_u16(), 302);
        assert_eq!(response.hops, 0);
    }

    #[tokio::test]
    async fn redirect_limit_stops_the_loop_before_the_next_hop() {
        let server = MockServer::start().await;
        // Self-redirecting loop; with a limit of 2 exactly two requests
        // execute before the limit trips.
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .expect(2)
            .mount(&server)
            .await;

        let mut policy = local_policy();
        policy.set_redirect_limit(2);

        let result = fetch(&format!("{}/loop", server.uri()), &policy).await;
        assert!(matches!(
            result,
            Err(FetchError::RedirectLimit { limit: 2, .. })
        ));
    }

    #[tokio::test]
    async fn redirect_to_denied_target_is_rejected_at_the_hop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/outside"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "http://10.0.0.5/admin"),
            )
            .mount(&server)
            .await;

        let mut policy = local_policy();
        policy
            .ips_mut()
            .replace_deny(vec![IpRule::new("10.0.0.0/8").unwrap()]);

        let result = fetch(&format!("{}/outside", server.uri()), &policy).await;
        assert!(matches!(result, Err(FetchError::InvalidIp(_))));
    }

    #[tokio::test]
    async fn pinned_dns_steers_the_connection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pinned"))
            .mount(&server)
            .await;

        // The hostname does not exist in DNS; the pinned answer from the
        // mock resolver is the only way the transport can find the server.
        let port = server.address().port();
        let resolver = StaticDns(vec![server.address().ip()]);

        let response = fetch_with_resolver(
            &format!("http://pinned.test:{port}/page"),
            &local_policy(),
            &resolver,
        )
        .await
        .unwrap();

        assert_eq!(response.body, b"pinned");
    }

    #[tokio::test]
    async fn permitted_credentials_become_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .and(header("authorization", "Basic dXNlcjpzZWNyZXQ="))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut policy = local_policy();
        policy.set_send_credentials(true);

        let uri = server.uri();
        let with_creds = uri.replace("http://", "http://user:secret@");
        let response = fetch(&format!("{with_creds}/auth"), &policy).await.unwrap();
        assert_eq!(response.status.as_u16(), 200);
    }

    #[tokio::test]
    async fn policy_headers_are_sent_with_every_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tagged"))
            .and(header("x-fetch-source", "fetchguard-test"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut policy = local_policy();
        policy.set_header("X-Fetch-Source", "fetchguard-test");

        let response = fetch(&format!("{}/tagged", server.uri()), &policy)
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 200);
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huge"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("x".repeat(MAX_RESPONSE_BYTES + 1)),
            )
            .mount(&server)
            .await;

        let result = fetch(&format!("{}/huge", server.uri()), &local_policy()).await;
        assert!(matches!(result, Err(FetchError::TooLarge(_))));
    }

    #[tokio::test]
    async fn initial_validation_blocks_internal_targets_under_default_policy() {
        let result = fetch("http://127.0.0.1/secret", &FetchPolicy::default()).await;
        assert!(matches!(result, Err(FetchError::InvalidIp(_))));
    }
}
