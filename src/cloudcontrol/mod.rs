//! CloudControl 2.4 REST adapter implementing [`ComputeApi`].
//!
//! Requests use HTTP basic authentication and JSON bodies. Mutating calls
//! answer with a standard envelope whose `info` list carries the identifier
//! of the created resource. A `RESOURCE_NOT_FOUND` response code on a lookup
//! by identifier is reported as `Ok(None)`.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::compute::{
    ComputeApi, ComputeError, ComputeFuture, FirewallRuleRequest, NatRule, NatRulePage,
    NetworkDomain, OsImage, Paging, Server, ServerDeployment, Vlan,
};

mod wire;

use wire::{
    ApiResponse, CreateFirewallRuleBody, CreateNatRuleBody, DeployServerBody, IdBody, NatRules,
    NetworkDomainBody, NetworkDomains, OsImages, PublicIpBlocks, ReservedIps, ServerDto, Vlans,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";

/// Default number of attempts for a request that fails to connect.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
/// Default delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Connection settings for [`CloudControlClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudControlSettings {
    /// Base URL, for example `https://api-au.dimensiondata.com`.
    pub base_url: String,
    /// API user name.
    pub user: String,
    /// API password.
    pub password: String,
    /// Organisation identifier; discovered from the account when absent.
    pub organization_id: Option<String>,
}

impl CloudControlSettings {
    /// Returns the public API base URL for a region code such as `AU`.
    #[must_use]
    pub fn region_base_url(region: &str) -> String {
        format!(
            "https://api-{}.dimensiondata.com",
            region.trim().to_ascii_lowercase()
        )
    }
}

/// HTTP client for the CloudControl compute API.
#[derive(Clone, Debug)]
pub struct CloudControlClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    organization_id: String,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl CloudControlClient {
    /// Builds a client, discovering the organisation identifier when the
    /// settings do not carry one.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Config`] when credentials are blank, the HTTP
    /// client cannot be built, or the account lookup does not yield an
    /// organisation identifier, and any transport or API error raised by that
    /// lookup.
    pub async fn connect(settings: CloudControlSettings) -> Result<Self, ComputeError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| ComputeError::Config(format!("unable to build HTTP client: {err}")))?;
        Self::connect_with(settings, http).await
    }

    /// Builds a client around an existing HTTP client.
    ///
    /// # Errors
    ///
    /// As for [`CloudControlClient::connect`], apart from HTTP client
    /// construction.
    pub async fn connect_with(
        settings: CloudControlSettings,
        http: reqwest::Client,
    ) -> Result<Self, ComputeError> {
        if settings.user.trim().is_empty() || settings.password.is_empty() {
            return Err(ComputeError::Config(String::from(
                "user name and password are required",
            )));
        }
        let base_url = settings.base_url.trim_end_matches('/').to_owned();
        let mut client = Self {
            http,
            base_url,
            user: settings.user,
            password: settings.password,
            organization_id: String::new(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        };
        client.organization_id = match settings.organization_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => client.discover_organization_id().await?,
        };
        debug!(organization_id = %client.organization_id, "connected to CloudControl");
        Ok(client)
    }

    /// Overrides the connection retry policy.
    #[must_use]
    pub const fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Returns the organisation identifier used in request paths.
    #[must_use]
    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    async fn discover_organization_id(&self) -> Result<String, ComputeError> {
        let url = format!("{}/oec/0.9/myaccount", self.base_url);
        let response = self.send(&url, || self.http.get(&url)).await?;
        let status = response.status();
        let body = read_text(&url, response).await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }
        parse_org_id(&body).ok_or_else(|| {
            ComputeError::Config(String::from(
                "account details did not include an organisation id",
            ))
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/caas/2.4/{}/{}",
            self.base_url, self.organization_id, path
        )
    }

    /// Sends a request, retrying when no connection could be established.
    async fn send<F>(&self, url: &str, build: F) -> Result<Response, ComputeError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let attempts = self.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            let request = build()
                .basic_auth(&self.user, Some(&self.password))
                .header(reqwest::header::ACCEPT, "application/json");
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(err) if (err.is_connect() || err.is_timeout()) && attempt < attempts => {
                    warn!(url, attempt, error = %err, "CloudControl request failed; retrying");
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
                Err(err) => {
                    return Err(ComputeError::Transport {
                        url: url.to_owned(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ComputeError>
    where
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self
            .send(&url, || self.http.get(&url).query(query))
            .await?;
        decode(&url, response).await
    }

    async fn post_json<B>(&self, path: &str, body: &B) -> Result<ApiResponse, ComputeError>
    where
        B: Serialize + Sync,
    {
        let url = self.url(path);
        debug!(%url, "POST");
        let response = self
            .send(&url, || self.http.post(&url).json(body))
            .await?;
        decode(&url, response).await
    }

    async fn post_for_id<B>(&self, path: &str, body: &B, info_name: &str) -> Result<String, ComputeError>
    where
        B: Serialize + Sync,
    {
        let url = self.url(path);
        let response = self.post_json(path, body).await?;
        response
            .info_value(info_name)
            .map(str::to_owned)
            .ok_or_else(|| ComputeError::Decode {
                url,
                message: format!("response did not include {info_name}"),
            })
    }

    async fn post_action(&self, path: &str, id: &str) -> Result<(), ComputeError> {
        self.post_json(path, &IdBody { id }).await.map(|_| ())
    }
}

async fn read_text(url: &str, response: Response) -> Result<String, ComputeError> {
    response.text().await.map_err(|err| ComputeError::Transport {
        url: url.to_owned(),
        message: err.to_string(),
    })
}

async fn decode<T>(url: &str, response: Response) -> Result<T, ComputeError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let body = read_text(url, response).await?;
    if !status.is_success() {
        return Err(api_error(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|err| ComputeError::Decode {
        url: url.to_owned(),
        message: err.to_string(),
    })
}

fn api_error(status: u16, body: &str) -> ComputeError {
    match serde_json::from_str::<ApiResponse>(body) {
        Ok(envelope) if !envelope.response_code.is_empty() => ComputeError::Api {
            status,
            response_code: envelope.response_code,
            message: envelope.message,
        },
        _ => ComputeError::Api {
            status,
            response_code: String::from("UNKNOWN"),
            message: body.trim().to_owned(),
        },
    }
}

fn absent_as_none<T>(result: Result<T, ComputeError>) -> Result<Option<T>, ComputeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ComputeError::Api { response_code, .. }) if response_code == RESOURCE_NOT_FOUND => {
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

/// Extracts the organisation identifier from the account XML document.
///
/// The account document carries the identifier as the text of an `orgId`
/// element, optionally namespace-prefixed (`<ns3:orgId>...</ns3:orgId>`).
/// Only complete open tags match; comments, processing instructions and
/// elements whose name merely ends in `orgId` are skipped.
fn parse_org_id(xml: &str) -> Option<String> {
    let mut rest = xml;
    while let Some(open) = rest.find('<') {
        let after = rest.get(open + 1..)?;
        if after.starts_with("!--") {
            let close = after.find("-->")?;
            rest = after.get(close + 3..)?;
            continue;
        }
        let close = after.find('>')?;
        let tag = after.get(..close)?;
        rest = after.get(close + 1..)?;
        let name = tag.split_whitespace().next().unwrap_or_default();
        let local = name.rsplit_once(':').map_or(name, |(_, local)| local);
        if local != "orgId" || name.starts_with(['/', '?', '!']) || tag.ends_with('/') {
            continue;
        }
        let end = rest.find('<')?;
        let id = rest.get(..end)?.trim();
        return (!id.is_empty()).then(|| id.to_owned());
    }
    None
}

/// Expands public IP blocks into addresses and removes reserved ones.
fn unreserved_addresses(blocks: &PublicIpBlocks, reserved: &ReservedIps) -> Vec<Ipv4Addr> {
    let taken: BTreeSet<Ipv4Addr> = reserved.ip.iter().map(|entry| entry.value).collect();
    blocks
        .public_ip_block
        .iter()
        .flat_map(|block| {
            let base = u32::from(block.base_ip);
            (0..block.size).filter_map(move |offset| base.checked_add(offset).map(Ipv4Addr::from))
        })
        .filter(|address| !taken.contains(address))
        .collect()
}

impl ComputeApi for CloudControlClient {
    fn find_network_domain<'a>(
        &'a self,
        name: &'a str,
        datacenter_id: &'a str,
    ) -> ComputeFuture<'a, Option<NetworkDomain>> {
        Box::pin(async move {
            let domains: NetworkDomains = self
                .get_json(
                    "network/networkDomain",
                    &[
                        ("name", name.to_owned()),
                        ("datacenterId", datacenter_id.to_owned()),
                    ],
                )
                .await?;
            Ok(domains
                .network_domain
                .into_iter()
                .map(NetworkDomain::from)
                .find(|domain| domain.name == name))
        })
    }

    fn find_vlan<'a>(
        &'a self,
        name: &'a str,
        network_domain_id: &'a str,
    ) -> ComputeFuture<'a, Option<Vlan>> {
        Box::pin(async move {
            let vlans: Vlans = self
                .get_json(
                    "network/vlan",
                    &[
                        ("name", name.to_owned()),
                        ("networkDomainId", network_domain_id.to_owned()),
                    ],
                )
                .await?;
            Ok(vlans
                .vlan
                .into_iter()
                .map(Vlan::from)
                .find(|vlan| vlan.name == name))
        })
    }

    fn find_os_image<'a>(
        &'a self,
        name: &'a str,
        datacenter_id: &'a str,
    ) -> ComputeFuture<'a, Option<OsImage>> {
        Box::pin(async move {
            let images: OsImages = self
                .get_json(
                    "image/osImage",
                    &[
                        ("name", name.to_owned()),
                        ("datacenterId", datacenter_id.to_owned()),
                    ],
                )
                .await?;
            Ok(images
                .os_image
                .into_iter()
                .map(OsImage::from)
                .find(|image| image.name == name))
        })
    }

    fn deploy_server<'a>(&'a self, deployment: &'a ServerDeployment) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let body = DeployServerBody::from(deployment);
            self.post_for_id("server/deployServer", &body, "serverId")
                .await
        })
    }

    fn get_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, Option<Server>> {
        Box::pin(async move {
            let path = format!("server/server/{server_id}");
            let server: Option<ServerDto> = absent_as_none(self.get_json(&path, &[]).await)?;
            Ok(server.map(Server::from))
        })
    }

    fn start_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move { self.post_action("server/startServer", server_id).await })
    }

    fn shutdown_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move { self.post_action("server/shutdownServer", server_id).await })
    }

    fn power_off_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move { self.post_action("server/powerOffServer", server_id).await })
    }

    fn delete_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move { self.post_action("server/deleteServer", server_id).await })
    }

    fn list_nat_rules<'a>(
        &'a self,
        network_domain_id: &'a str,
        paging: Paging,
    ) -> ComputeFuture<'a, NatRulePage> {
        Box::pin(async move {
            let rules: NatRules = self
                .get_json(
                    "network/natRule",
                    &[
                        ("networkDomainId", network_domain_id.to_owned()),
                        ("pageNumber", paging.page_number.to_string()),
                        ("pageSize", paging.page_size.to_string()),
                    ],
                )
                .await?;
            Ok(NatRulePage {
                rules: rules.nat_rule.into_iter().map(NatRule::from).collect(),
                page_number: rules.page_number,
                page_count: rules.page_count,
            })
        })
    }

    fn add_nat_rule<'a>(
        &'a self,
        network_domain_id: &'a str,
        internal_ip: Ipv4Addr,
    ) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let body = CreateNatRuleBody {
                network_domain_id,
                internal_ip: internal_ip.to_string(),
            };
            self.post_for_id("network/createNatRule", &body, "natRuleId")
                .await
        })
    }

    fn get_nat_rule<'a>(&'a self, nat_rule_id: &'a str) -> ComputeFuture<'a, Option<NatRule>> {
        Box::pin(async move {
            let path = format!("network/natRule/{nat_rule_id}");
            let rule: Option<wire::NatRuleDto> = absent_as_none(self.get_json(&path, &[]).await)?;
            Ok(rule.map(NatRule::from))
        })
    }

    fn delete_nat_rule<'a>(&'a self, nat_rule_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move { self.post_action("network/deleteNatRule", nat_rule_id).await })
    }

    fn available_public_ips<'a>(
        &'a self,
        network_domain_id: &'a str,
    ) -> ComputeFuture<'a, Vec<Ipv4Addr>> {
        Box::pin(async move {
            let query = [("networkDomainId", network_domain_id.to_owned())];
            let blocks: PublicIpBlocks = self.get_json("network/publicIpBlock", &query).await?;
            let reserved: ReservedIps = self
                .get_json("network/reservedPublicIpv4Address", &query)
                .await?;
            Ok(unreserved_addresses(&blocks, &reserved))
        })
    }

    fn add_public_ip_block<'a>(&'a self, network_domain_id: &'a str) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let body = NetworkDomainBody { network_domain_id };
            self.post_for_id("network/addPublicIpBlock", &body, "ipBlockId")
                .await
        })
    }

    fn create_firewall_rule<'a>(
        &'a self,
        rule: &'a FirewallRuleRequest,
    ) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let body = CreateFirewallRuleBody::from(rule);
            self.post_for_id("network/createFirewallRule", &body, "firewallRuleId")
                .await
        })
    }

    fn delete_firewall_rule<'a>(&'a self, firewall_rule_id: &'a str) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            self.post_action("network/deleteFirewallRule", firewall_rule_id)
                .await
        })
    }
}
