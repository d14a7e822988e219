//! Client subscription documents.
//!
//! The primary node is always listed first. The secondary is appended for
//! level-2 accounts while it is enabled, one port above the primary and
//! otherwise sharing its obfuscation, bandwidth and SNI.

use hui_schema::{ClashConfig, ClashProxy, ListenAddr, ProxyGroup, ServerConfig};
use serde::Serialize;
use url::Url;

use crate::derive::context_prefix;
use crate::error::{store_err, ControlError};
use crate::keys;
use crate::settings::Settings;
use crate::storage::{AccountFilter, AccountRecord, NodeAccess};
use crate::supervisor::NodeRole;

const PROXY_GROUP: &str = "PROXY";

/// Output format requested by a subscription client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientFormat {
    Shadowrocket,
    Clash,
    V2rayN,
}

impl ClientFormat {
    /// Guess from a `User-Agent`; plain URL lists for anything unknown.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("shadowrocket") {
            Self::Shadowrocket
        } else if ["clash", "mihomo", "stash"].iter().any(|c| ua.contains(c)) {
            Self::Clash
        } else {
            Self::V2rayN
        }
    }
}

/// One node as a client should see it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub server: String,
    pub port: u16,
    /// Port hopping ranges, e.g. `20000-30000`.
    pub ports: Option<String>,
    pub password: String,
    pub up: Option<String>,
    pub down: Option<String>,
    /// Salamander password.
    pub obfs_password: Option<String>,
    pub sni: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSubscription {
    /// `Subscription-Userinfo` header value, for the YAML formats.
    pub user_info: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeUrl {
    pub name: String,
    pub url: String,
}

pub struct SubscriptionGenerator {
    settings: Settings,
}

impl SubscriptionGenerator {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Nodes `account` may use, primary first. `host` may carry a port.
    pub fn build_node_list(
        &self,
        account: &AccountRecord,
        host: &str,
    ) -> Result<Vec<NodeDescriptor>, ControlError> {
        let base = self.settings.base_config()?;
        let listen = base
            .listen_addr()
            .ok_or_else(|| ControlError::InvalidConfig("hysteria2 config is empty".to_string()))?;
        let listen = ListenAddr::parse(listen)?;
        let server = strip_port(host);
        let hopping = self.settings.value(keys::HYSTERIA2_CONFIG_PORT_HOPPING)?;

        let primary_name = non_empty(self.settings.value(keys::HYSTERIA2_CONFIG_REMARK)?)
            .unwrap_or_else(|| "hysteria2".to_string());
        let mut nodes = vec![describe(
            &base,
            primary_name,
            &server,
            listen.port,
            &hopping,
            &account.con_pass,
        )];

        if account.node_access == NodeAccess::Both && self.settings.secondary_enabled()? {
            let port = listen.shifted(NodeRole::Secondary.port_offset())?.port;
            let name = non_empty(self.settings.value(keys::NODE2_REMARK)?)
                .unwrap_or_else(|| "Node2".to_string());
            nodes.push(describe(
                &base,
                name,
                &server,
                port,
                &hopping,
                &account.con_pass,
            ));
        }
        Ok(nodes)
    }

    pub fn render(
        &self,
        account: &AccountRecord,
        nodes: &[NodeDescriptor],
        format: ClientFormat,
    ) -> Result<RenderedSubscription, ControlError> {
        if format == ClientFormat::V2rayN {
            let urls = nodes
                .iter()
                .map(node_url)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(RenderedSubscription {
                user_info: None,
                body: urls.join("\n"),
            });
        }

        let proxies: Vec<ClashProxy> = nodes
            .iter()
            .map(|node| clash_proxy(node, format))
            .collect();
        let names = proxies.iter().map(|p| p.name.clone()).collect();
        let doc = ClashConfig {
            proxies,
            proxy_groups: vec![ProxyGroup::select(PROXY_GROUP, names)],
        };
        let mut body = doc.to_yaml()?;
        if format == ClientFormat::Clash {
            body.push_str(&self.settings.value(keys::CLASH_EXTENSION)?);
        }
        Ok(RenderedSubscription {
            user_info: Some(user_info(account)),
            body,
        })
    }

    /// Full subscription for the account owning `con_pass`.
    pub fn subscribe(
        &self,
        con_pass: &str,
        user_agent: &str,
        host: &str,
    ) -> Result<RenderedSubscription, ControlError> {
        let account = self
            .settings
            .store()
            .get_account(&AccountFilter::And(vec![
                AccountFilter::ConPass(con_pass.to_string()),
                AccountFilter::NotDeleted,
            ]))
            .map_err(store_err)?
            .ok_or(ControlError::Unauthorized)?;
        let nodes = self.build_node_list(&account, host)?;
        self.render(&account, &nodes, ClientFormat::from_user_agent(user_agent))
    }

    /// Link a client polls for its subscription; `scheme` is `http` or `https`.
    pub fn subscribe_url(
        &self,
        account_id: i64,
        scheme: &str,
        host: &str,
    ) -> Result<String, ControlError> {
        let account = self.account(account_id)?;
        let context = self.settings.web_context()?;
        let context = context_prefix(&context);
        let secret: String = url::form_urlencoded::byte_serialize(account.con_pass.as_bytes()).collect();
        let scheme = scheme.trim_end_matches(':');
        Ok(format!("{scheme}://{host}{context}/hui/{secret}"))
    }

    /// One `hysteria2://` link per node the account may use.
    pub fn node_urls(&self, account_id: i64, hostname: &str) -> Result<Vec<NodeUrl>, ControlError> {
        let account = self.account(account_id)?;
        self.build_node_list(&account, hostname)?
            .iter()
            .map(|node| {
                Ok(NodeUrl {
                    name: node.name.clone(),
                    url: node_url(node)?,
                })
            })
            .collect()
    }

    fn account(&self, id: i64) -> Result<AccountRecord, ControlError> {
        self.settings
            .store()
            .get_account(&AccountFilter::Id(id))
            .map_err(store_err)?
            .ok_or_else(|| ControlError::InvalidConfig(format!("no account with id {id}")))
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn describe(
    config: &ServerConfig,
    name: String,
    server: &str,
    port: u16,
    hopping: &str,
    password: &str,
) -> NodeDescriptor {
    let bandwidth = config.bandwidth.as_ref();
    let pick = |v: Option<&String>| v.filter(|s| !s.is_empty()).cloned();
    NodeDescriptor {
        name,
        server: server.to_string(),
        port,
        ports: (!hopping.is_empty()).then(|| hopping.to_string()),
        password: password.to_string(),
        up: pick(bandwidth.and_then(|b| b.up.as_ref())),
        down: pick(bandwidth.and_then(|b| b.down.as_ref())),
        obfs_password: config.salamander_password().map(str::to_string),
        sni: config.first_acme_domain().map(str::to_string),
    }
}

fn clash_proxy(node: &NodeDescriptor, format: ClientFormat) -> ClashProxy {
    // Shadowrocket takes the salamander password directly in `obfs`.
    let (obfs, obfs_password) = match (&node.obfs_password, format) {
        (None, _) => (None, None),
        (Some(pw), ClientFormat::Shadowrocket) => (Some(pw.clone()), None),
        (Some(pw), _) => (Some("salamander".to_string()), Some(pw.clone())),
    };
    ClashProxy {
        name: node.name.clone(),
        kind: "hysteria2".to_string(),
        server: node.server.clone(),
        port: node.port,
        ports: node.ports.clone(),
        password: node.password.clone(),
        up: node.up.clone(),
        down: node.down.clone(),
        obfs,
        obfs_password,
        sni: node.sni.clone(),
        skip_cert_verify: false,
    }
}

fn user_info(account: &AccountRecord) -> String {
    format!(
        "upload={}; download={}; total={}; expire={}",
        account.upload,
        account.download,
        account.quota,
        account.expire_time / 1000
    )
}

fn node_url(node: &NodeDescriptor) -> Result<String, ControlError> {
    let host = if node.server.contains(':') {
        format!("[{}]", node.server)
    } else {
        node.server.clone()
    };
    let mut url = Url::parse(&format!("hysteria2://{host}:{}/", node.port))
        .map_err(|err| ControlError::InvalidConfig(format!("node url for {host}: {err}")))?;
    url.set_username(&node.password)
        .map_err(|_| ControlError::InvalidConfig(format!("node url for {host} has no host")))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(password) = &node.obfs_password {
            query.append_pair("obfs", "salamander");
            query.append_pair("obfs-password", password);
        }
        if let Some(sni) = &node.sni {
            query.append_pair("sni", sni);
            query.append_pair("peer", sni);
        }
        query.append_pair("insecure", "0");
        if let Some(down) = &node.down {
            query.append_pair("downmbps", down);
        }
        if let Some(ports) = &node.ports {
            query.append_pair("mport", ports);
        }
    }
    url.set_fragment(Some(&node.name));
    Ok(url.into())
}

/// Host part of a `Host` header value; brackets are dropped from IPv6.
fn strip_port(host: &str) -> String {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest).to_string();
    }
    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name.to_string(),
        _ => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agents_map_to_formats() {
        assert_eq!(
            ClientFormat::from_user_agent("Shadowrocket/2070 CFNetwork"),
            ClientFormat::Shadowrocket
        );
        assert_eq!(
            ClientFormat::from_user_agent("ClashMetaForAndroid/2.10"),
            ClientFormat::Clash
        );
        assert_eq!(ClientFormat::from_user_agent("v2rayN/6.4"), ClientFormat::V2rayN);
        assert_eq!(ClientFormat::from_user_agent("curl/8.0"), ClientFormat::V2rayN);
    }

    #[test]
    fn strips_ports_from_host_headers() {
        assert_eq!(strip_port("vpn.example.com:8081"), "vpn.example.com");
        assert_eq!(strip_port("vpn.example.com"), "vpn.example.com");
        assert_eq!(strip_port("[2001:db8::1]:8081"), "2001:db8::1");
        assert_eq!(strip_port("2001:db8::1"), "2001:db8::1");
    }

    #[test]
    fn node_url_carries_client_parameters() {
        let node = NodeDescriptor {
            name: "edge".into(),
            server: "vpn.example.com".into(),
            port: 443,
            password: "alice.pw".into(),
            obfs_password: Some("s3cret".into()),
            sni: Some("vpn.example.com".into()),
            ..Default::default()
        };
        let url = node_url(&node).unwrap();
        assert!(url.starts_with("hysteria2://alice.pw@vpn.example.com:443/?obfs=salamander"));
        assert!(url.contains("obfs-password=s3cret"));
        assert!(url.contains("peer=vpn.example.com"));
        assert!(url.contains("insecure=0"));
        assert!(url.ends_with("#edge"));
    }

    #[test]
    fn ipv6_servers_are_bracketed() {
        let node = NodeDescriptor {
            name: "v6".into(),
            server: "2001:db8::1".into(),
            port: 8443,
            password: "pw".into(),
            ..Default::default()
        };
        assert!(node_url(&node)
            .unwrap()
            .starts_with("hysteria2://pw@[2001:db8::1]:8443/"));
    }

    #[test]
    fn shadowrocket_puts_password_in_obfs() {
        let node = NodeDescriptor {
            name: "edge".into(),
            obfs_password: Some("s3cret".into()),
            ..Default::default()
        };
        let rocket = clash_proxy(&node, ClientFormat::Shadowrocket);
        assert_eq!(rocket.obfs.as_deref(), Some("s3cret"));
        assert_eq!(rocket.obfs_password, None);

        let clash = clash_proxy(&node, ClientFormat::Clash);
        assert_eq!(clash.obfs.as_deref(), Some("salamander"));
        assert_eq!(clash.obfs_password.as_deref(), Some("s3cret"));
    }
}
