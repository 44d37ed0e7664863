//! Static Envoy bootstrap fronting the authorization service.
//!
//! The document is assembled with `serde_json::json!` and rendered as YAML for
//! the ConfigMap. Variants layer onto the base document: downstream/upstream
//! TLS, a `jwt_authn` filter ahead of `ext_authz`, and a wristband echo route.

use serde_json::{json, Value};

use crate::errors::{Error, Result};
use crate::gateway::backend::BackendRef;
use crate::gateway::http_route::{HttpRouteRule, PathMatchType};

pub const EXT_AUTHZ_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthz";
pub const JWT_AUTHN_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.jwt_authn.v3.JwtAuthentication";
pub const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";
pub const UPSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

/// Data-plane listener port
pub const LISTENER_PORT: i32 = 8000;
/// Admin interface port; `/ready` doubles as the readiness probe
pub const ADMIN_PORT: i32 = 8001;
/// Authorization service gRPC port
pub const AUTHORIZER_PORT: i32 = 50051;

/// Cluster name of the authorization service
pub const EXT_AUTHZ_CLUSTER: &str = "external_auth";
const JWKS_CLUSTER: &str = "jwks";

/// Path prefix answered by the wristband echo route
pub const WRISTBAND_PATH: &str = "/auth";
/// Header the wristband echo route returns
pub const WRISTBAND_HEADER: &str = "wristband-token";

pub const ENVOY_CERT_PATH: &str = "/etc/ssl/certs/envoy";
pub const ENVOY_CA_PATH: &str = "/etc/ssl/certs/envoy-ca";
pub const AUTHORIZER_CA_PATH: &str = "/etc/ssl/certs/authorino-ca";

/// JWT provider verified by Envoy before the authorization call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtProvider {
    pub issuer: String,
    pub jwks_uri: String,
}

/// Upstream cluster reached by a routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
struct Upstream {
    name: String,
    host: String,
    port: i32,
}

impl Upstream {
    fn from_backend(backend: &BackendRef, default_namespace: &str) -> Self {
        let namespace = backend.namespace.as_deref().unwrap_or(default_namespace);
        Self {
            name: format!("{}.{}.{}", backend.name, namespace, backend.port),
            host: format!("{}.{}.svc.cluster.local", backend.name, namespace),
            port: backend.port,
        }
    }
}

/// Bootstrap document builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvoyBootstrap {
    authorizer_host: String,
    namespace: String,
    tls: bool,
    jwt: Option<JwtProvider>,
    wristband: bool,
    hostnames: Vec<String>,
    rules: Vec<HttpRouteRule>,
}

impl EnvoyBootstrap {
    /// Base document calling `authorizer_host:50051` for every request
    pub fn new(authorizer_host: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            authorizer_host: authorizer_host.into(),
            namespace: namespace.into(),
            tls: false,
            jwt: None,
            wristband: false,
            hostnames: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Terminate TLS requiring client certificates, and talk TLS upstream
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }

    pub fn with_jwt(mut self, provider: JwtProvider) -> Self {
        self.jwt = Some(provider);
        self
    }

    pub fn with_wristband(mut self) -> Self {
        self.wristband = true;
        self
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    pub fn rules(&self) -> &[HttpRouteRule] {
        &self.rules
    }

    pub fn add_hostname(&mut self, hostname: &str) {
        if !self.hostnames.iter().any(|h| h == hostname) {
            self.hostnames.push(hostname.to_string());
        }
    }

    pub fn remove_hostname(&mut self, hostname: &str) {
        self.hostnames.retain(|h| h != hostname);
    }

    pub fn clear_hostnames(&mut self) {
        self.hostnames.clear();
    }

    pub fn add_rule(&mut self, rule: HttpRouteRule) {
        self.rules.push(rule);
    }

    pub fn remove_rule(&mut self, rule: &HttpRouteRule) {
        self.rules.retain(|r| r != rule);
    }

    pub fn clear_rules(&mut self) {
        self.rules.clear();
    }

    fn upstreams(&self) -> Vec<Upstream> {
        let mut upstreams: Vec<Upstream> = Vec::new();
        for backend in self.rules.iter().flat_map(|r| r.backend_refs.iter()) {
            let upstream = Upstream::from_backend(backend, &self.namespace);
            if !upstreams.iter().any(|u| u.name == upstream.name) {
                upstreams.push(upstream);
            }
        }
        upstreams
    }

    fn routes(&self) -> Vec<Value> {
        let mut routes = Vec::new();
        if self.wristband {
            routes.push(json!({
                "match": {"prefix": WRISTBAND_PATH},
                "direct_response": {"status": 200},
                "response_headers_to_add": [{
                    "header": {
                        "key": WRISTBAND_HEADER,
                        "value": "%DYNAMIC_METADATA(envoy.filters.http.ext_authz:wristband)%"
                    }
                }]
            }));
        }
        for rule in &self.rules {
            let Some(action) = self.route_action(rule) else {
                continue;
            };
            if rule.matches.is_empty() {
                routes.push(json!({"match": {"prefix": "/"}, "route": action}));
            }
            for m in &rule.matches {
                let mut route_match = match &m.path {
                    Some(p) => match p.type_ {
                        PathMatchType::Exact => json!({"path": p.value}),
                        PathMatchType::PathPrefix => json!({"prefix": p.value}),
                        PathMatchType::RegularExpression => {
                            json!({"safe_regex": {"regex": p.value}})
                        }
                    },
                    None => json!({"prefix": "/"}),
                };
                let mut headers: Vec<Value> = m
                    .headers
                    .iter()
                    .map(|h| json!({"name": h.name, "string_match": {"exact": h.value}}))
                    .collect();
                if let Some(method) = &m.method {
                    headers.push(json!({"name": ":method", "string_match": {"exact": method}}));
                }
                if !headers.is_empty() {
                    route_match["headers"] = Value::Array(headers);
                }
                routes.push(json!({"match": route_match, "route": action}));
            }
        }
        routes
    }

    /// Single cluster, or an even split across every backend of the rule
    fn route_action(&self, rule: &HttpRouteRule) -> Option<Value> {
        let clusters: Vec<String> = rule
            .backend_refs
            .iter()
            .map(|backend| Upstream::from_backend(backend, &self.namespace).name)
            .collect();
        match clusters.as_slice() {
            [] => None,
            [cluster] => Some(json!({"cluster": cluster})),
            _ => {
                let weighted: Vec<Value> = clusters
                    .iter()
                    .map(|name| json!({"name": name, "weight": 1}))
                    .collect();
                Some(json!({"weighted_clusters": {"clusters": weighted}}))
            }
        }
    }

    fn http_filters(&self) -> Vec<Value> {
        let mut filters = Vec::new();
        if let Some(jwt) = &self.jwt {
            filters.push(json!({
                "name": "envoy.filters.http.jwt_authn",
                "typed_config": {
                    "@type": JWT_AUTHN_TYPE_URL,
                    "providers": {
                        "default": {
                            "issuer": jwt.issuer,
                            "remote_jwks": {
                                "http_uri": {"uri": jwt.jwks_uri, "cluster": JWKS_CLUSTER, "timeout": "5s"},
                                "cache_duration": "300s"
                            },
                            "payload_in_metadata": "verified_jwt"
                        }
                    },
                    "rules": [{"match": {"prefix": "/"}, "requires": {"provider_name": "default"}}]
                }
            }));
        }
        let mut ext_authz = json!({
            "name": "envoy.filters.http.ext_authz",
            "typed_config": {
                "@type": EXT_AUTHZ_TYPE_URL,
                "transport_api_version": "V3",
                "failure_mode_allow": false,
                "include_peer_certificate": true,
                "grpc_service": {"envoy_grpc": {"cluster_name": EXT_AUTHZ_CLUSTER}, "timeout": "1s"}
            }
        });
        if self.jwt.is_some() {
            ext_authz["typed_config"]["metadata_context_namespaces"] =
                json!(["envoy.filters.http.jwt_authn"]);
        }
        filters.push(ext_authz);
        filters.push(json!({
            "name": "envoy.filters.http.router",
            "typed_config": {"@type": ROUTER_TYPE_URL}
        }));
        filters
    }

    fn listener(&self) -> Value {
        let domains = if self.hostnames.is_empty() {
            json!(["*"])
        } else {
            json!(self.hostnames)
        };
        let mut chain = json!({
            "filters": [{
                "name": "envoy.filters.network.http_connection_manager",
                "typed_config": {
                    "@type": HCM_TYPE_URL,
                    "stat_prefix": "local",
                    "use_remote_address": true,
                    "route_config": {
                        "name": "local_route",
                        "virtual_hosts": [{
                            "name": "local_service",
                            "domains": domains,
                            "routes": self.routes()
                        }]
                    },
                    "http_filters": self.http_filters()
                }
            }]
        });
        if self.tls {
            chain["transport_socket"] = json!({
                "name": "envoy.transport_sockets.tls",
                "typed_config": {
                    "@type": DOWNSTREAM_TLS_TYPE_URL,
                    "require_client_certificate": true,
                    "common_tls_context": {
                        "tls_certificates": [{
                            "certificate_chain": {"filename": format!("{}/tls.crt", ENVOY_CERT_PATH)},
                            "private_key": {"filename": format!("{}/tls.key", ENVOY_CERT_PATH)}
                        }],
                        "validation_context": {
                            "trusted_ca": {"filename": format!("{}/tls.crt", ENVOY_CA_PATH)}
                        }
                    }
                }
            });
        }
        json!({
            "name": "main",
            "address": {"socket_address": {"address": "0.0.0.0", "port_value": LISTENER_PORT}},
            "filter_chains": [chain]
        })
    }

    fn clusters(&self) -> Vec<Value> {
        let mut authorizer = cluster(EXT_AUTHZ_CLUSTER, &self.authorizer_host, AUTHORIZER_PORT);
        authorizer["typed_extension_protocol_options"] = json!({
            "envoy.extensions.upstreams.http.v3.HttpProtocolOptions": {
                "@type": "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions",
                "explicit_http_config": {"http2_protocol_options": {}}
            }
        });
        if self.tls {
            authorizer["transport_socket"] = json!({
                "name": "envoy.transport_sockets.tls",
                "typed_config": {
                    "@type": UPSTREAM_TLS_TYPE_URL,
                    "common_tls_context": {
                        "validation_context": {
                            "trusted_ca": {"filename": format!("{}/tls.crt", AUTHORIZER_CA_PATH)}
                        }
                    }
                }
            });
        }

        let mut clusters = vec![authorizer];
        if let Some(jwt) = &self.jwt {
            clusters.push(jwks_cluster(&jwt.jwks_uri));
        }
        clusters.extend(self.upstreams().iter().map(|u| cluster(&u.name, &u.host, u.port)));
        clusters
    }

    /// Full bootstrap document
    pub fn to_value(&self) -> Value {
        json!({
            "static_resources": {
                "listeners": [self.listener()],
                "clusters": self.clusters()
            },
            "admin": {
                "address": {"socket_address": {"address": "0.0.0.0", "port_value": ADMIN_PORT}}
            }
        })
    }

    /// YAML rendering stored in the ConfigMap
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.to_value()).map_err(|e| Error::Yaml {
            source: e,
            context: "render envoy bootstrap".to_string(),
        })
    }
}

fn cluster(name: &str, host: &str, port: i32) -> Value {
    json!({
        "name": name,
        "connect_timeout": "0.25s",
        "type": "STRICT_DNS",
        "lb_policy": "ROUND_ROBIN",
        "load_assignment": {
            "cluster_name": name,
            "endpoints": [{"lb_endpoints": [{"endpoint": {"address": {"socket_address": {"address": host, "port_value": port}}}}]}]
        }
    })
}

/// Cluster serving the JWKS document, TLS when the URI is https
fn jwks_cluster(jwks_uri: &str) -> Value {
    let parsed = url::Url::parse(jwks_uri).ok();
    let host = parsed
        .as_ref()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| jwks_uri.to_string());
    let https = parsed.as_ref().map(|u| u.scheme() == "https").unwrap_or(false);
    let port = parsed
        .as_ref()
        .and_then(|u| u.port_or_known_default())
        .map(i32::from)
        .unwrap_or(80);

    let mut jwks = cluster(JWKS_CLUSTER, &host, port);
    jwks["type"] = json!("LOGICAL_DNS");
    if https {
        jwks["transport_socket"] = json!({
            "name": "envoy.transport_sockets.tls",
            "typed_config": {"@type": UPSTREAM_TLS_TYPE_URL, "sni": host}
        });
    }
    jwks
}
