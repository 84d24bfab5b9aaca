use crate::annotation::min_tls_version;
use crate::builder::Builder;
use crate::conditions::{
    header_match_conditions_valid, include_match_conditions_valid, merge_header_match_conditions,
    merge_path_match_conditions, path_match_conditions_valid, prefix_replacements_valid,
};
use crate::policy::{
    headers_policy, http_health_check_policy, load_balancer_policy, retry_policy,
    tcp_health_check_policy, timeout_policy,
};
use crate::source::{ca_bundle, object_id, tls_secret, valid_ca, valid_tls_secret};
use crate::status::ObjectStatusWriter;
use crate::Processor;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{anyhow, bail, Result};
use std::sync::Arc;
use trellis_ingress_core::{
    Cluster, HeadersPolicy, MirrorPolicy, PathMatchCondition, PeerValidationContext, Protocol,
    ResourceId, Route, Service, TcpProxy, Vhost,
};
use trellis_ingress_k8s_api::{httpproxy, HttpProxy};

/// Translates HTTPProxy documents into graph nodes and adds them to the DAG
/// builder.
#[derive(Debug, Default)]
pub struct HttpProxyProcessor {
    /// When set, routes that opt into insecure traffic under a TLS virtual
    /// host are still forced to upgrade to HTTPS.
    pub disable_permit_insecure: bool,

    /// The secret served to clients that send no SNI, used when a virtual
    /// host opts into the fallback certificate.
    pub fallback_certificate: Option<ResourceId>,

    /// Leaf documents seen this round that no delegation chain has reached.
    orphaned: HashSet<ResourceId>,
}

impl Processor for HttpProxyProcessor {
    fn run(&mut self, dag: &mut Builder) {
        self.orphaned.clear();
        self.compute_httpproxies(dag);

        for id in std::mem::take(&mut self.orphaned) {
            if let Some(proxy) = dag.source.httpproxies.get(&id).cloned() {
                let mut sw = dag.with_object(&proxy);
                sw.set_orphaned(
                    "this HTTPProxy is not part of a delegation chain from a root HTTPProxy",
                );
                dag.commit(sw);
            }
        }
    }
}

impl HttpProxyProcessor {
    fn compute_httpproxies(&mut self, dag: &mut Builder) {
        for proxy in self.valid_httpproxies(dag) {
            let mut sw = dag.with_object(&proxy);
            self.compute_httpproxy(dag, &mut sw, &proxy);
            dag.commit(sw);
        }
    }

    /// Partitions the snapshot into leaves and single-root FQDN owners.
    /// Documents contending for an FQDN are all marked invalid here and
    /// excluded from further processing.
    fn valid_httpproxies(&self, dag: &mut Builder) -> Vec<Arc<HttpProxy>> {
        let mut valid = Vec::new();
        let mut by_fqdn: HashMap<String, Vec<Arc<HttpProxy>>> = HashMap::new();
        for proxy in dag.source.httpproxies.values() {
            match &proxy.spec.virtual_host {
                None => valid.push(proxy.clone()),
                Some(virtual_host) => by_fqdn
                    .entry(virtual_host.fqdn.clone())
                    .or_default()
                    .push(proxy.clone()),
            }
        }

        for (fqdn, mut proxies) in by_fqdn {
            if proxies.len() == 1 {
                valid.append(&mut proxies);
                continue;
            }

            let mut conflicting: Vec<String> = proxies
                .iter()
                .filter_map(|proxy| object_id(proxy.as_ref()))
                .map(|id| id.to_string())
                .collect();
            conflicting.sort();
            let msg = format!(
                "fqdn {fqdn:?} is used in multiple HTTPProxies: {}",
                conflicting.join(", ")
            );
            for proxy in &proxies {
                let mut sw = dag.with_object(proxy);
                sw.with_vhost(&fqdn);
                sw.set_invalid(&msg);
                dag.commit(sw);
            }
        }
        valid
    }

    fn compute_httpproxy(
        &mut self,
        dag: &mut Builder,
        sw: &mut ObjectStatusWriter,
        proxy: &Arc<HttpProxy>,
    ) {
        let Some(id) = object_id(proxy.as_ref()) else {
            return;
        };
        let Some(virtual_host) = &proxy.spec.virtual_host else {
            self.orphaned.insert(id);
            return;
        };

        if !root_allowed(dag, &id.namespace) {
            sw.set_invalid("root HTTPProxy cannot be defined in this namespace");
            return;
        }

        let host = virtual_host.fqdn.as_str();
        if is_blank(host) {
            sw.set_invalid("Spec.VirtualHost.Fqdn must be specified");
            return;
        }
        sw.with_vhost(host);
        if host.contains('*') {
            sw.set_invalid(format!("Spec.VirtualHost.Fqdn {host:?} cannot use wildcards"));
            return;
        }

        if proxy.spec.routes.is_empty()
            && proxy.spec.includes.is_empty()
            && proxy.spec.tcp_proxy.is_none()
        {
            sw.set_invalid("HTTPProxy.Spec must have at least one Route, Include, or a TCPProxy");
            return;
        }

        let mut tls_enabled = false;
        if let Some(tls) = &virtual_host.tls {
            let secret_name = tls.secret_name.as_deref().unwrap_or_default();
            if !is_blank(secret_name) && tls.passthrough {
                sw.set_invalid("Spec.VirtualHost.TLS: both Passthrough and SecretName were specified");
                return;
            }
            if is_blank(secret_name) && !tls.passthrough {
                sw.set_invalid(
                    "Spec.VirtualHost.TLS: neither Passthrough nor SecretName were specified",
                );
                return;
            }
            tls_enabled = true;

            if !tls.passthrough {
                let secret_id = ResourceId::parse(secret_name, &id.namespace);
                let secret = match dag.source.lookup_secret(&secret_id, valid_tls_secret) {
                    Ok(secret) => tls_secret(&secret_id, secret),
                    Err(error) => {
                        sw.set_invalid(format!(
                            "Spec.VirtualHost.TLS Secret {secret_name:?} is invalid: {error}"
                        ));
                        return;
                    }
                };
                if !dag.source.delegation_permitted(&secret_id, &id.namespace) {
                    sw.set_invalid(format!(
                        "Spec.VirtualHost.TLS Secret {secret_name:?} certificate delegation not permitted"
                    ));
                    return;
                }

                let min_tls = min_tls_version(tls.minimum_protocol_version.as_deref());
                {
                    let svhost = dag.lookup_secure_virtual_host(host);
                    svhost.secret = Some(secret);
                    svhost.min_tls_version = min_tls;
                }

                if tls.enable_fallback_certificate && tls.client_validation.is_some() {
                    sw.set_invalid(
                        "Spec.Virtualhost.TLS fallback & client validation are incompatible together",
                    );
                    return;
                }

                if tls.enable_fallback_certificate {
                    let Some(fallback) = self.fallback_certificate.clone() else {
                        sw.set_invalid(
                            "Spec.Virtualhost.TLS enabled fallback but the fallback Certificate Secret is not configured in the controller configuration",
                        );
                        return;
                    };
                    let secret = match dag.source.lookup_secret(&fallback, valid_tls_secret) {
                        Ok(secret) => tls_secret(&fallback, secret),
                        Err(error) => {
                            sw.set_invalid(format!(
                                "Spec.Virtualhost.TLS Secret \"{fallback}\" fallback certificate is invalid: {error}"
                            ));
                            return;
                        }
                    };
                    if !dag.source.delegation_permitted(&fallback, &id.namespace) {
                        sw.set_invalid(format!(
                            "Spec.VirtualHost.TLS fallback Secret \"{fallback}\" is not configured for certificate delegation"
                        ));
                        return;
                    }
                    dag.lookup_secure_virtual_host(host).fallback_certificate = Some(secret);
                }

                if let Some(client_validation) = &tls.client_validation {
                    let validation =
                        match lookup_downstream_validation(dag, client_validation, &id.namespace) {
                            Ok(validation) => validation,
                            Err(error) => {
                                sw.set_invalid(format!(
                                    "Spec.VirtualHost.TLS client validation is invalid: {error}"
                                ));
                                return;
                            }
                        };
                    dag.lookup_secure_virtual_host(host).downstream_validation = Some(validation);
                }
            } else if tls.client_validation.is_some() {
                sw.set_invalid(
                    "Spec.VirtualHost.TLS passthrough cannot be combined with tls.clientValidation",
                );
                return;
            }
        }

        if proxy.spec.tcp_proxy.is_some() {
            if !tls_enabled {
                sw.set_invalid(
                    "Spec.TCPProxy requires that either Spec.TLS.Passthrough or Spec.TLS.SecretName be set",
                );
                return;
            }
            if !self.process_tcpproxy(dag, sw, proxy, &[], host) {
                return;
            }
        }

        let routes = self.compute_routes(dag, sw, proxy, &[], &[], tls_enabled);
        add_routes(dag.lookup_virtual_host(host), &routes);

        // With TLS enabled and no TCP proxy in the way, the same routes are
        // served on the secure listener.
        if tls_enabled && proxy.spec.tcp_proxy.is_none() {
            add_routes(dag.lookup_secure_virtual_host(host), &routes);
        }
    }

    /// Walks a document and the include tree below it, returning the routes
    /// the subtree contributes. `conditions` accumulates the match conditions
    /// composed along the delegation chain; `visited` carries the ancestor
    /// path for cycle detection.
    fn compute_routes(
        &mut self,
        dag: &mut Builder,
        sw: &mut ObjectStatusWriter,
        proxy: &HttpProxy,
        conditions: &[httpproxy::MatchCondition],
        visited: &[ResourceId],
        enforce_tls: bool,
    ) -> Vec<Route> {
        let Some(id) = object_id(proxy) else {
            return Vec::new();
        };

        if visited.contains(&id) {
            let path: Vec<String> = visited
                .iter()
                .map(ToString::to_string)
                .chain(std::iter::once(id.to_string()))
                .collect();
            sw.set_invalid(format!(
                "include creates a delegation cycle: {}",
                path.join(" -> ")
            ));
            return Vec::new();
        }
        let mut visited = visited.to_vec();
        visited.push(id.clone());

        if include_match_conditions_identical(&proxy.spec.includes) {
            sw.set_invalid("duplicate conditions defined on an include");
            return Vec::new();
        }

        let mut routes = Vec::new();
        for include in &proxy.spec.includes {
            let namespace = include
                .namespace
                .as_deref()
                .filter(|ns| !ns.is_empty())
                .unwrap_or(&id.namespace);
            let delegate_id = ResourceId::new(namespace, &include.name);
            let Some(delegate) = dag.source.httpproxies.get(&delegate_id).cloned() else {
                sw.set_invalid(format!("include {namespace}/{} not found", include.name));
                return Vec::new();
            };
            // An ancestor is re-entered below, where the recursion reports
            // the full delegation cycle; only includes of unrelated roots are
            // rejected here.
            if delegate.spec.virtual_host.is_some() && !visited.contains(&delegate_id) {
                sw.set_invalid("root httpproxy cannot delegate to another root httpproxy");
                return Vec::new();
            }
            if let Err(error) = include_match_conditions_valid(&include.conditions) {
                sw.set_invalid(format!("include: {error}"));
                return Vec::new();
            }

            let mut composed = conditions.to_vec();
            composed.extend(include.conditions.iter().cloned());
            let mut delegate_sw = dag.with_object(&delegate);
            routes.extend(self.compute_routes(
                dag,
                &mut delegate_sw,
                &delegate,
                &composed,
                &visited,
                enforce_tls,
            ));
            dag.commit(delegate_sw);

            // The target is reachable from a root, so it is not an orphan.
            self.orphaned.remove(&delegate_id);
        }

        for route in &proxy.spec.routes {
            if let Err(error) = path_match_conditions_valid(&route.conditions) {
                sw.set_invalid(format!("route: {error}"));
                return Vec::new();
            }
            let mut conds = conditions.to_vec();
            conds.extend(route.conditions.iter().cloned());

            if let Err(error) = header_match_conditions_valid(&conds) {
                sw.set_invalid(error.to_string());
                return Vec::new();
            }

            let request_headers = match headers_policy(route.request_headers_policy.as_ref(), true)
            {
                Ok(policy) => policy,
                Err(error) => {
                    sw.set_invalid(error.to_string());
                    return Vec::new();
                }
            };
            let response_headers =
                match headers_policy(route.response_headers_policy.as_ref(), false) {
                    Ok(policy) => policy,
                    Err(error) => {
                        sw.set_invalid(error.to_string());
                        return Vec::new();
                    }
                };

            if route.services.is_empty() {
                sw.set_invalid("route.services must have at least one entry");
                return Vec::new();
            }

            let mut r = Route {
                path_match_condition: merge_path_match_conditions(&conds),
                header_match_conditions: merge_header_match_conditions(&conds),
                clusters: Vec::new(),
                mirror_policy: None,
                prefix_rewrite: None,
                websocket: route.enable_websockets,
                https_upgrade: route_enforce_tls(
                    enforce_tls,
                    route.permit_insecure && !self.disable_permit_insecure,
                ),
                timeout_policy: timeout_policy(route.timeout_policy.as_ref()),
                retry_policy: retry_policy(route.retry_policy.as_ref()),
                request_headers_policy: request_headers,
                response_headers_policy: response_headers,
            };

            let replacements = route
                .path_rewrite_policy
                .as_ref()
                .map(|policy| policy.replace_prefix.as_slice())
                .unwrap_or_default();
            if !replacements.is_empty() {
                // The merged condition is guaranteed to be a prefix when no
                // path condition was authored, so only an exact match can
                // land here without one.
                let Some(routing_prefix) =
                    r.path_match_condition.prefix().map(str::to_string)
                else {
                    sw.set_invalid("cannot specify prefix replacements without a prefix condition");
                    return Vec::new();
                };
                if let Err(error) = prefix_replacements_valid(replacements) {
                    sw.set_invalid(error.to_string());
                    return Vec::new();
                }

                // Prefer the replacement matching the routing prefix exactly;
                // fall back to the default (empty-prefix) replacement.
                let chosen = replacements
                    .iter()
                    .find(|rp| !rp.prefix.is_empty() && rp.prefix == routing_prefix)
                    .filter(|rp| !rp.replacement.is_empty())
                    .or_else(|| replacements.iter().find(|rp| rp.prefix.is_empty()));
                r.prefix_rewrite = chosen
                    .map(|rp| rp.replacement.clone())
                    .filter(|replacement| !replacement.is_empty());
            }

            for service in &route.services {
                if !(1..=65535).contains(&service.port) {
                    sw.set_invalid(format!(
                        "service {:?}: port must be in the range 1-65535",
                        service.name
                    ));
                    return Vec::new();
                }
                let m = ResourceId::new(&id.namespace, &service.name);
                let upstream = match dag.lookup_service(&m, service.port) {
                    Ok(upstream) => upstream,
                    Err(error) => {
                        sw.set_invalid(format!("Spec.Routes unresolved service reference: {error}"));
                        return Vec::new();
                    }
                };

                let protocol = match upstream_protocol_for(service, &upstream) {
                    Ok(protocol) => protocol,
                    Err(error) => {
                        sw.set_invalid(error.to_string());
                        return Vec::new();
                    }
                };

                // Upstream certificates can only be validated on connections
                // that speak TLS.
                let upstream_validation = if protocol.map_or(false, |p| p.is_tls()) {
                    match lookup_upstream_validation(
                        dag,
                        service.upstream_validation.as_ref(),
                        &id.namespace,
                    ) {
                        Ok(validation) => validation,
                        Err(error) => {
                            sw.set_invalid(format!(
                                "Service [{}:{}] TLS upstream validation policy error: {error}",
                                service.name, service.port
                            ));
                            return Vec::new();
                        }
                    }
                } else {
                    None
                };

                let cluster_request_headers =
                    match headers_policy(service.request_headers_policy.as_ref(), true) {
                        Ok(policy) => policy,
                        Err(error) => {
                            sw.set_invalid(error.to_string());
                            return Vec::new();
                        }
                    };
                let cluster_response_headers =
                    match headers_policy(service.response_headers_policy.as_ref(), false) {
                        Ok(policy) => policy,
                        Err(error) => {
                            sw.set_invalid(error.to_string());
                            return Vec::new();
                        }
                    };

                let sni = determine_sni(
                    r.request_headers_policy.as_ref(),
                    cluster_request_headers.as_ref(),
                    &upstream,
                );
                let cluster = Cluster {
                    upstream,
                    protocol,
                    weight: service.weight.unwrap_or_default(),
                    load_balancer_strategy: load_balancer_policy(
                        route.load_balancer_policy.as_ref(),
                    ),
                    http_health_check_policy: http_health_check_policy(
                        route.health_check_policy.as_ref(),
                    ),
                    tcp_health_check_policy: None,
                    upstream_validation,
                    request_headers_policy: cluster_request_headers,
                    response_headers_policy: cluster_response_headers,
                    sni,
                };

                if service.mirror && r.mirror_policy.is_some() {
                    sw.set_invalid("only one service per route may be nominated as mirror");
                    return Vec::new();
                }
                if service.mirror {
                    r.mirror_policy = Some(MirrorPolicy { cluster });
                } else {
                    r.clusters.push(cluster);
                }
            }
            routes.push(r);
        }

        let routes = expand_prefix_matches(routes);
        sw.set_valid();
        routes
    }

    /// Processes a `tcpproxy` stanza, following its include chain. Returns
    /// whether processing succeeded; failures are recorded on the status of
    /// the relevant document.
    fn process_tcpproxy(
        &mut self,
        dag: &mut Builder,
        sw: &mut ObjectStatusWriter,
        proxy: &HttpProxy,
        visited: &[ResourceId],
        host: &str,
    ) -> bool {
        let Some(tcpproxy) = &proxy.spec.tcp_proxy else {
            return true;
        };
        let Some(id) = object_id(proxy) else {
            return false;
        };
        let mut visited = visited.to_vec();
        visited.push(id.clone());

        // The singular form wins when both are specified.
        let include = tcpproxy
            .include
            .as_ref()
            .or(tcpproxy.includes_deprecated.as_ref());

        if !tcpproxy.services.is_empty() && include.is_some() {
            sw.set_invalid("tcpproxy: cannot specify services and include in the same httpproxy");
            return false;
        }

        if !tcpproxy.services.is_empty() {
            let mut clusters = Vec::new();
            for service in &tcpproxy.services {
                let m = ResourceId::new(&id.namespace, &service.name);
                let upstream = match dag.lookup_service(&m, service.port) {
                    Ok(upstream) => upstream,
                    Err(error) => {
                        sw.set_invalid(format!(
                            "Spec.TCPProxy unresolved service reference: {error}"
                        ));
                        return false;
                    }
                };
                clusters.push(Cluster {
                    protocol: upstream.protocol,
                    upstream,
                    weight: service.weight.unwrap_or_default(),
                    load_balancer_strategy: load_balancer_policy(
                        tcpproxy.load_balancer_policy.as_ref(),
                    ),
                    http_health_check_policy: None,
                    tcp_health_check_policy: tcp_health_check_policy(
                        tcpproxy.health_check_policy.as_ref(),
                    ),
                    upstream_validation: None,
                    request_headers_policy: None,
                    response_headers_policy: None,
                    sni: None,
                });
            }
            dag.lookup_secure_virtual_host(host).tcp_proxy = Some(TcpProxy { clusters });
            return true;
        }

        let Some(include) = include else {
            // An empty tcpproxy object forwards nothing.
            sw.set_invalid("tcpproxy: either services or inclusion must be specified");
            return false;
        };

        let namespace = include
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&id.namespace);
        let m = ResourceId::new(namespace, &include.name);
        let Some(dest) = dag.source.httpproxies.get(&m).cloned() else {
            sw.set_invalid(format!("tcpproxy: include {namespace}/{} not found", include.name));
            return false;
        };
        if dest.spec.virtual_host.is_some() {
            sw.set_invalid("root httpproxy cannot delegate to another root httpproxy");
            return false;
        }

        self.orphaned.remove(&m);

        if visited.contains(&m) {
            let path: Vec<String> = visited
                .iter()
                .map(ToString::to_string)
                .chain(std::iter::once(m.to_string()))
                .collect();
            sw.set_invalid(format!(
                "tcpproxy include creates a cycle: {}",
                path.join(" -> ")
            ));
            return false;
        }

        let mut dest_sw = dag.with_object(&dest);
        let ok = self.process_tcpproxy(dag, &mut dest_sw, &dest, &visited, host);
        if ok {
            dest_sw.set_valid();
        }
        dag.commit(dest_sw);
        ok
    }
}

fn add_routes(vhost: &mut dyn Vhost, routes: &[Route]) {
    for route in routes {
        vhost.add_route(route.clone());
    }
}

fn root_allowed(dag: &Builder, namespace: &str) -> bool {
    dag.source.root_namespaces.is_empty()
        || dag.source.root_namespaces.iter().any(|ns| ns == namespace)
}

fn lookup_upstream_validation(
    dag: &Builder,
    validation: Option<&httpproxy::UpstreamValidation>,
    namespace: &str,
) -> Result<Option<PeerValidationContext>> {
    let Some(validation) = validation else {
        return Ok(None);
    };
    let secret_id = ResourceId::new(namespace, &validation.ca_secret);
    let ca_certificate = dag
        .source
        .lookup_secret(&secret_id, valid_ca)
        .map(ca_bundle)
        .map_err(|error| anyhow!("invalid CA Secret \"{secret_id}\": {error}"))?;
    if validation.subject_name.is_empty() {
        bail!("missing subject alternative name");
    }
    Ok(Some(PeerValidationContext {
        ca_certificate,
        subject_name: Some(validation.subject_name.clone()),
    }))
}

fn lookup_downstream_validation(
    dag: &Builder,
    validation: &httpproxy::DownstreamValidation,
    namespace: &str,
) -> Result<PeerValidationContext> {
    let secret_id = ResourceId::new(namespace, &validation.ca_secret);
    let ca_certificate = dag
        .source
        .lookup_secret(&secret_id, valid_ca)
        .map(ca_bundle)
        .map_err(|error| anyhow!("invalid CA Secret \"{secret_id}\": {error}"))?;
    Ok(PeerValidationContext {
        ca_certificate,
        subject_name: None,
    })
}

/// The protocol spoken to a cluster: an explicit per-service override wins
/// over the upstream's protocol annotation.
fn upstream_protocol_for(
    service: &httpproxy::Service,
    upstream: &Service,
) -> Result<Option<Protocol>> {
    match service.protocol.as_deref() {
        Some(protocol) => protocol.parse().map(Some),
        None => Ok(upstream.protocol),
    }
}

/// The SNI sent on upstream TLS connections. A service-level host rewrite
/// wins over a route-level one; otherwise an `ExternalName` upstream supplies
/// its external name.
fn determine_sni(
    route_headers: Option<&HeadersPolicy>,
    cluster_headers: Option<&HeadersPolicy>,
    upstream: &Service,
) -> Option<String> {
    cluster_headers
        .and_then(|policy| policy.host_rewrite.clone())
        .or_else(|| route_headers.and_then(|policy| policy.host_rewrite.clone()))
        .or_else(|| upstream.external_name.clone())
}

fn route_enforce_tls(enforce_tls: bool, permit_insecure: bool) -> bool {
    enforce_tls && !permit_insecure
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Whether consecutive includes repeat a match condition: the same prefix
/// with an equal header condition. Only adjacent include pairs are compared.
fn include_match_conditions_identical(includes: &[httpproxy::Include]) -> bool {
    includes.windows(2).any(|pair| {
        pair[1].conditions.iter().any(|a| {
            pair[0]
                .conditions
                .iter()
                .any(|b| a.prefix == b.prefix && a.header == b.header)
        })
    })
}

/// Expands prefix-rewriting routes to account for the data plane's differing
/// rewrite behavior between `/foo` and `/foo/` matches.
///
/// Matching only one of the two forms produces unwanted rewrites for the
/// other (`/foo` with replacement `/` turns `/foo/v1` into `//v1`; `/foo/`
/// with replacement `/bar` turns `/foo/type` into `/bartype`), so a lone
/// rewriting route is split into a slash-less and a slash-terminated pair.
/// When the author already supplied both forms the group is left alone.
fn expand_prefix_matches(routes: Vec<Route>) -> Vec<Route> {
    let mut expanded = Vec::new();
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Route>> = HashMap::new();

    // Group the routes by their slash-trimmed prefix, preserving traversal
    // order. Routes without a path prefix are never expanded.
    for route in routes {
        let Some(prefix) = route.path_match_condition.prefix() else {
            expanded.push(route);
            continue;
        };
        let trimmed = if prefix == "/" {
            prefix.to_string()
        } else {
            prefix.trim_end_matches('/').to_string()
        };
        if !groups.contains_key(&trimmed) {
            order.push(trimmed.clone());
        }
        groups.entry(trimmed).or_default().push(route);
    }

    for prefix in order {
        let mut group = groups.remove(&prefix).unwrap_or_default();
        match group.len() {
            1 => {
                let mut route = group.remove(0);
                let rewrite = match &route.prefix_rewrite {
                    Some(rewrite) if prefix != "/" => rewrite.clone(),
                    _ => {
                        expanded.push(route);
                        continue;
                    }
                };

                let trimmed_rewrite = rewrite.trim_end_matches('/').to_string();
                let mut sibling = route.clone();

                route.path_match_condition = PathMatchCondition::Prefix(prefix.clone());
                // An empty rewrite is the same as rewriting to '/'.
                route.prefix_rewrite = Some(if trimmed_rewrite.is_empty() {
                    "/".to_string()
                } else {
                    trimmed_rewrite.clone()
                });

                sibling.path_match_condition = PathMatchCondition::Prefix(format!("{prefix}/"));
                sibling.prefix_rewrite = Some(format!("{trimmed_rewrite}/"));

                expanded.push(route);
                expanded.push(sibling);
            }
            // The author supplied both '/foo' and '/foo/', so no implicit
            // matches can be added. Larger groups only arise from duplicate
            // prefix paths and are passed through untouched.
            _ => expanded.append(&mut group),
        }
    }

    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_ingress_core::TimeoutPolicy;

    fn mk_route(prefix: &str, rewrite: Option<&str>) -> Route {
        Route {
            path_match_condition: PathMatchCondition::Prefix(prefix.to_string()),
            header_match_conditions: Vec::new(),
            clusters: Vec::new(),
            mirror_policy: None,
            prefix_rewrite: rewrite.map(str::to_string),
            websocket: false,
            https_upgrade: false,
            timeout_policy: TimeoutPolicy::default(),
            retry_policy: None,
            request_headers_policy: None,
            response_headers_policy: None,
        }
    }

    fn prefixes(routes: &[Route]) -> Vec<(String, Option<String>)> {
        routes
            .iter()
            .map(|r| {
                (
                    r.path_match_condition.prefix().unwrap_or_default().to_string(),
                    r.prefix_rewrite.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn lone_rewriting_route_expands_to_both_slash_forms() {
        let expanded = expand_prefix_matches(vec![mk_route("/foo", Some("/bar"))]);
        assert_eq!(
            prefixes(&expanded),
            vec![
                ("/foo".to_string(), Some("/bar".to_string())),
                ("/foo/".to_string(), Some("/bar/".to_string())),
            ]
        );
    }

    #[test]
    fn empty_trimmed_rewrite_normalizes_to_root() {
        let expanded = expand_prefix_matches(vec![mk_route("/foo", Some("/"))]);
        assert_eq!(
            prefixes(&expanded),
            vec![
                ("/foo".to_string(), Some("/".to_string())),
                ("/foo/".to_string(), Some("/".to_string())),
            ]
        );
    }

    #[test]
    fn root_prefix_and_rewriteless_routes_pass_through() {
        let expanded = expand_prefix_matches(vec![
            mk_route("/", Some("/bar")),
            mk_route("/foo", None),
        ]);
        assert_eq!(
            prefixes(&expanded),
            vec![
                ("/".to_string(), Some("/bar".to_string())),
                ("/foo".to_string(), None),
            ]
        );
    }

    #[test]
    fn author_supplied_pair_is_left_alone() {
        let expanded = expand_prefix_matches(vec![
            mk_route("/foo", Some("/bar")),
            mk_route("/foo/", Some("/bar/")),
        ]);
        assert_eq!(
            prefixes(&expanded),
            vec![
                ("/foo".to_string(), Some("/bar".to_string())),
                ("/foo/".to_string(), Some("/bar/".to_string())),
            ]
        );
    }

    #[test]
    fn identical_include_conditions_are_detected_adjacently_only() {
        let include = |prefix: &str| httpproxy::Include {
            name: "child".to_string(),
            namespace: None,
            conditions: vec![httpproxy::MatchCondition {
                prefix: Some(prefix.to_string()),
                ..Default::default()
            }],
        };
        assert!(include_match_conditions_identical(&[
            include("/a"),
            include("/a"),
        ]));
        assert!(!include_match_conditions_identical(&[
            include("/a"),
            include("/b"),
        ]));
        // Non-adjacent duplicates are not flagged.
        assert!(!include_match_conditions_identical(&[
            include("/a"),
            include("/b"),
            include("/a"),
        ]));
    }

    #[test]
    fn sni_prefers_service_rewrite_then_route_then_external_name() {
        let policy = |host: &str| HeadersPolicy {
            host_rewrite: Some(host.to_string()),
            ..Default::default()
        };
        let upstream = Service {
            namespace: "default".to_string(),
            name: "external".to_string(),
            port: 443,
            protocol: None,
            external_name: Some("external.example.com".to_string()),
        };

        assert_eq!(
            determine_sni(Some(&policy("route.example.com")), Some(&policy("svc.example.com")), &upstream),
            Some("svc.example.com".to_string())
        );
        assert_eq!(
            determine_sni(Some(&policy("route.example.com")), None, &upstream),
            Some("route.example.com".to_string())
        );
        assert_eq!(
            determine_sni(None, None, &upstream),
            Some("external.example.com".to_string())
        );
    }
}
