use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{bail, Result};
use std::time::Duration;
use trellis_ingress_core::{
    HeadersPolicy, HttpHealthCheckPolicy, LoadBalancerStrategy, RetryPolicy, TcpHealthCheckPolicy,
    Timeout, TimeoutPolicy,
};
use trellis_ingress_k8s_api::{self as api, GoDuration};

/// Extracts a header-mutation policy, validating header names and rejecting
/// duplicates. A `Host` set entry becomes a host rewrite and is only legal on
/// request policies.
pub(crate) fn headers_policy(
    policy: Option<&api::httpproxy::HeadersPolicy>,
    allow_host_rewrite: bool,
) -> Result<Option<HeadersPolicy>> {
    let Some(policy) = policy else {
        return Ok(None);
    };

    let mut set = HashMap::with_capacity(policy.set.len());
    let mut host_rewrite = None;
    for entry in &policy.set {
        let key = entry.name.to_lowercase();
        if key == "host" {
            if !allow_host_rewrite {
                bail!("rewriting {:?} header is not supported", entry.name);
            }
            if host_rewrite.replace(entry.value.clone()).is_some() {
                bail!("duplicate header addition: {:?}", entry.name);
            }
            continue;
        }
        if let Err(error) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            bail!("invalid set header {:?}: {error}", entry.name);
        }
        if set.insert(key, escape_header_value(&entry.value)).is_some() {
            bail!("duplicate header addition: {:?}", entry.name);
        }
    }

    let mut remove = HashSet::with_capacity(policy.remove.len());
    for entry in &policy.remove {
        let key = entry.to_lowercase();
        if let Err(error) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            bail!("invalid remove header {:?}: {error}", entry);
        }
        if !remove.insert(key) {
            bail!("duplicate header removal: {:?}", entry);
        }
    }
    let mut remove: Vec<String> = remove.into_iter().collect();
    remove.sort();

    Ok(Some(HeadersPolicy {
        set,
        remove,
        host_rewrite,
    }))
}

/// Escapes `%` so header values survive the data plane's runtime-variable
/// substitution.
fn escape_header_value(value: &str) -> String {
    value.replace('%', "%%")
}

pub(crate) fn timeout_policy(policy: Option<&api::httpproxy::TimeoutPolicy>) -> TimeoutPolicy {
    let Some(policy) = policy else {
        return TimeoutPolicy::default();
    };
    TimeoutPolicy {
        response: parse_timeout(policy.response.as_deref()),
        idle: parse_timeout(policy.idle.as_deref()),
    }
}

/// `"infinity"` explicitly disables a timeout. An unparseable value also
/// disables it rather than failing the document.
fn parse_timeout(timeout: Option<&str>) -> Timeout {
    match timeout {
        None | Some("") => Timeout::Default,
        Some("infinity") => Timeout::Infinite,
        Some(timeout) => match timeout.parse::<GoDuration>() {
            Ok(GoDuration(d)) => Timeout::Duration(d),
            Err(_) => Timeout::Infinite,
        },
    }
}

pub(crate) fn retry_policy(policy: Option<&api::httpproxy::RetryPolicy>) -> Option<RetryPolicy> {
    let policy = policy?;
    let per_try_timeout = policy
        .per_try_timeout
        .as_deref()
        .and_then(|t| t.parse::<GoDuration>().ok())
        .map(Duration::from);
    Some(RetryPolicy {
        retry_on: "5xx".to_string(),
        num_retries: policy.count.unwrap_or_default().max(1),
        per_try_timeout,
    })
}

pub(crate) fn load_balancer_policy(
    policy: Option<&api::httpproxy::LoadBalancerPolicy>,
) -> LoadBalancerStrategy {
    match policy.map(|p| p.strategy.as_str()) {
        Some("WeightedLeastRequest") => LoadBalancerStrategy::WeightedLeastRequest,
        Some("Random") => LoadBalancerStrategy::Random,
        Some("Cookie") => LoadBalancerStrategy::Cookie,
        _ => LoadBalancerStrategy::RoundRobin,
    }
}

pub(crate) fn http_health_check_policy(
    policy: Option<&api::httpproxy::HttpHealthCheckPolicy>,
) -> Option<HttpHealthCheckPolicy> {
    let policy = policy?;
    Some(HttpHealthCheckPolicy {
        path: policy.path.clone(),
        host: policy.host.clone(),
        interval: seconds(policy.interval_seconds),
        timeout: seconds(policy.timeout_seconds),
        unhealthy_threshold: policy.unhealthy_threshold_count,
        healthy_threshold: policy.healthy_threshold_count,
    })
}

pub(crate) fn tcp_health_check_policy(
    policy: Option<&api::httpproxy::TcpHealthCheckPolicy>,
) -> Option<TcpHealthCheckPolicy> {
    let policy = policy?;
    Some(TcpHealthCheckPolicy {
        interval: seconds(policy.interval_seconds),
        timeout: seconds(policy.timeout_seconds),
        unhealthy_threshold: policy.unhealthy_threshold_count,
        healthy_threshold: policy.healthy_threshold_count,
    })
}

fn seconds(s: i64) -> Duration {
    Duration::from_secs(s.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_ingress_k8s_api::httpproxy::{HeaderValue, HeadersPolicy as ApiHeadersPolicy};

    fn set_policy(entries: &[(&str, &str)]) -> ApiHeadersPolicy {
        ApiHeadersPolicy {
            set: entries
                .iter()
                .map(|(name, value)| HeaderValue {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            remove: Vec::new(),
        }
    }

    #[test]
    fn host_entry_becomes_a_rewrite_on_request_policies() {
        let policy = set_policy(&[("Host", "app.example.com"), ("X-Extra", "1")]);
        let extracted = headers_policy(Some(&policy), true).unwrap().unwrap();
        assert_eq!(extracted.host_rewrite.as_deref(), Some("app.example.com"));
        assert_eq!(extracted.set.get("x-extra").map(String::as_str), Some("1"));
        assert!(!extracted.set.contains_key("host"));
    }

    #[test]
    fn host_entry_is_rejected_on_response_policies() {
        let policy = set_policy(&[("Host", "app.example.com")]);
        let err = headers_policy(Some(&policy), false).unwrap_err();
        assert_eq!(err.to_string(), "rewriting \"Host\" header is not supported");
    }

    #[test]
    fn duplicate_and_invalid_set_entries_are_rejected() {
        let policy = set_policy(&[("X-Extra", "1"), ("x-extra", "2")]);
        assert!(headers_policy(Some(&policy), true).is_err());

        let policy = set_policy(&[("not a header", "1")]);
        assert!(headers_policy(Some(&policy), true).is_err());
    }

    #[test]
    fn removals_are_deduplicated_case_insensitively_and_sorted() {
        let policy = ApiHeadersPolicy {
            set: Vec::new(),
            remove: vec!["X-B".to_string(), "X-A".to_string()],
        };
        let extracted = headers_policy(Some(&policy), true).unwrap().unwrap();
        assert_eq!(extracted.remove, vec!["x-a".to_string(), "x-b".to_string()]);

        let policy = ApiHeadersPolicy {
            set: Vec::new(),
            remove: vec!["X-A".to_string(), "x-a".to_string()],
        };
        assert!(headers_policy(Some(&policy), true).is_err());
    }

    #[test]
    fn percent_signs_are_escaped_in_set_values() {
        let policy = set_policy(&[("X-Pct", "100%")]);
        let extracted = headers_policy(Some(&policy), true).unwrap().unwrap();
        assert_eq!(
            extracted.set.get("x-pct").map(String::as_str),
            Some("100%%")
        );
    }

    #[test]
    fn timeouts_parse_with_infinity_and_fallback() {
        let policy = api::httpproxy::TimeoutPolicy {
            response: Some("90s".to_string()),
            idle: Some("infinity".to_string()),
        };
        assert_eq!(
            timeout_policy(Some(&policy)),
            TimeoutPolicy {
                response: Timeout::Duration(Duration::from_secs(90)),
                idle: Timeout::Infinite,
            }
        );

        let policy = api::httpproxy::TimeoutPolicy {
            response: Some("not a duration".to_string()),
            idle: None,
        };
        assert_eq!(
            timeout_policy(Some(&policy)),
            TimeoutPolicy {
                response: Timeout::Infinite,
                idle: Timeout::Default,
            }
        );

        assert_eq!(timeout_policy(None), TimeoutPolicy::default());
    }

    #[test]
    fn retry_count_has_a_floor_of_one() {
        let policy = api::httpproxy::RetryPolicy {
            count: None,
            per_try_timeout: Some("100ms".to_string()),
        };
        let extracted = retry_policy(Some(&policy)).unwrap();
        assert_eq!(extracted.num_retries, 1);
        assert_eq!(extracted.retry_on, "5xx");
        assert_eq!(extracted.per_try_timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn unknown_load_balancer_strategies_fall_back_to_round_robin() {
        let policy = |strategy: &str| api::httpproxy::LoadBalancerPolicy {
            strategy: strategy.to_string(),
        };
        assert_eq!(
            load_balancer_policy(Some(&policy("Random"))),
            LoadBalancerStrategy::Random
        );
        assert_eq!(
            load_balancer_policy(Some(&policy("bogus"))),
            LoadBalancerStrategy::RoundRobin
        );
        assert_eq!(load_balancer_policy(None), LoadBalancerStrategy::RoundRobin);
    }
}
