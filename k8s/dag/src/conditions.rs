use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{anyhow, bail, Result};
use trellis_ingress_core::{HeaderMatchCondition, HeaderMatchType, PathMatchCondition};
use trellis_ingress_k8s_api::httpproxy::{MatchCondition, ReplacePrefix};

/// Checks the path conditions within a single condition block: at most one
/// path condition, and all path values must be absolute.
pub(crate) fn path_match_conditions_valid(conditions: &[MatchCondition]) -> Result<()> {
    let mut path_count = 0;
    for condition in conditions {
        if let Some(prefix) = condition.prefix.as_deref() {
            path_count += 1;
            if !prefix.starts_with('/') {
                bail!("prefix conditions must start with /, {prefix} was supplied");
            }
        }
        if let Some(exact) = condition.exact.as_deref() {
            path_count += 1;
            if !exact.starts_with('/') {
                bail!("exact conditions must start with /, {exact} was supplied");
            }
        }
        if path_count > 1 {
            bail!("more than one prefix or exact is not allowed in a condition block");
        }
    }
    Ok(())
}

/// Checks an include's conditions. Includes compose by prefixing, so exact
/// path conditions are not permitted on them.
pub(crate) fn include_match_conditions_valid(conditions: &[MatchCondition]) -> Result<()> {
    path_match_conditions_valid(conditions)?;
    if conditions.iter().any(|c| c.exact.is_some()) {
        bail!("exact conditions are not allowed in includes");
    }
    Ok(())
}

/// Rejects contradictory exact-match predicates on the same header within a
/// composed condition list.
pub(crate) fn header_match_conditions_valid(conditions: &[MatchCondition]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for condition in conditions {
        let Some(header) = &condition.header else {
            continue;
        };
        if let Some(exact) = header.exact.as_deref() {
            let name = header.name.to_lowercase();
            match seen.get(&name) {
                Some(&value) if value != exact => {
                    bail!("cannot specify duplicate header 'exact match' conditions in the same route")
                }
                _ => {
                    seen.insert(name, exact);
                }
            }
        }
    }
    Ok(())
}

/// Merges the path conditions composed along a delegation chain into the one
/// condition a route carries. Prefix segments concatenate left to right; a
/// trailing exact condition makes the merged result exact; an empty merge
/// matches the `/` prefix.
pub(crate) fn merge_path_match_conditions(conditions: &[MatchCondition]) -> PathMatchCondition {
    let mut prefix = String::new();
    let mut exact = None;
    for condition in conditions {
        if let Some(p) = condition.prefix.as_deref() {
            prefix.push_str(p.trim_end_matches('/'));
        }
        if let Some(e) = condition.exact.as_deref() {
            exact = Some(e);
        }
    }
    match exact {
        Some(e) => PathMatchCondition::Exact(format!("{prefix}{e}")),
        None if prefix.is_empty() => PathMatchCondition::Prefix("/".to_string()),
        None => PathMatchCondition::Prefix(prefix),
    }
}

/// Merges the header predicates composed along a delegation chain, with names
/// normalized to lower case.
pub(crate) fn merge_header_match_conditions(
    conditions: &[MatchCondition],
) -> Vec<HeaderMatchCondition> {
    let mut merged = Vec::new();
    for condition in conditions {
        let Some(header) = &condition.header else {
            continue;
        };
        let name = header.name.to_lowercase();
        let header = if header.present {
            HeaderMatchCondition {
                name,
                value: String::new(),
                match_type: HeaderMatchType::Present,
                invert: false,
            }
        } else if let Some(contains) = header.contains.clone() {
            HeaderMatchCondition {
                name,
                value: contains,
                match_type: HeaderMatchType::Contains,
                invert: false,
            }
        } else if let Some(not_contains) = header.not_contains.clone() {
            HeaderMatchCondition {
                name,
                value: not_contains,
                match_type: HeaderMatchType::Contains,
                invert: true,
            }
        } else if let Some(exact) = header.exact.clone() {
            HeaderMatchCondition {
                name,
                value: exact,
                match_type: HeaderMatchType::Exact,
                invert: false,
            }
        } else if let Some(not_exact) = header.not_exact.clone() {
            HeaderMatchCondition {
                name,
                value: not_exact,
                match_type: HeaderMatchType::Exact,
                invert: true,
            }
        } else {
            continue;
        };
        merged.push(header);
    }
    merged
}

/// Checks a route's prefix replacements: each matched prefix may appear at
/// most once, including the default (empty) prefix.
pub(crate) fn prefix_replacements_valid(replacements: &[ReplacePrefix]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for replacement in replacements {
        if !seen.insert(replacement.prefix.as_str()) {
            if replacement.prefix.is_empty() {
                return Err(anyhow!("ambiguous prefix replacement"));
            }
            bail!("duplicate replacement prefix '{}'", replacement.prefix);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(p: &str) -> MatchCondition {
        MatchCondition {
            prefix: Some(p.to_string()),
            ..Default::default()
        }
    }

    fn exact(p: &str) -> MatchCondition {
        MatchCondition {
            exact: Some(p.to_string()),
            ..Default::default()
        }
    }

    fn header_exact(name: &str, value: &str) -> MatchCondition {
        MatchCondition {
            header: Some(trellis_ingress_k8s_api::httpproxy::HeaderMatchCondition {
                name: name.to_string(),
                exact: Some(value.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn empty_merge_defaults_to_root_prefix() {
        assert_eq!(
            merge_path_match_conditions(&[]),
            PathMatchCondition::Prefix("/".to_string())
        );
    }

    #[test]
    fn prefixes_concatenate_with_slash_trimming() {
        assert_eq!(
            merge_path_match_conditions(&[prefix("/api/"), prefix("/v1")]),
            PathMatchCondition::Prefix("/api/v1".to_string())
        );
        assert_eq!(
            merge_path_match_conditions(&[prefix("/")]),
            PathMatchCondition::Prefix("/".to_string())
        );
    }

    #[test]
    fn trailing_exact_makes_the_merge_exact() {
        assert_eq!(
            merge_path_match_conditions(&[prefix("/api"), exact("/health")]),
            PathMatchCondition::Exact("/api/health".to_string())
        );
    }

    #[test]
    fn multiple_path_conditions_in_a_block_are_rejected() {
        assert!(path_match_conditions_valid(&[prefix("/a"), prefix("/b")]).is_err());
        assert!(path_match_conditions_valid(&[prefix("/a"), exact("/b")]).is_err());
        assert!(path_match_conditions_valid(&[prefix("/a"), header_exact("x", "y")]).is_ok());
    }

    #[test]
    fn relative_paths_are_rejected() {
        let err = path_match_conditions_valid(&[prefix("api")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "prefix conditions must start with /, api was supplied"
        );
    }

    #[test]
    fn includes_may_not_use_exact_conditions() {
        assert!(include_match_conditions_valid(&[prefix("/a")]).is_ok());
        assert!(include_match_conditions_valid(&[exact("/a")]).is_err());
    }

    #[test]
    fn contradictory_exact_headers_are_rejected() {
        assert!(header_match_conditions_valid(&[
            header_exact("X-Env", "prod"),
            header_exact("x-env", "staging"),
        ])
        .is_err());
        assert!(header_match_conditions_valid(&[
            header_exact("X-Env", "prod"),
            header_exact("x-env", "prod"),
        ])
        .is_ok());
    }

    #[test]
    fn header_names_are_normalized_when_merged() {
        let merged = merge_header_match_conditions(&[header_exact("X-Env", "prod")]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "x-env");
        assert_eq!(merged[0].match_type, HeaderMatchType::Exact);
        assert!(!merged[0].invert);
    }

    #[test]
    fn duplicate_prefix_replacements_are_rejected() {
        let replace = |prefix: &str| ReplacePrefix {
            prefix: prefix.to_string(),
            replacement: "/new".to_string(),
        };
        assert!(prefix_replacements_valid(&[replace("/a"), replace("/b")]).is_ok());
        assert_eq!(
            prefix_replacements_valid(&[replace("/a"), replace("/a")])
                .unwrap_err()
                .to_string(),
            "duplicate replacement prefix '/a'"
        );
        assert_eq!(
            prefix_replacements_valid(&[replace(""), replace("")])
                .unwrap_err()
                .to_string(),
            "ambiguous prefix replacement"
        );
    }
}
