//! Library-namespace canonicalization for scopes and request paths
//!
//! The flagship registry files single-segment image names under `library/`.
//! Token scopes and data-plane paths are both rewritten with the same rule so
//! that a token scoped to `library/busybox` always matches the path it is used on.

const LIBRARY_NAMESPACE: &str = "library";

/// Canonicalize `<type>:<name>:<actions>` for the given upstream convention
pub fn canonicalize_scope(scope: &str, library_namespace: bool) -> String {
    if !library_namespace {
        return scope.to_string();
    }

    let segments: Vec<&str> = scope.split(':').collect();
    match segments.as_slice() {
        [resource_type, name, actions] if !name.is_empty() && !name.contains('/') => {
            format!("{}:{}/{}:{}", resource_type, LIBRARY_NAMESPACE, name, actions)
        }
        _ => scope.to_string(),
    }
}

/// Path a single-segment image request should be redirected to, if any.
///
/// Matches `/v2/<name>/<resource>/<reference>` exactly; anything with a
/// namespaced name, or any other shape, yields `None`.
pub fn canonical_library_path(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["v2", name, resource, reference]
            if !name.is_empty()
                && !name.starts_with('_')
                && !resource.is_empty()
                && !reference.is_empty() =>
        {
            Some(format!(
                "/v2/{}/{}/{}/{}",
                LIBRARY_NAMESPACE, name, resource, reference
            ))
        }
        _ => None,
    }
}
