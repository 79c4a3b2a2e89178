static QUALIFIED_MARKER: &str = "@sha256:";
static BARE_MARKER: &str = "sha256:";

/// Extracts the hex digest from an image ID string as reported by the
/// kubelet on a container status.
///
/// Observed forms are `<repository>@sha256:<hex>` and bare `sha256:<hex>`.
/// The qualified `@sha256:` form wins over a bare `sha256:` match appearing
/// elsewhere in the string. Returns an empty string when no digest marker is
/// present; callers treat that as "image not pulled yet" and skip the pod.
pub fn sha256_from_image_id(image_id: &str) -> String {
    if let Some(pos) = image_id.rfind(QUALIFIED_MARKER) {
        return image_id[pos + QUALIFIED_MARKER.len()..].to_string();
    }
    if let Some(pos) = image_id.rfind(BARE_MARKER) {
        return image_id[pos + BARE_MARKER.len()..].to_string();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_digest() {
        assert_eq!(
            sha256_from_image_id("registry.example/app@sha256:abc123"),
            "abc123"
        );
    }

    #[test]
    fn test_bare_digest() {
        assert_eq!(sha256_from_image_id("sha256:abc123"), "abc123");
    }

    #[test]
    fn test_runtime_scheme_prefix() {
        assert_eq!(
            sha256_from_image_id("docker-pullable://registry.example/app@sha256:0a1b2c"),
            "0a1b2c"
        );
    }

    #[test]
    fn test_qualified_form_wins_over_bare_match() {
        // a hash-like path segment must not shadow the registry digest
        assert_eq!(
            sha256_from_image_id("registry.example/sha256:cafe/app@sha256:abc123"),
            "abc123"
        );
    }

    #[test]
    fn test_no_marker_yields_empty() {
        assert_eq!(sha256_from_image_id("registry.example/app:latest"), "");
        assert_eq!(sha256_from_image_id(""), "");
    }
}
