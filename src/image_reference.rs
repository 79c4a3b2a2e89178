use std::fmt;

static DEFAULT_REGISTRY: &str = "docker.io";
static DEFAULT_NAMESPACE: &str = "library";
static DEFAULT_TAG: &str = "latest";

/// A normalized image reference. The deployment spec and the pod status may
/// spell the same image with different degrees of qualification; parsing
/// both into this form makes them comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

#[derive(Debug)]
pub enum ParseError {
    Empty,
    MissingTag,
    InvalidFormat(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::MissingTag => write!(f, "tag is missing"),
            ParseError::InvalidFormat(image) => write!(f, "invalid image format: {}", image),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl ImageReference {
    /// Parses `[registry/]repository[:tag][@digest]` and fills the Docker
    /// conventions: a missing registry resolves to docker.io, a bare
    /// repository on docker.io gains the library/ namespace, a missing tag
    /// resolves to latest. A digest suffix carries no name information and
    /// is ignored.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let name = match s.split_once('@') {
            Some((name, _digest)) => name,
            None => s,
        };
        if name.is_empty() {
            return Err(ParseError::Empty);
        }

        // A colon after the last slash separates the tag
        let (without_tag, tag) = if let Some(pos) = name.rfind(':') {
            let last_slash = name.rfind('/').unwrap_or(0);
            if pos > last_slash {
                (&name[..pos], name[pos + 1..].to_string())
            } else {
                (name, DEFAULT_TAG.to_string())
            }
        } else {
            (name, DEFAULT_TAG.to_string())
        };
        if tag.is_empty() {
            return Err(ParseError::MissingTag);
        }
        if without_tag.is_empty() {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        // The first path segment is a registry only when it looks like a
        // hostname, same heuristic the container runtimes use
        let (registry, repository) = match without_tag.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), without_tag.to_string()),
        };

        // A colon inside the registry must introduce a numeric port
        if let Some((_, port)) = registry.rsplit_once(':') {
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return Err(ParseError::InvalidFormat(s.to_string()));
            }
        }

        if repository.is_empty()
            || repository.contains(':')
            || repository.starts_with('/')
            || repository.ends_with('/')
        {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("{}/{}", DEFAULT_NAMESPACE, repository)
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            tag,
        })
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_repository_is_fully_qualified() {
        let reference = ImageReference::parse("nginx").unwrap();
        assert_eq!(reference.registry, "docker.io");
        assert_eq!(reference.repository, "library/nginx");
        assert_eq!(reference.tag, "latest");
        assert_eq!(reference.to_string(), "docker.io/library/nginx:latest");
    }

    #[test]
    fn test_tag_is_preserved() {
        let reference = ImageReference::parse("nginx:1.27").unwrap();
        assert_eq!(reference.to_string(), "docker.io/library/nginx:1.27");
    }

    #[test]
    fn test_fully_qualified_reference() {
        let reference = ImageReference::parse("registry.example/team/app:v2").unwrap();
        assert_eq!(reference.registry, "registry.example");
        assert_eq!(reference.repository, "team/app");
        assert_eq!(reference.tag, "v2");
    }

    #[test]
    fn test_registry_with_port() {
        let reference = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(reference.registry, "localhost:5000");
        assert_eq!(reference.repository, "app");
        assert_eq!(reference.tag, "latest");
    }

    #[test]
    fn test_digest_suffix_is_ignored() {
        let with_digest = ImageReference::parse("app@sha256:abc123").unwrap();
        let without = ImageReference::parse("app:latest").unwrap();
        assert_eq!(with_digest, without);
    }

    #[test]
    fn test_namespaced_docker_hub_repository() {
        let reference = ImageReference::parse("toucansoft/frontend:latest").unwrap();
        assert_eq!(reference.registry, "docker.io");
        assert_eq!(reference.repository, "toucansoft/frontend");
    }

    #[test]
    fn test_empty_reference_is_rejected() {
        assert!(matches!(ImageReference::parse(""), Err(ParseError::Empty)));
    }

    #[test]
    fn test_empty_tag_is_rejected() {
        assert!(matches!(
            ImageReference::parse("app:"),
            Err(ParseError::MissingTag)
        ));
    }

    #[test]
    fn test_stray_colon_is_rejected() {
        assert!(ImageReference::parse("bad:ref/app").is_err());
    }
}
