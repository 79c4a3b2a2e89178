use chrono::{DateTime, Utc};
use serde::Serialize;

/// A running container image, identified by its content digest. Compared by
/// digest for change detection; the reference name is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageDescriptor {
    #[serde(rename = "name")]
    pub reference_name: String,
    #[serde(rename = "sha256")]
    pub digest: String,
}

impl ImageDescriptor {
    pub fn new(reference_name: String, digest: String) -> Self {
        Self {
            reference_name,
            digest,
        }
    }

    fn absent() -> Self {
        Self {
            reference_name: String::new(),
            digest: String::new(),
        }
    }
}

/// Broadcast payload informing clients that the running image has changed.
/// The previous image carries empty strings when no prior state existed.
#[derive(Debug, Clone, Serialize)]
pub struct ImageChangeEvent {
    pub created_at: DateTime<Utc>,
    pub namespace: String,
    pub name: String,
    pub current_image: ImageDescriptor,
    pub previous_image: ImageDescriptor,
}

impl ImageChangeEvent {
    pub fn new(
        namespace: &str,
        name: &str,
        current: ImageDescriptor,
        previous: Option<&ImageDescriptor>,
    ) -> Self {
        Self {
            created_at: Utc::now(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            current_image: current,
            previous_image: previous.cloned().unwrap_or_else(ImageDescriptor::absent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_shape() {
        let event = ImageChangeEvent::new(
            "default",
            "frontend",
            ImageDescriptor::new("docker.io/library/app:latest".to_string(), "bbb".to_string()),
            Some(&ImageDescriptor::new(
                "docker.io/library/app:latest".to_string(),
                "aaa".to_string(),
            )),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["namespace"], "default");
        assert_eq!(value["name"], "frontend");
        assert_eq!(value["current_image"]["name"], "docker.io/library/app:latest");
        assert_eq!(value["current_image"]["sha256"], "bbb");
        assert_eq!(value["previous_image"]["sha256"], "aaa");
        assert!(value["created_at"].is_string());
    }

    #[test]
    fn test_absent_previous_image_serializes_as_empty_strings() {
        let event = ImageChangeEvent::new(
            "default",
            "",
            ImageDescriptor::new("docker.io/library/app:latest".to_string(), "aaa".to_string()),
            None,
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["name"], "");
        assert_eq!(value["previous_image"]["name"], "");
        assert_eq!(value["previous_image"]["sha256"], "");
    }

    #[test]
    fn test_payload_is_a_single_line() {
        let event = ImageChangeEvent::new(
            "default",
            "frontend",
            ImageDescriptor::new("app".to_string(), "aaa".to_string()),
            None,
        );

        let payload = serde_json::to_string(&event).unwrap();
        assert!(!payload.contains('\n'));
    }
}
