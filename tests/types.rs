// ABOUTME: Integration tests for validated names, identifiers, ids and image references.
// ABOUTME: Property tests cover identifier and container name validation.

use highk::types::*;
use proptest::prelude::*;

mod image_ref_tests {
    use super::*;

    #[test]
    fn short_name_normalizes_to_docker_hub_library() {
        let img = ImageRef::parse("alpine").unwrap();
        assert_eq!(img.name(), "alpine");
        assert_eq!(img.tag(), Some("latest"));
        assert!(img.registry().is_none());
        assert_eq!(img.normalized(), "docker.io/library/alpine:latest");
    }

    #[test]
    fn org_images_keep_their_path() {
        let img = ImageRef::parse("bitnami/redis:7").unwrap();
        assert_eq!(img.normalized(), "docker.io/bitnami/redis:7");
    }

    #[test]
    fn registry_with_port_is_not_a_tag() {
        let img = ImageRef::parse("localhost:5000/app").unwrap();
        assert_eq!(img.registry(), Some("localhost:5000"));
        assert_eq!(img.name(), "app");
        assert_eq!(img.tag(), Some("latest"));
    }

    #[test]
    fn digest_only_reference_has_no_tag() {
        let img = ImageRef::parse("ghcr.io/org/repo@sha256:abc123").unwrap();
        assert_eq!(img.registry(), Some("ghcr.io"));
        assert_eq!(img.digest(), Some("sha256:abc123"));
        assert!(img.tag().is_none());
        assert_eq!(img.normalized(), "ghcr.io/org/repo@sha256:abc123");
    }

    #[test]
    fn invalid_references_are_rejected() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("invalid image!").is_err());
        assert!(ImageRef::parse("Upper/Case").is_err());
        assert!(ImageRef::parse("/leading").is_err());
    }

    #[test]
    fn display_keeps_the_user_form() {
        let img = ImageRef::parse("ghcr.io/org/repo:v1").unwrap();
        assert_eq!(img.to_string(), "ghcr.io/org/repo:v1");
    }
}

mod container_name_tests {
    use super::*;

    #[test]
    fn docker_style_names_are_accepted() {
        for name in ["web", "web-1", "web_1", "web.1", "1web", "Web"] {
            assert!(ContainerName::new(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(ContainerName::new(""), Err(ContainerNameError::Empty));
        assert!(matches!(
            ContainerName::new("-web"),
            Err(ContainerNameError::InvalidStart(_))
        ));
        assert!(matches!(
            ContainerName::new("a/b"),
            Err(ContainerNameError::InvalidChar(_, '/'))
        ));
        assert!(matches!(
            ContainerName::new(&"a".repeat(77)),
            Err(ContainerNameError::TooLong(_))
        ));
    }
}

mod identifier_tests {
    use super::*;

    #[test]
    fn lowercase_only() {
        assert!(Identifier::new("k8s-io").is_ok());
        assert!(Identifier::new("K8s").is_err());
        assert!(Identifier::new("_x").is_err());
        assert_eq!(Identifier::default_namespace().as_str(), "default");
    }

    #[test]
    fn max_length_is_inclusive() {
        assert!(Identifier::new(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
        assert!(Identifier::new(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }
}

mod id_tests {
    use super::*;

    #[test]
    fn ids_store_their_value() {
        let id = ContainerId::new("abc123");
        assert_eq!(id.as_str(), "abc123");
        let image = ImageId::new("sha256:abc");
        assert_eq!(image.as_str(), "sha256:abc");
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(random_hex_id(), random_hex_id());
        assert_eq!(ContainerId::generate().short().len(), SHORT_ID_LEN);
    }
}

proptest! {
    #[test]
    fn generated_identifiers_validate(s in "[a-z0-9][a-z0-9_-]{0,75}") {
        prop_assert!(Identifier::new(&s).is_ok());
    }

    #[test]
    fn identifiers_with_foreign_characters_fail(
        prefix in "[a-z0-9]{1,10}",
        bad in "[A-Z/:. ]",
        suffix in "[a-z0-9]{0,10}",
    ) {
        let candidate = format!("{prefix}{bad}{suffix}");
        prop_assert!(Identifier::new(&candidate).is_err());
    }

    #[test]
    fn container_names_never_contain_path_separators(s in "\\PC{1,40}") {
        if let Ok(name) = ContainerName::new(&s) {
            prop_assert!(!name.as_str().contains('/'));
            prop_assert!(!name.as_str().contains(':'));
        }
    }
}
