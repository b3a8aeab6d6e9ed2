// ABOUTME: Integration tests for configuration parsing and discovery.
// ABOUTME: Tests YAML fields, restart policies, health checks and -e environment merging.

use highk::config::*;
use highk::error::ErrorKind;
use std::time::Duration;

mod parsing {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let config = Config::default();
        assert_eq!(config.namespace.as_str(), DEFAULT_NAMESPACE);
        assert_eq!(config.cni_path.to_str(), Some(DEFAULT_CNI_PATH));
        assert_eq!(config.stop_timeout, DEFAULT_STOP_TIMEOUT);
        assert!(!config.insecure_registry);
    }

    #[test]
    fn full_config() {
        let yaml = r#"
address: unix:///run/containerd/containerd.sock
namespace: builds
data_root: /srv/highk
snapshotter: native
cni_path: /usr/libexec/cni
cni_netconfpath: /srv/cni
insecure_registry: true
experimental: true
debug: true
stop_timeout: 1m
default_restart_policy: on-failure:3
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.namespace.as_str(), "builds");
        assert_eq!(config.data_root.as_deref().and_then(|p| p.to_str()), Some("/srv/highk"));
        assert_eq!(config.snapshotter, "native");
        assert_eq!(config.cni_netconfpath().to_str(), Some("/srv/cni"));
        assert!(config.experimental);
        assert!(config.debug);
        assert_eq!(config.stop_timeout, Duration::from_secs(60));
        assert_eq!(
            config.default_restart_policy,
            RestartPolicy::OnFailure {
                max_retries: Some(3)
            }
        );
    }

    #[test]
    fn unknown_restart_policy_is_rejected() {
        let err = Config::from_yaml("default_restart_policy: sometimes").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert!(Config::from_yaml("stop_timeout: soon").is_err());
    }
}

mod discovery {
    use super::*;

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yml");
        std::fs::write(&path, "namespace: ci\n").unwrap();
        let config = Config::discover(Some(&path)).unwrap();
        assert_eq!(config.namespace.as_str(), "ci");
    }

    #[test]
    fn explicit_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::discover(Some(&dir.path().join("absent.yml"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

mod restart_policy {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        for text in ["no", "always", "unless-stopped", "on-failure", "on-failure:5"] {
            let policy: RestartPolicy = text.parse().unwrap();
            assert_eq!(policy.to_string(), text);
        }
    }

    #[test]
    fn only_no_is_disabled() {
        assert!(!RestartPolicy::No.is_enabled());
        assert!(RestartPolicy::Always.is_enabled());
        assert!("on-failure:x".parse::<RestartPolicy>().is_err());
    }
}

mod healthcheck {
    use super::*;

    #[test]
    fn yaml_durations_use_humantime() {
        let check: HealthcheckConfig = serde_yaml::from_str(
            r#"
test: ["CMD", "curl", "-f", "http://localhost"]
interval: 5s
retries: 2
"#,
        )
        .unwrap();
        assert_eq!(check.interval, Duration::from_secs(5));
        assert_eq!(check.timeout, Duration::from_secs(30));
        assert_eq!(check.retries, 2);
    }

    #[test]
    fn disabled_check_is_none_test() {
        assert_eq!(HealthcheckConfig::disabled().test, ["NONE"]);
    }
}

mod environment {
    use super::*;

    #[test]
    fn later_values_replace_image_values() {
        let env = resolve_env(
            &["PATH=/bin".to_string(), "MODE=image".to_string()],
            &["MODE=cli".to_string()],
        )
        .unwrap();
        assert_eq!(env, ["PATH=/bin", "MODE=cli"]);
    }

    #[test]
    fn bare_keys_come_from_the_host() {
        temp_env::with_vars(
            [("HIGHK_TEST_SET", Some("yes")), ("HIGHK_TEST_UNSET", None)],
            || {
                let env = resolve_env(
                    &[],
                    &["HIGHK_TEST_SET".to_string(), "HIGHK_TEST_UNSET".to_string()],
                )
                .unwrap();
                assert_eq!(env, ["HIGHK_TEST_SET=yes"]);
            },
        );
    }

    #[test]
    fn empty_key_is_invalid() {
        assert!(resolve_env(&[], &["=value".to_string()]).is_err());
    }
}
