// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn base_vars() -> HashMap<String, String> {
    HashMap::from([
        ("DATABASE_URL".to_string(), "sqlite:///var/lib/sbx/sbx.db".to_string()),
        ("INTERNAL_API_TOKEN".to_string(), "secret".to_string()),
    ])
}

#[test]
fn defaults_match_documented_values() {
    let config = Config::from_vars(&base_vars()).unwrap();
    assert_eq!(config.runtime, RuntimeChoice::Auto);
    assert_eq!(config.listen_addr, "0.0.0.0:7070");
    assert_eq!(config.default_timeout, Duration::from_secs(300));
    assert_eq!(config.max_timeout, Duration::from_secs(3600));
    assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
    assert_eq!(config.session_max_lifetime, Duration::from_secs(21600));
    assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    assert_eq!(config.heartbeat_timeout, Duration::from_secs(15));
    assert_eq!(config.max_execution_retries, 3);
    assert_eq!(config.result_truncate_bytes, 256 * 1024);
    assert_eq!(config.artifact_inline_max_bytes, 10 * 1024 * 1024);
    assert!(config.static_nodes.is_empty());
}

#[test]
fn missing_database_url_is_an_error() {
    let mut vars = base_vars();
    vars.remove("DATABASE_URL");
    let err = Config::from_vars(&vars).unwrap_err();
    assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
}

#[test]
fn missing_internal_token_is_an_error() {
    let mut vars = base_vars();
    vars.remove("INTERNAL_API_TOKEN");
    let err = Config::from_vars(&vars).unwrap_err();
    assert!(matches!(err, ConfigError::Missing("INTERNAL_API_TOKEN")));
}

#[test]
fn runtime_kind_parses_all_choices() {
    for (raw, expect) in [
        ("docker", RuntimeChoice::Docker),
        ("kubernetes", RuntimeChoice::Kubernetes),
        ("auto", RuntimeChoice::Auto),
    ] {
        let mut vars = base_vars();
        vars.insert("RUNTIME_KIND".to_string(), raw.to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().runtime, expect);
    }

    let mut vars = base_vars();
    vars.insert("RUNTIME_KIND".to_string(), "podman".to_string());
    assert!(Config::from_vars(&vars).is_err());
}

#[test]
fn static_nodes_parse_id_endpoint_pairs() {
    let mut vars = base_vars();
    vars.insert(
        "SBX_NODES".to_string(),
        "node-a=tcp://10.0.0.1:2375, node-b=unix:///var/run/docker.sock".to_string(),
    );
    let config = Config::from_vars(&vars).unwrap();
    assert_eq!(config.static_nodes.len(), 2);
    assert_eq!(config.static_nodes[0].id, "node-a");
    assert_eq!(config.static_nodes[0].endpoint, "tcp://10.0.0.1:2375");
    assert_eq!(config.static_nodes[1].endpoint, "unix:///var/run/docker.sock");
}

#[test]
fn malformed_static_nodes_are_rejected() {
    let mut vars = base_vars();
    vars.insert("SBX_NODES".to_string(), "just-an-id".to_string());
    assert!(Config::from_vars(&vars).is_err());
}

#[test]
fn artifact_endpoint_accepts_paths_and_file_uris() {
    let mut vars = base_vars();
    vars.insert("ARTIFACT_STORE_ENDPOINT".to_string(), "file:///srv/sbx/artifacts".to_string());
    let config = Config::from_vars(&vars).unwrap();
    assert_eq!(config.artifact_root, PathBuf::from("/srv/sbx/artifacts"));

    vars.insert("ARTIFACT_STORE_ENDPOINT".to_string(), "/mnt/artifacts".to_string());
    let config = Config::from_vars(&vars).unwrap();
    assert_eq!(config.artifact_root, PathBuf::from("/mnt/artifacts"));
}

#[test]
fn remote_artifact_endpoints_are_rejected() {
    let mut vars = base_vars();
    vars.insert("ARTIFACT_STORE_ENDPOINT".to_string(), "s3://bucket/prefix".to_string());
    assert!(Config::from_vars(&vars).is_err());
}

#[test]
fn clamp_timeout_applies_default_and_cap() {
    let config = Config::from_vars(&base_vars()).unwrap();
    assert_eq!(config.clamp_timeout(None), 300);
    assert_eq!(config.clamp_timeout(Some(60)), 60);
    assert_eq!(config.clamp_timeout(Some(999_999)), 3600);
}

#[test]
fn control_plane_url_defaults_to_listen_addr() {
    let config = Config::from_vars(&base_vars()).unwrap();
    assert_eq!(config.control_plane_url, "http://0.0.0.0:7070");

    let mut vars = base_vars();
    vars.insert("SBX_CONTROL_PLANE_URL".to_string(), "http://cp.internal:7070".to_string());
    let config = Config::from_vars(&vars).unwrap();
    assert_eq!(config.control_plane_url, "http://cp.internal:7070");
}
