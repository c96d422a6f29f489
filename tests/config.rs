use std::collections::HashMap;
use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8Path;

use ospool_summary::config::{
    CREDENTIAL_VARS, ConfigLoader, DEFAULT_DAILY_ID_PREFIX, DEFAULT_TOPOLOGY_URL, OUTPUT_VARS,
    SUMMARIZE_VARS,
};
use ospool_summary::error::SummaryError;
use ospool_summary::pool::AccessPointMap;

fn required() -> Vec<&'static str> {
    OUTPUT_VARS.iter().chain(CREDENTIAL_VARS).copied().collect()
}

#[test]
fn every_missing_variable_is_reported() {
    let env = HashMap::from([("ES_HOST", "https://es.example.org"), ("ES_USER", "  ")]);
    let err = ConfigLoader::resolve_with(|key| env.get(key).map(|v| v.to_string()), &required())
        .unwrap_err();
    assert_matches!(
        err,
        SummaryError::MissingConfig(missing)
            if missing == vec!["ES_INDEX", "ES_USER", "ES_PASSWORD"]
    );
}

#[test]
fn summarize_requires_a_field_of_science_table() {
    let env = HashMap::from([
        ("ES_HOST", "https://es.example.org"),
        ("ES_INDEX", "ospool-summary"),
        ("ES_USER", "writer"),
        ("ES_PASSWORD", "secret"),
    ]);
    let summarize_required = required()
        .into_iter()
        .chain(SUMMARIZE_VARS.iter().copied())
        .collect::<Vec<_>>();
    let err = ConfigLoader::resolve_with(|key| env.get(key).map(|v| v.to_string()), &summarize_required)
        .unwrap_err();
    assert_matches!(err, SummaryError::MissingConfig(missing) if missing == vec!["FOS_TABLE"]);

    let config =
        ConfigLoader::resolve_with(|key| env.get(key).map(|v| v.to_string()), &required())
            .unwrap();
    assert_eq!(config.fos_table, None);
}

#[test]
fn explicit_values_override_defaults() {
    let env = HashMap::from([
        ("ES_HOST", "https://es.example.org"),
        ("ES_INDEX", "ospool-summary"),
        ("ES_USER", "writer"),
        ("ES_PASSWORD", "secret"),
        ("RAW_ES_HOST", "https://raw.example.org"),
        ("RAW_ES_USER", "reader"),
        ("TOPOLOGY_URL", "https://topology.example.org/"),
        ("FOS_TABLE", "/etc/fos.tsv"),
    ]);
    let config =
        ConfigLoader::resolve_with(|key| env.get(key).map(|v| v.to_string()), &required())
            .unwrap();

    assert_eq!(config.output.username.as_deref(), Some("writer"));
    assert_eq!(config.raw.host, "https://raw.example.org");
    assert_eq!(config.raw.username.as_deref(), Some("reader"));
    assert_eq!(config.topology_url, "https://topology.example.org");
    assert_eq!(config.daily_id_prefix, DEFAULT_DAILY_ID_PREFIX);
    assert_eq!(config.fos_table.as_deref(), Some(Utf8Path::new("/etc/fos.tsv")));
    assert_ne!(config.topology_url, DEFAULT_TOPOLOGY_URL);
}

#[test]
fn missing_env_file_is_a_configuration_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.env");
    let err = ConfigLoader::resolve(path.to_str(), OUTPUT_VARS).unwrap_err();
    assert_matches!(err, SummaryError::EnvFileMissing(missing) if missing == path);
}

#[test]
fn env_file_populates_the_environment() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "OSPOOL_SUMMARY_TEST_INDEX=from-file").unwrap();
    writeln!(file, "ES_HOST=https://es.example.org").unwrap();
    writeln!(file, "ES_INDEX=ospool-summary").unwrap();

    ConfigLoader::resolve(file.path().to_str(), &[]).unwrap();
    assert_eq!(
        std::env::var("OSPOOL_SUMMARY_TEST_INDEX").as_deref(),
        Ok("from-file")
    );
}

#[test]
fn access_point_map_file_is_merged_with_custom_mappings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"ap40.uw.osg-htc.org": ["cm-1.ospool.osg-htc.org"], "jupyterlab-1": ["cm-1.ospool.osg-htc.org"]}}"#
    )
    .unwrap();

    let map = AccessPointMap::load(Some(Utf8Path::from_path(file.path()).unwrap())).unwrap();
    let access_points = map.pool_access_points();
    assert!(access_points.contains("ap40.uw.osg-htc.org"));
    assert!(access_points.contains("login.collab.ci-connect.net"));
    assert!(!access_points.contains("jupyterlab-1"));
}

#[test]
fn malformed_access_point_map_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "not json").unwrap();
    let err = AccessPointMap::load(Some(Utf8Path::from_path(file.path()).unwrap())).unwrap_err();
    assert_matches!(err, SummaryError::AccessPointMap(_));
}
