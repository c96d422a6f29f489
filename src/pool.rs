use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::Utf8Path;

use crate::error::SummaryError;

/// Collectors that make up the OSPool.
pub const POOL_COLLECTOR_HOSTS: &[&str] = &[
    "cm-1.ospool.osg-htc.org",
    "cm-2.ospool.osg-htc.org",
    "flock.opensciencegrid.org",
];

/// Scheduler (7) and local (12) universe jobs never leave the access point.
pub const SKIPPED_JOB_UNIVERSES: &[u32] = &[7, 12];

const EXCLUDED_ACCESS_POINT_PREFIXES: &[&str] = &["jupyter-notebook-", "jupyterlab-"];

/// Access points that report through collectors other than their own machine ad.
const CUSTOM_MAPPING: &[(&str, &[&str])] = &[
    ("osg-login2.pace.gatech.edu", &["osg-login2.pace.gatech.edu"]),
    (
        "ce1.opensciencegrid.org",
        &["cm-2.ospool.osg-htc.org", "cm-1.ospool.osg-htc.org"],
    ),
    (
        "login-test.osgconnect.net",
        &["cm-2.ospool.osg-htc.org", "cm-1.ospool.osg-htc.org"],
    ),
    (
        "scosg16.jlab.org",
        &["scicollector.jlab.org", "osg-jlab-1.t2.ucsd.edu"],
    ),
    (
        "scosgdev16.jlab.org",
        &["scicollector.jlab.org", "osg-jlab-1.t2.ucsd.edu"],
    ),
    ("submit6.chtc.wisc.edu", &["htcondor-cm-path.osg.chtc.io"]),
    (
        "login-el7.xenon.ci-connect.net",
        &["cm-2.ospool.osg-htc.org", "cm-1.ospool.osg-htc.org"],
    ),
    (
        "login.collab.ci-connect.net",
        &["cm-2.ospool.osg-htc.org", "cm-1.ospool.osg-htc.org"],
    ),
    ("uclhc-2.ps.uci.edu", &["uclhc-2.ps.uci.edu"]),
    (
        "osgsub01.sdcc.bnl.gov",
        &["scicollector.jlab.org", "osg-jlab-1.t2.ucsd.edu"],
    ),
];

/// Access point (schedd machine) to the collector hosts it advertises to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPointMap {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl AccessPointMap {
    /// Custom mappings layered over an optional JSON file of
    /// `{"<schedd>": ["<collector>", ...]}`.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, SummaryError> {
        let mut map = Self::default();
        if let Some(path) = path {
            let content = fs::read_to_string(path)
                .map_err(|err| SummaryError::AccessPointMap(format!("{path}: {err}")))?;
            map = Self::from_json(&content)?;
            tracing::debug!(entries = map.entries.len(), %path, "loaded access point map");
        }
        map.overlay_custom_mappings();
        Ok(map)
    }

    fn overlay_custom_mappings(&mut self) {
        for (access_point, collectors) in CUSTOM_MAPPING {
            self.insert(access_point, collectors.iter().copied());
        }
    }

    pub fn from_json(content: &str) -> Result<Self, SummaryError> {
        let entries: BTreeMap<String, BTreeSet<String>> = serde_json::from_str(content)
            .map_err(|err| SummaryError::AccessPointMap(err.to_string()))?;
        Ok(Self { entries })
    }

    pub fn insert<'a>(&mut self, access_point: &str, collectors: impl IntoIterator<Item = &'a str>) {
        self.entries.insert(
            access_point.to_string(),
            collectors.into_iter().map(str::to_string).collect(),
        );
    }

    /// Access points sharing at least one collector with the pool, minus the
    /// notebook hosts.
    pub fn pool_access_points(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|(access_point, _)| {
                !EXCLUDED_ACCESS_POINT_PREFIXES
                    .iter()
                    .any(|prefix| access_point.starts_with(prefix))
            })
            .filter(|(_, collectors)| {
                collectors
                    .iter()
                    .any(|collector| POOL_COLLECTOR_HOSTS.contains(&collector.as_str()))
            })
            .map(|(access_point, _)| access_point.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_file_uses_custom_mappings() {
        let aps = AccessPointMap::load(None).unwrap().pool_access_points();
        assert!(aps.contains("login.collab.ci-connect.net"));
        assert!(!aps.contains("submit6.chtc.wisc.edu"));
    }

    #[test]
    fn excludes_notebooks_and_foreign_collectors() {
        let mut map = AccessPointMap::default();
        map.insert("ap20.uc.osg-htc.org", ["cm-1.ospool.osg-htc.org"]);
        map.insert("jupyter-notebook-abc", ["cm-1.ospool.osg-htc.org"]);
        map.insert("jupyterlab-xyz", ["cm-2.ospool.osg-htc.org"]);
        map.insert("scosg16.jlab.org", ["scicollector.jlab.org"]);

        let aps = map.pool_access_points();
        assert_eq!(
            aps.into_iter().collect::<Vec<_>>(),
            vec!["ap20.uc.osg-htc.org".to_string()]
        );
    }

    #[test]
    fn custom_mappings_override_file_entries() {
        let map = AccessPointMap::from_json(r#"{"ce1.opensciencegrid.org": []}"#).unwrap();
        assert!(map.pool_access_points().is_empty());

        let mut merged = map;
        merged.overlay_custom_mappings();
        assert!(merged.pool_access_points().contains("ce1.opensciencegrid.org"));
    }
}
