use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;

use crate::error::SummaryError;

pub const DEFAULT_RAW_HOST: &str = "http://localhost:9200";
pub const DEFAULT_RAW_INDEX: &str = "osg-schedd-*";
pub const DEFAULT_DAILY_HOST: &str = "http://localhost:9200";
pub const DEFAULT_DAILY_INDEX: &str = "daily_totals";
pub const DEFAULT_DAILY_ID_PREFIX: &str = "OSG-schedd-job-history";
pub const DEFAULT_TOPOLOGY_URL: &str = "https://topology.opensciencegrid.org";
pub const DEFAULT_INSTITUTIONS_URL: &str =
    "https://topology-institutions.osg-htc.org/api/institution_ids";

/// Variables every command needs.
pub const OUTPUT_VARS: &[&str] = &["ES_HOST", "ES_INDEX"];
/// Variables the commands that read or write summaries additionally need.
pub const CREDENTIAL_VARS: &[&str] = &["ES_USER", "ES_PASSWORD"];
/// `summarize` resolves fields of science and has no built-in crosswalk.
pub const SUMMARIZE_VARS: &[&str] = &["FOS_TABLE"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Connection {
    pub fn anonymous(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub output: Connection,
    pub output_index: String,
    pub raw: Connection,
    pub raw_index: String,
    pub daily: Connection,
    pub daily_index: String,
    pub daily_id_prefix: String,
    pub topology_url: String,
    pub institutions_url: String,
    pub fos_table: Option<Utf8PathBuf>,
    pub access_point_map: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `env_file` into the process environment (existing variables win)
    /// and resolves the configuration from it.
    pub fn resolve(env_file: Option<&str>, required: &[&str]) -> Result<ResolvedConfig, SummaryError> {
        if let Some(path) = env_file {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(SummaryError::EnvFileMissing(path));
            }
            dotenvy::from_path(&path).map_err(|err| SummaryError::EnvFileRead {
                path: path.clone(),
                message: err.to_string(),
            })?;
        }

        let mut config = Self::resolve_with(|key| std::env::var(key).ok(), required)?;
        if config.access_point_map.is_none() {
            config.access_point_map = default_access_point_map();
        }
        Ok(config)
    }

    pub fn resolve_with<F>(lookup: F, required: &[&str]) -> Result<ResolvedConfig, SummaryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let missing = required
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .map(|key| key.to_string())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(SummaryError::MissingConfig(missing));
        }

        // Empty only for callers that did not list them as required.
        let output = Connection {
            host: get("ES_HOST").unwrap_or_default(),
            username: get("ES_USER"),
            password: get("ES_PASSWORD"),
        };

        Ok(ResolvedConfig {
            output,
            output_index: get("ES_INDEX").unwrap_or_default(),
            raw: Connection {
                host: get("RAW_ES_HOST").unwrap_or_else(|| DEFAULT_RAW_HOST.to_string()),
                username: get("RAW_ES_USER"),
                password: get("RAW_ES_PASSWORD"),
            },
            raw_index: get("RAW_ES_INDEX").unwrap_or_else(|| DEFAULT_RAW_INDEX.to_string()),
            daily: Connection {
                host: get("DAILY_ES_HOST").unwrap_or_else(|| DEFAULT_DAILY_HOST.to_string()),
                username: get("DAILY_ES_USER"),
                password: get("DAILY_ES_PASSWORD"),
            },
            daily_index: get("DAILY_ES_INDEX").unwrap_or_else(|| DEFAULT_DAILY_INDEX.to_string()),
            daily_id_prefix: get("DAILY_ID_PREFIX")
                .unwrap_or_else(|| DEFAULT_DAILY_ID_PREFIX.to_string()),
            topology_url: get("TOPOLOGY_URL")
                .unwrap_or_else(|| DEFAULT_TOPOLOGY_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            institutions_url: get("INSTITUTIONS_URL")
                .unwrap_or_else(|| DEFAULT_INSTITUTIONS_URL.to_string()),
            fos_table: get("FOS_TABLE").map(Utf8PathBuf::from),
            access_point_map: get("ACCESS_POINT_MAP").map(Utf8PathBuf::from),
        })
    }
}

fn default_access_point_map() -> Option<Utf8PathBuf> {
    let dirs = ProjectDirs::from("org", "osg-htc", "ospool-summary")?;
    let path = Utf8PathBuf::from_path_buf(dirs.config_dir().join("access-point-map.json")).ok()?;
    path.as_std_path().exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_fill_optional_connections() {
        let env = HashMap::from([
            ("ES_HOST", "https://es.example.org"),
            ("ES_INDEX", "ospool-summary"),
        ]);
        let config =
            ConfigLoader::resolve_with(|key| env.get(key).map(|v| v.to_string()), OUTPUT_VARS)
                .unwrap();
        assert_eq!(config.raw, Connection::anonymous(DEFAULT_RAW_HOST));
        assert_eq!(config.raw_index, DEFAULT_RAW_INDEX);
        assert_eq!(config.daily_index, DEFAULT_DAILY_INDEX);
        assert_eq!(config.output.username, None);
    }
}
