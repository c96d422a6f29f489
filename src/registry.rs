use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::{InstitutionMetadata, ProjectMetadata};
use crate::error::SummaryError;

const INSTITUTION_URL_PREFIX: &str = "https://osg-htc.org/iid/";
const INSTITUTION_SHORT_PREFIX: &str = "osg-htc.org_iid_";

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TopologyResource {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Facility", default)]
    pub facility: Option<String>,
    #[serde(rename = "ResourceGroup", default)]
    pub resource_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TopologyFacility {
    #[serde(rename = "InstitutionID", default)]
    pub institution_id: Option<String>,
}

/// The external registries, one fetch per table.
pub trait RegistryClient: Send + Sync {
    fn fetch_resources(&self) -> Result<HashMap<String, TopologyResource>, SummaryError>;
    fn fetch_facilities(&self) -> Result<HashMap<String, TopologyFacility>, SummaryError>;
    fn fetch_projects(&self) -> Result<HashMap<String, ProjectMetadata>, SummaryError>;
    fn fetch_institutions(&self) -> Result<Vec<InstitutionMetadata>, SummaryError>;
}

#[derive(Clone)]
pub struct RegistryHttpClient {
    client: Client,
    topology_url: String,
    institutions_url: String,
}

impl RegistryHttpClient {
    pub fn new(
        topology_url: impl Into<String>,
        institutions_url: impl Into<String>,
    ) -> Result<Self, SummaryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ospool-summary/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SummaryError::RegistryHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SummaryError::RegistryHttp(err.to_string()))?;
        Ok(Self {
            client,
            topology_url: topology_url.into(),
            institutions_url: institutions_url.into(),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SummaryError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SummaryError::RegistryHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "registry request failed".to_string());
            return Err(SummaryError::RegistryStatus { status, message });
        }
        response.json().map_err(|err| SummaryError::RegistryParse {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

impl RegistryClient for RegistryHttpClient {
    fn fetch_resources(&self) -> Result<HashMap<String, TopologyResource>, SummaryError> {
        self.get_json(&format!("{}/miscresource/json", self.topology_url))
    }

    fn fetch_facilities(&self) -> Result<HashMap<String, TopologyFacility>, SummaryError> {
        self.get_json(&format!("{}/miscfacility/json", self.topology_url))
    }

    fn fetch_projects(&self) -> Result<HashMap<String, ProjectMetadata>, SummaryError> {
        self.get_json(&format!("{}/miscproject/json", self.topology_url))
    }

    fn fetch_institutions(&self) -> Result<Vec<InstitutionMetadata>, SummaryError> {
        self.get_json(&self.institutions_url)
    }
}

/// Fetch-once slot. The lock is held across the fetch so concurrent callers
/// wait for the first fetch instead of issuing their own.
struct Memo<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> Memo<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn get_or_try_init<F>(&self, init: F) -> Result<Arc<T>, SummaryError>
    where
        F: FnOnce() -> Result<T, SummaryError>,
    {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = Arc::new(init()?);
        *slot = Some(value.clone());
        Ok(value)
    }
}

/// Institutions keyed by both the URL id and the short id found in machine ads.
#[derive(Debug, Default)]
pub struct InstitutionIndex {
    by_id: HashMap<String, Arc<InstitutionMetadata>>,
}

impl InstitutionIndex {
    pub fn new(institutions: Vec<InstitutionMetadata>) -> Self {
        let mut by_id = HashMap::new();
        for institution in institutions {
            let institution = Arc::new(institution);
            let short_id = institution
                .id
                .replace(INSTITUTION_URL_PREFIX, INSTITUTION_SHORT_PREFIX);
            by_id.insert(short_id, institution.clone());
            by_id.insert(institution.id.clone(), institution);
        }
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<Arc<InstitutionMetadata>> {
        self.by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

struct TopologyMaps {
    resources: HashMap<String, String>,
    resource_groups: HashMap<String, String>,
}

/// Process-lifetime cache over a [`RegistryClient`]. Each table is fetched at
/// most once; fetch errors are returned to the caller and nothing is cached.
pub struct RegistryCache<R: RegistryClient> {
    client: R,
    topology: Memo<TopologyMaps>,
    projects: Memo<HashMap<String, ProjectMetadata>>,
    institutions: Memo<InstitutionIndex>,
}

impl<R: RegistryClient> RegistryCache<R> {
    pub fn new(client: R) -> Self {
        Self {
            client,
            topology: Memo::new(),
            projects: Memo::new(),
            institutions: Memo::new(),
        }
    }

    fn topology(&self) -> Result<Arc<TopologyMaps>, SummaryError> {
        self.topology.get_or_try_init(|| {
            let resources = self.client.fetch_resources()?;
            let facilities = self.client.fetch_facilities()?;

            let mut maps = TopologyMaps {
                resources: HashMap::new(),
                resource_groups: HashMap::new(),
            };
            for (key, resource) in resources {
                let institution_id = resource
                    .facility
                    .as_ref()
                    .and_then(|facility| facilities.get(facility))
                    .and_then(|facility| facility.institution_id.clone());
                let Some(institution_id) = institution_id else {
                    tracing::debug!(resource = %key, "resource facility has no institution");
                    continue;
                };
                let name = resource.name.unwrap_or(key);
                if let Some(group) = resource.resource_group {
                    maps.resource_groups
                        .insert(group.to_lowercase(), institution_id.clone());
                }
                maps.resources.insert(name.to_lowercase(), institution_id);
            }
            tracing::debug!(
                resources = maps.resources.len(),
                resource_groups = maps.resource_groups.len(),
                "loaded topology resources"
            );
            Ok(maps)
        })
    }

    pub fn resource_institution_id(&self, resource: &str) -> Result<Option<String>, SummaryError> {
        Ok(self.topology()?.resources.get(&resource.to_lowercase()).cloned())
    }

    pub fn resource_group_institution_id(
        &self,
        resource_group: &str,
    ) -> Result<Option<String>, SummaryError> {
        Ok(self
            .topology()?
            .resource_groups
            .get(&resource_group.to_lowercase())
            .cloned())
    }

    pub fn project(&self, account_group: &str) -> Result<Option<ProjectMetadata>, SummaryError> {
        let projects = self.projects.get_or_try_init(|| {
            let projects = self
                .client
                .fetch_projects()?
                .into_iter()
                .map(|(name, project)| (name.to_lowercase(), project))
                .collect::<HashMap<_, _>>();
            tracing::debug!(projects = projects.len(), "loaded topology projects");
            Ok(projects)
        })?;
        Ok(projects.get(&account_group.to_lowercase()).cloned())
    }

    pub fn institution(&self, id: &str) -> Result<Option<Arc<InstitutionMetadata>>, SummaryError> {
        let index = self.institutions.get_or_try_init(|| {
            let index = InstitutionIndex::new(self.client.fetch_institutions()?);
            tracing::debug!(ids = index.len(), "loaded institutions");
            Ok(index)
        })?;
        Ok(index.get(id))
    }
}
