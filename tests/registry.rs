use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use chrono::NaiveDate;
use serde_json::Map;

use ospool_summary::domain::{InstitutionMetadata, ProjectMetadata, RawAggregateRecord, UNKNOWN};
use ospool_summary::enrich::{SummaryBuilder, resource_institution};
use ospool_summary::error::SummaryError;
use ospool_summary::fos::FieldOfScienceTable;
use ospool_summary::registry::{RegistryCache, RegistryClient, TopologyFacility, TopologyResource};

const ABCD: &str = "https://osg-htc.org/iid/ABCD";
const WXYZ: &str = "https://osg-htc.org/iid/WXYZ";

#[derive(Default)]
struct Calls {
    resources: usize,
    projects: usize,
    institutions: usize,
}

#[derive(Default)]
struct MockRegistry {
    calls: Arc<Mutex<Calls>>,
    fail_projects: bool,
}

fn institution(id: &str, name: &str) -> InstitutionMetadata {
    InstitutionMetadata {
        id: id.to_string(),
        name: Some(name.to_string()),
        attributes: Map::new(),
    }
}

impl RegistryClient for MockRegistry {
    fn fetch_resources(&self) -> Result<HashMap<String, TopologyResource>, SummaryError> {
        self.calls.lock().unwrap().resources += 1;
        Ok(HashMap::from([
            (
                "CHTC-Spark".to_string(),
                TopologyResource {
                    name: Some("CHTC-Spark".to_string()),
                    facility: Some("UW".to_string()),
                    resource_group: Some("CHTC-Group".to_string()),
                },
            ),
            (
                "Orphan-CE".to_string(),
                TopologyResource {
                    name: None,
                    facility: Some("Nowhere".to_string()),
                    resource_group: None,
                },
            ),
        ]))
    }

    fn fetch_facilities(&self) -> Result<HashMap<String, TopologyFacility>, SummaryError> {
        Ok(HashMap::from([(
            "UW".to_string(),
            TopologyFacility {
                institution_id: Some(WXYZ.to_string()),
            },
        )]))
    }

    fn fetch_projects(&self) -> Result<HashMap<String, ProjectMetadata>, SummaryError> {
        self.calls.lock().unwrap().projects += 1;
        if self.fail_projects {
            return Err(SummaryError::RegistryStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(HashMap::from([(
            "UW_Biology".to_string(),
            ProjectMetadata {
                name: Some("UW_Biology".to_string()),
                field_of_science_id: Some("26.1103".to_string()),
                institution_id: Some(ABCD.to_string()),
                ..Default::default()
            },
        )]))
    }

    fn fetch_institutions(&self) -> Result<Vec<InstitutionMetadata>, SummaryError> {
        self.calls.lock().unwrap().institutions += 1;
        Ok(vec![
            institution(ABCD, "University A"),
            institution(WXYZ, "University W"),
        ])
    }
}

fn raw(institution_id: &str, resource_name: &str, account_group: &str) -> RawAggregateRecord {
    RawAggregateRecord {
        institution_id: institution_id.to_string(),
        resource_name: resource_name.to_string(),
        account_group: account_group.to_string(),
        num_jobs: 10,
        cpu_hours: 1.5,
        gpu_hours: 0.0,
        file_transfer_count: 4.0,
        byte_transfer_count: 4096.0,
        osdf_file_transfer_count: 1.0,
        osdf_byte_transfer_count: 1024.0,
        transfer_metrics: BTreeMap::new(),
        is_nrp: institution_id != UNKNOWN,
    }
}

#[test]
fn url_and_short_institution_ids_share_metadata() {
    let cache = RegistryCache::new(MockRegistry::default());
    let long = cache.institution(ABCD).unwrap().unwrap();
    let short = cache.institution("osg-htc.org_iid_ABCD").unwrap().unwrap();
    assert!(Arc::ptr_eq(&long, &short));
    assert_eq!(long.name.as_deref(), Some("University A"));
}

#[test]
fn each_registry_is_fetched_once() {
    let registry = MockRegistry::default();
    let calls = registry.calls.clone();
    let cache = RegistryCache::new(registry);

    for _ in 0..3 {
        cache.institution(ABCD).unwrap();
        cache.project("uw_biology").unwrap();
        cache.resource_institution_id("chtc-spark").unwrap();
        cache.resource_group_institution_id("chtc-group").unwrap();
    }

    let calls = calls.lock().unwrap();
    assert_eq!(calls.institutions, 1);
    assert_eq!(calls.projects, 1);
    assert_eq!(calls.resources, 1);
}

#[test]
fn lookups_ignore_case_and_skip_facilities_without_institution() {
    let cache = RegistryCache::new(MockRegistry::default());
    assert_eq!(
        cache.resource_institution_id("chtc-SPARK").unwrap().as_deref(),
        Some(WXYZ)
    );
    assert_eq!(cache.resource_institution_id("Orphan-CE").unwrap(), None);
    assert!(cache.project("UW_BIOLOGY").unwrap().is_some());
    assert!(cache.project("Nobody").unwrap().is_none());
}

#[test]
fn fetch_errors_propagate_and_are_not_cached() {
    let registry = MockRegistry {
        fail_projects: true,
        ..Default::default()
    };
    let calls = registry.calls.clone();
    let cache = RegistryCache::new(registry);

    assert_matches!(
        cache.project("UW_Biology"),
        Err(SummaryError::RegistryStatus { status: 503, .. })
    );
    assert_matches!(cache.project("UW_Biology"), Err(_));
    assert_eq!(calls.lock().unwrap().projects, 2);
}

#[test]
fn resource_institution_falls_back_through_the_chain() {
    let cache = RegistryCache::new(MockRegistry::default());

    let advertised = resource_institution(&raw(ABCD, "CHTC-Spark", "x"), &cache).unwrap();
    assert_eq!(advertised.unwrap().id, ABCD);

    let by_name = resource_institution(&raw(UNKNOWN, "CHTC-Spark", "x"), &cache).unwrap();
    assert_eq!(by_name.unwrap().id, WXYZ);

    let by_group = resource_institution(&raw(UNKNOWN, "chtc-group", "x"), &cache).unwrap();
    assert_eq!(by_group.unwrap().id, WXYZ);

    let unregistered = resource_institution(&raw("osg-htc.org_iid_NONE", "CHTC-Spark", "x"), &cache)
        .unwrap();
    assert_eq!(unregistered.unwrap().id, WXYZ);

    assert!(resource_institution(&raw(UNKNOWN, "Lost-CE", "x"), &cache).unwrap().is_none());
}

#[test]
fn builder_joins_registries_and_field_of_science() {
    let cache = RegistryCache::new(MockRegistry::default());
    let table = FieldOfScienceTable::parse(
        "26.1103\tBiological and biomedical sciences\tBiological sciences\tBioinformatics",
    )
    .unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

    let record = SummaryBuilder::new(&cache, &table)
        .build(&raw(UNKNOWN, "CHTC-Spark", "UW_Biology"), date)
        .unwrap();

    assert_eq!(record.project_institution.unwrap().id, ABCD);
    assert_eq!(record.resource_institution_id.as_deref(), Some(WXYZ));
    assert_eq!(record.detailed_field_of_science.as_deref(), Some("Bioinformatics"));
    assert_eq!(record.num_jobs, 10);
    assert!(!record.is_nrp);
    assert_eq!(record.date, date);

    let unmapped = SummaryBuilder::new(&cache, &table)
        .build(&raw(UNKNOWN, "Lost-CE", "Nobody"), date)
        .unwrap();
    assert_eq!(unmapped.project_institution, None);
    assert_eq!(unmapped.resource_institution, None);
    assert_eq!(unmapped.broad_field_of_science, None);
}
