use std::sync::Arc;

use chrono::NaiveDate;

use crate::domain::{InstitutionMetadata, RawAggregateRecord, SummaryRecord};
use crate::error::SummaryError;
use crate::fos::FieldOfScienceTable;
use crate::registry::{RegistryCache, RegistryClient};

/// Ways a resource's institution can be found, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceInstitutionSource {
    /// The institution id advertised by the execution point itself.
    RecordInstitutionId,
    /// Topology resource name.
    ResourceName,
    /// Topology resource group; some sites report the group as the resource.
    ResourceGroup,
}

impl ResourceInstitutionSource {
    pub const ORDER: [ResourceInstitutionSource; 3] = [
        ResourceInstitutionSource::RecordInstitutionId,
        ResourceInstitutionSource::ResourceName,
        ResourceInstitutionSource::ResourceGroup,
    ];

    pub fn resolve<R: RegistryClient>(
        self,
        record: &RawAggregateRecord,
        registry: &RegistryCache<R>,
    ) -> Result<Option<Arc<InstitutionMetadata>>, SummaryError> {
        let institution_id = match self {
            ResourceInstitutionSource::RecordInstitutionId => record
                .has_institution_id()
                .then(|| record.institution_id.clone()),
            ResourceInstitutionSource::ResourceName => {
                registry.resource_institution_id(&record.resource_name)?
            }
            ResourceInstitutionSource::ResourceGroup => {
                registry.resource_group_institution_id(&record.resource_name)?
            }
        };
        match institution_id {
            Some(id) => registry.institution(&id),
            None => Ok(None),
        }
    }
}

/// First source in [`ResourceInstitutionSource::ORDER`] that yields an institution.
pub fn resource_institution<R: RegistryClient>(
    record: &RawAggregateRecord,
    registry: &RegistryCache<R>,
) -> Result<Option<Arc<InstitutionMetadata>>, SummaryError> {
    for source in ResourceInstitutionSource::ORDER {
        if let Some(institution) = source.resolve(record, registry)? {
            tracing::trace!(resource = %record.resource_name, ?source, "resolved resource institution");
            return Ok(Some(institution));
        }
    }
    Ok(None)
}

/// Joins raw aggregates with the registries and the field of science table.
pub struct SummaryBuilder<'a, R: RegistryClient> {
    registry: &'a RegistryCache<R>,
    fos: &'a FieldOfScienceTable,
}

impl<'a, R: RegistryClient> SummaryBuilder<'a, R> {
    pub fn new(registry: &'a RegistryCache<R>, fos: &'a FieldOfScienceTable) -> Self {
        Self { registry, fos }
    }

    pub fn build(
        &self,
        record: &RawAggregateRecord,
        date: NaiveDate,
    ) -> Result<SummaryRecord, SummaryError> {
        let project = self.registry.project(&record.account_group)?;
        let fields = self.fos.resolve(
            project
                .as_ref()
                .and_then(|project| project.field_of_science_id.as_deref()),
        );
        let project_institution = match project
            .as_ref()
            .and_then(|project| project.institution_id.as_deref())
        {
            Some(id) => self.registry.institution(id)?,
            None => None,
        };
        let resource_institution = resource_institution(record, self.registry)?;

        Ok(SummaryRecord {
            project_institution: project_institution.map(|institution| (*institution).clone()),
            resource_institution_id: resource_institution
                .as_ref()
                .map(|institution| institution.id.clone()),
            resource_institution: resource_institution.map(|institution| (*institution).clone()),
            resource_name: record.resource_name.clone(),
            project_name: record.account_group.clone(),
            broad_field_of_science: fields.broad,
            major_field_of_science: fields.major,
            detailed_field_of_science: fields.detailed,
            num_jobs: record.num_jobs,
            cpu_hours: record.cpu_hours,
            gpu_hours: record.gpu_hours,
            osdf_file_transfer_count: record.osdf_file_transfer_count,
            osdf_byte_transfer_count: record.osdf_byte_transfer_count,
            file_transfer_count: record.file_transfer_count,
            byte_transfer_count: record.byte_transfer_count,
            is_nrp: record.is_nrp,
            date,
        })
    }

    pub fn build_all(
        &self,
        records: &[RawAggregateRecord],
        date: NaiveDate,
    ) -> Result<Vec<SummaryRecord>, SummaryError> {
        records.iter().map(|record| self.build(record, date)).collect()
    }
}
