use chrono::NaiveDate;
use serde_json::json;

use ospool_summary::domain::{DateRange, ProjectMetadata, SummaryRecord, TimeWindow};

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

#[test]
fn range_is_inclusive_and_ascending() {
    let range = DateRange::new(date(2024, 1, 1), Some(date(2024, 1, 3)));
    assert_eq!(
        range.dates(),
        vec![date(2024, 1, 1), date(2024, 1, 2), date(2024, 1, 3)]
    );
}

#[test]
fn reversed_range_is_swapped() {
    let range = DateRange::new(date(2024, 3, 2), Some(date(2024, 2, 28)));
    assert_eq!(range.start(), date(2024, 2, 28));
    assert_eq!(range.end(), date(2024, 3, 2));
    assert_eq!(range.dates().len(), 4);
    assert_eq!(range.to_string(), "2024-02-28..=2024-03-02");
    assert_eq!(DateRange::single(date(2024, 1, 1)).dates().len(), 1);
}

#[test]
fn pool_day_is_chicago_midnight_to_midnight() {
    // 2024-01-01T00:00:00-06:00
    let window = TimeWindow::pool_day(date(2024, 1, 1));
    assert_eq!(window.start, 1_704_088_800);
    assert_eq!(window.end - window.start, 86_400);
}

#[test]
fn pool_day_follows_daylight_saving() {
    // Spring forward: 23 hours, fall back: 25 hours.
    let spring = TimeWindow::pool_day(date(2024, 3, 10));
    assert_eq!(spring.end - spring.start, 23 * 3600);
    let fall = TimeWindow::pool_day(date(2024, 11, 3));
    assert_eq!(fall.end - fall.start, 25 * 3600);
}

#[test]
fn project_codes_accept_numbers_and_strings() {
    let numeric: ProjectMetadata =
        serde_json::from_value(json!({ "Name": "P", "FieldOfScienceID": 26.1103 })).unwrap();
    assert_eq!(numeric.field_of_science_id.as_deref(), Some("26.1103"));

    let text: ProjectMetadata =
        serde_json::from_value(json!({ "FieldOfScienceID": " 1.0101 ", "InstitutionID": "x" }))
            .unwrap();
    assert_eq!(text.field_of_science_id.as_deref(), Some("1.0101"));
    assert_eq!(text.institution_id.as_deref(), Some("x"));

    let blank: ProjectMetadata = serde_json::from_value(json!({ "FieldOfScienceID": "" })).unwrap();
    assert_eq!(blank.field_of_science_id, None);
}

#[test]
fn summary_documents_use_published_field_names() {
    let record = SummaryRecord {
        project_institution: None,
        resource_institution: None,
        resource_institution_id: None,
        resource_name: "R1".to_string(),
        project_name: "A1".to_string(),
        broad_field_of_science: Some("Social sciences".to_string()),
        major_field_of_science: None,
        detailed_field_of_science: None,
        num_jobs: 3,
        cpu_hours: 1.0,
        gpu_hours: 0.0,
        osdf_file_transfer_count: 0.0,
        osdf_byte_transfer_count: 0.0,
        file_transfer_count: 2.0,
        byte_transfer_count: 10.0,
        is_nrp: true,
        date: date(2024, 1, 1),
    };
    let value = serde_json::to_value(&record).unwrap();
    for key in [
        "ProjectInstitution",
        "ResourceInstitution",
        "ResourceInstitutionID",
        "ResourceName",
        "ProjectName",
        "BroadFieldOfScience",
        "MajorFieldOfScience",
        "DetailedFieldOfScience",
        "NumJobs",
        "CpuHours",
        "GpuHours",
        "OSDFFileTransferCount",
        "OSDFByteTransferCount",
        "FileTransferCount",
        "ByteTransferCount",
        "isNRP",
        "Date",
    ] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
    assert_eq!(value["Date"], "2024-01-01");
}
