//! Integration tests for a single-level deployment.
//!
//! Without an archive tier all data is always online. Migration requests
//! are validated but do nothing.

mod common;

use std::io::Read;
use std::time::Duration;

use common::*;
use flate2::read::GzDecoder;
use tierkeeper::error::IdsError;
use tierkeeper::model::{DatasetInfo, Status};
use tierkeeper::selection::SelectionQuery;
use tierkeeper::service::ServiceConfig;
use tierkeeper::storage::Storage;

fn deployment() -> Deployment {
    Deployment::single_level(config(Duration::ZERO))
}

fn dataset_query() -> SelectionQuery {
    SelectionQuery::new().with_datasets("1")
}

#[test]
fn test_ping_and_version() {
    let d = deployment();
    assert!(!d.service.is_two_level());
    assert_eq!(d.service.ping(), "IdsOK");
    assert_eq!(d.service.api_version(), tierkeeper::VERSION);
    assert!(!d.service.is_read_only());
}

#[test]
fn test_size_and_datafile_ids_of_selection() {
    let d = deployment();
    let a = d.put("a.dat", "alpha");
    let b = d.put("b.dat", "beta");

    assert_eq!(d.service.get_size(ALICE, &dataset_query()).unwrap(), 9);
    assert_eq!(
        d.service.get_datafile_ids(ALICE, &dataset_query()).unwrap(),
        vec![a, b]
    );

    let single = SelectionQuery::new().with_datafiles(b.to_string());
    assert_eq!(d.service.get_size(ALICE, &single).unwrap(), 4);
    assert_eq!(d.service.get_datafile_ids(ALICE, &single).unwrap(), vec![b]);

    let err = d
        .service
        .get_size(ALICE, &SelectionQuery::new())
        .unwrap_err();
    assert!(matches!(err, IdsError::BadRequest(_)), "{err:?}");
}

#[test]
fn test_everything_is_online() {
    let d = deployment();
    d.put("a.dat", "alpha");

    assert_eq!(
        d.service.get_status(Some(ALICE), &dataset_query()).unwrap(),
        Status::Online
    );
    // Anonymous callers use the reader session
    assert_eq!(
        d.service.get_status(None, &dataset_query()).unwrap(),
        Status::Online
    );

    let id = d
        .service
        .prepare_data(ALICE, &dataset_query(), false, false)
        .unwrap();
    assert!(d.service.is_prepared(&id).unwrap());
    assert_eq!(
        d.service.get_status_for_prepared(&id).unwrap(),
        Status::Online
    );
}

#[test]
fn test_compressed_prepared_bundle() {
    let d = deployment();
    d.put("a.dat", "alpha");
    d.put("b.dat", "beta");

    let id = d
        .service
        .prepare_data(ALICE, &dataset_query(), true, false)
        .unwrap();
    let stream = d.service.get_prepared_data(&id, None, None).unwrap();
    assert!(stream.name().ends_with(".tar.gz"));

    let mut tar = Vec::new();
    GzDecoder::new(&download(stream)[..])
        .read_to_end(&mut tar)
        .unwrap();
    let entries = tar_entries(&tar);
    assert_eq!(entries["ids/1/ds1/a.dat"], "alpha");
    assert_eq!(entries["ids/1/ds1/b.dat"], "beta");
}

#[test]
fn test_single_file_download_with_range() {
    let d = deployment();
    let a = d.put("a.dat", "alpha");
    let query = SelectionQuery::new().with_datafiles(a.to_string());

    let stream = d
        .service
        .get_data(ALICE, &query, false, false, Some("renamed.dat"), Some("bytes=3-"))
        .unwrap();
    assert!(!stream.is_bundle());
    assert_eq!(stream.name(), "renamed.dat");
    assert_eq!(download(stream), b"ha");

    let stream = d
        .service
        .get_data(ALICE, &query, false, true, None, Some("bytes=1000000-"))
        .unwrap();
    assert!(stream.is_bundle());
    assert!(download(stream).is_empty());

    let err = d
        .service
        .get_data(ALICE, &query, false, false, None, Some("bytes=0-10"))
        .unwrap_err();
    assert!(matches!(err, IdsError::BadRequest(_)));
}

#[test]
fn test_migration_requests_are_validated_only() {
    let d = deployment();
    d.put("a.dat", "alpha");

    d.service.archive(ALICE, &dataset_query()).unwrap();
    d.service.restore(ALICE, &dataset_query()).unwrap();
    assert!(d.main.exists("inv1/ds1/a.dat").unwrap());

    let err = d
        .service
        .archive(ALICE, &SelectionQuery::new().with_investigations("1"))
        .unwrap_err();
    assert!(matches!(err, IdsError::NotImplemented(_)));

    let err = d
        .service
        .restore(ALICE, &SelectionQuery::new().with_datasets("42"))
        .unwrap_err();
    assert!(matches!(err, IdsError::NotFound(_)));
}

#[test]
fn test_bad_selections() {
    let d = deployment();

    let err = d
        .service
        .get_status(Some(ALICE), &SelectionQuery::new())
        .unwrap_err();
    assert!(matches!(err, IdsError::BadRequest(_)));

    let err = d
        .service
        .get_status(Some(ALICE), &SelectionQuery::new().with_datasets("1,x"))
        .unwrap_err();
    assert!(matches!(err, IdsError::BadRequest(_)));

    let err = d
        .service
        .get_status(Some("no-such-session"), &dataset_query())
        .unwrap_err();
    assert!(matches!(err, IdsError::InsufficientPrivileges(_)));
}

#[test]
fn test_restricted_investigation() {
    let d = deployment();
    d.catalog.restrict_investigation(2, ["alice"]);
    d.catalog.add_dataset(DatasetInfo {
        id: 2,
        name: "ds2".to_string(),
        location: "inv2/ds2".to_string(),
        investigation_id: 2,
    });
    let query = SelectionQuery::new().with_datasets("2");

    assert!(d.service.prepare_data(ALICE, &query, false, false).is_ok());
    let err = d
        .service
        .prepare_data(BOB, &query, false, false)
        .unwrap_err();
    assert!(matches!(err, IdsError::InsufficientPrivileges(_)));
}

#[test]
fn test_put_and_delete() {
    let d = deployment();
    let a = d.put("a.dat", "alpha");
    assert!(d.main.exists("inv1/ds1/a.dat").unwrap());

    d.service
        .delete(ALICE, &SelectionQuery::new().with_datafiles(a.to_string()))
        .unwrap();
    assert!(!d.main.exists("inv1/ds1").unwrap());
    assert!(d.service.locks().lock_info().is_empty());

    // The name is free again
    d.put("a.dat", "again");
}

#[test]
fn test_read_only_rejects_modification() {
    let d = Deployment::single_level(ServiceConfig::builder().read_only(true).build());
    assert!(d.service.is_read_only());

    let err = d
        .service
        .put(ALICE, 1, "a.dat", &mut "alpha".as_bytes())
        .unwrap_err();
    assert!(matches!(err, IdsError::NotImplemented(_)));

    let err = d.service.delete(ALICE, &dataset_query()).unwrap_err();
    assert!(matches!(err, IdsError::NotImplemented(_)));
}

#[test]
fn test_service_status_without_archive() {
    let d = deployment();

    let status = d.service.get_service_status(ROOT).unwrap();
    assert!(status.queue.is_empty());
    assert!(status.locks.is_empty());

    let err = d.service.get_service_status(BOB).unwrap_err();
    assert!(matches!(err, IdsError::InsufficientPrivileges(_)));
}
