//! Shared deployment harness for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tierkeeper::catalog::InMemoryCatalog;
use tierkeeper::fsm::{Fsm, FsmConfig};
use tierkeeper::model::DatasetInfo;
use tierkeeper::persistence::JsonRequestStore;
use tierkeeper::service::{
    ArchiveTier, DataStream, IdsService, ServiceConfig, DEFAULT_READER_SESSION,
};
use tierkeeper::storage::LocalFileStorage;
use tierkeeper::workers::MarkerStore;

pub const ALICE: &str = "session-alice";
pub const BOB: &str = "session-bob";
pub const ROOT: &str = "session-root";

/// A service over temporary tiers with one public dataset (id 1, `inv1/ds1`).
pub struct Deployment {
    pub dir: TempDir,
    pub catalog: Arc<InMemoryCatalog>,
    pub main: Arc<LocalFileStorage>,
    pub archive: Option<Arc<LocalFileStorage>>,
    pub service: IdsService,
}

pub fn config(write_delay: Duration) -> ServiceConfig {
    ServiceConfig::builder()
        .root_users(["root"])
        .fsm(
            FsmConfig::default()
                .with_write_delay(write_delay)
                .with_max_workers(2),
        )
        .build()
}

fn catalog() -> Arc<InMemoryCatalog> {
    let catalog = InMemoryCatalog::new();
    catalog.add_session(ALICE, "alice");
    catalog.add_session(BOB, "bob");
    catalog.add_session(ROOT, "root");
    catalog.add_session(DEFAULT_READER_SESSION, "reader");
    catalog.add_dataset(DatasetInfo {
        id: 1,
        name: "ds1".to_string(),
        location: "inv1/ds1".to_string(),
        investigation_id: 1,
    });
    Arc::new(catalog)
}

impl Deployment {
    pub fn two_level(write_delay: Duration) -> Self {
        Self::create(true, config(write_delay))
    }

    pub fn single_level(config: ServiceConfig) -> Self {
        Self::create(false, config)
    }

    fn create(two_level: bool, config: ServiceConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let main = Arc::new(LocalFileStorage::new(dir.path().join("main")).unwrap());
        let archive = two_level
            .then(|| Arc::new(LocalFileStorage::new(dir.path().join("archive")).unwrap()));
        let service = build(&dir, &catalog, &main, archive.as_ref(), config);
        Self {
            dir,
            catalog,
            main,
            archive,
            service,
        }
    }

    /// A fresh service over the same tiers, request store and catalog.
    pub fn reopen(&self, config: ServiceConfig) -> IdsService {
        build(
            &self.dir,
            &self.catalog,
            &self.main,
            self.archive.as_ref(),
            config,
        )
    }

    pub fn fsm(&self) -> &Arc<Fsm> {
        self.service.fsm().expect("two-level deployment")
    }

    pub fn archive(&self) -> &LocalFileStorage {
        self.archive.as_deref().expect("two-level deployment")
    }

    /// Stores a datafile in dataset 1 as alice.
    pub fn put(&self, name: &str, content: &str) -> u64 {
        self.service
            .put(ALICE, 1, name, &mut content.as_bytes())
            .unwrap()
    }
}

fn build(
    dir: &TempDir,
    catalog: &Arc<InMemoryCatalog>,
    main: &Arc<LocalFileStorage>,
    archive: Option<&Arc<LocalFileStorage>>,
    config: ServiceConfig,
) -> IdsService {
    let store = Arc::new(JsonRequestStore::open(dir.path().join("requests")).unwrap());
    let tier = archive.map(|storage| ArchiveTier {
        storage: storage.clone(),
        markers: MarkerStore::new(&dir.path().join("markers")).unwrap(),
    });
    IdsService::new(config, catalog.clone(), main.clone(), store, tier)
}

/// Dispatches everything ready and waits for the workers.
pub async fn settle(fsm: &Arc<Fsm>) -> usize {
    let dispatched = fsm.process_queue();
    assert!(
        fsm.wait_until_settled(Duration::from_secs(5)).await,
        "workers did not finish"
    );
    dispatched
}

pub fn download(stream: DataStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.write_to(&mut out).unwrap();
    out
}

/// Entry name to content of an uncompressed tar bundle.
pub fn tar_entries(bytes: &[u8]) -> BTreeMap<String, String> {
    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            (name, content)
        })
        .collect()
}
