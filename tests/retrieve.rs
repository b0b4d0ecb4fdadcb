//! C-GET and C-MOVE integration tests over loopback TCP

use async_trait::async_trait;
use dicompot::config::{ProviderConfig, UserConfig};
use dicompot::error::{DulError, Result};
use dicompot::io::{
    QueryRequest, RetrieveHandler, RetrieveItem, ServiceProvider, ServiceUser, StoreHandler,
    StoreRequest,
};
use dicompot::protocol::dataset::{find, tags, Element};
use dicompot::protocol::dimse::{status, Status};
use dicompot::protocol::uid;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

fn provider_config(ae_title: &str) -> ProviderConfig {
    ProviderConfig {
        listen_address: "127.0.0.1:0".to_string(),
        ae_title: ae_title.to_string(),
        ..ProviderConfig::default()
    }
}

fn user_config(addr: SocketAddr, called_ae: &str) -> UserConfig {
    UserConfig {
        remote_address: addr.to_string(),
        called_ae_title: called_ae.to_string(),
        calling_ae_title: "VIEWER".to_string(),
        artim_timeout_ms: 2000,
        ..UserConfig::default()
    }
}

async fn start(provider: ServiceProvider) -> SocketAddr {
    let addr = provider.local_addr().unwrap();
    tokio::spawn(async move { provider.run().await });
    addr
}

fn study_identifier() -> Vec<Element> {
    vec![
        Element::text(tags::QUERY_RETRIEVE_LEVEL, b"CS", "STUDY"),
        Element::text(tags::STUDY_INSTANCE_UID, b"UI", "1.2.840.99.1"),
    ]
}

/// Yields `count` CT instances for any identifier
struct CtSeries {
    count: u16,
}

#[async_trait]
impl RetrieveHandler for CtSeries {
    async fn retrieve(&self, _request: QueryRequest, items: mpsc::Sender<RetrieveItem>) -> Result<()> {
        for n in 0..self.count {
            let sop_instance_uid = format!("1.2.840.99.1.{}", n + 1);
            let item = RetrieveItem {
                sop_class_uid: uid::CT_IMAGE_STORAGE.to_string(),
                sop_instance_uid: sop_instance_uid.clone(),
                elements: vec![
                    Element::text(tags::SOP_CLASS_UID, b"UI", uid::CT_IMAGE_STORAGE),
                    Element::text(tags::SOP_INSTANCE_UID, b"UI", &sop_instance_uid),
                    Element::text(tags::PATIENT_ID, b"LO", "P001"),
                ],
                remaining: self.count - n - 1,
            };
            items
                .send(item)
                .await
                .map_err(|_| DulError::ConnectionClosed("retrieve aborted".into()))?;
        }
        Ok(())
    }
}

/// Records every stored instance UID
#[derive(Default)]
struct Recorder {
    stored: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl StoreHandler for Recorder {
    async fn store(&self, request: StoreRequest) -> Status {
        let patient = request
            .elements()
            .ok()
            .and_then(|elements| find(&elements, tags::PATIENT_ID).map(|e| e.value_str()))
            .unwrap_or_default();
        self.stored
            .lock()
            .await
            .push((request.sop_instance_uid.clone(), patient));
        Status::success()
    }
}

#[tokio::test]
async fn test_get_delivers_instances_on_same_association() {
    let provider = ServiceProvider::bind(provider_config("radiant"))
        .await
        .unwrap()
        .with_get(Arc::new(CtSeries { count: 3 }));
    let addr = start(provider).await;

    let recorder = Arc::new(Recorder::default());
    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let counters = user
        .c_get(uid::STUDY_ROOT_QR_GET, &study_identifier(), recorder.clone())
        .await
        .unwrap();
    user.release().await.unwrap();

    assert_eq!(counters.completed, 3);
    assert_eq!(counters.failed, 0);
    assert_eq!(counters.remaining, 0);

    let stored = recorder.stored.lock().await;
    let uids: Vec<&str> = stored.iter().map(|(uid, _)| uid.as_str()).collect();
    assert_eq!(uids, vec!["1.2.840.99.1.1", "1.2.840.99.1.2", "1.2.840.99.1.3"]);
    assert!(stored.iter().all(|(_, patient)| patient == "P001"));
}

#[tokio::test]
async fn test_get_with_nothing_to_send() {
    let provider = ServiceProvider::bind(provider_config("radiant"))
        .await
        .unwrap()
        .with_get(Arc::new(CtSeries { count: 0 }));
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let counters = user
        .c_get(uid::PATIENT_ROOT_QR_GET, &study_identifier(), Arc::new(Recorder::default()))
        .await
        .unwrap();
    assert_eq!(counters.completed, 0);
    user.release().await.unwrap();
}

#[tokio::test]
async fn test_move_to_unknown_destination() {
    let provider = ServiceProvider::bind(provider_config("radiant"))
        .await
        .unwrap()
        .with_move(Arc::new(CtSeries { count: 1 }));
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let err = user
        .c_move(uid::STUDY_ROOT_QR_MOVE, "NOWHERE", &study_identifier())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DulError::OperationFailed {
            status: status::MOVE_DESTINATION_UNKNOWN,
            ..
        }
    ));
    user.release().await.unwrap();
}

#[tokio::test]
async fn test_move_forwards_to_destination() {
    let archive = Arc::new(Recorder::default());
    let destination = ServiceProvider::bind(provider_config("ARCHIVE"))
        .await
        .unwrap()
        .with_store(archive.clone());
    let destination_addr = start(destination).await;

    let mut config = provider_config("radiant");
    config
        .remote_aes
        .insert("ARCHIVE".to_string(), destination_addr.to_string());
    let provider = ServiceProvider::bind(config)
        .await
        .unwrap()
        .with_move(Arc::new(CtSeries { count: 2 }));
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let counters = user
        .c_move(uid::STUDY_ROOT_QR_MOVE, "ARCHIVE", &study_identifier())
        .await
        .unwrap();
    user.release().await.unwrap();

    assert_eq!(counters.completed, 2);
    assert_eq!(counters.failed, 0);
    assert_eq!(archive.stored.lock().await.len(), 2);
}

#[tokio::test]
async fn test_move_with_unreachable_destination_counts_failures() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = provider_config("radiant");
    config.remote_aes = HashMap::from([("ARCHIVE".to_string(), dead_addr.to_string())]);
    let provider = ServiceProvider::bind(config)
        .await
        .unwrap()
        .with_move(Arc::new(CtSeries { count: 2 }));
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let counters = user
        .c_move(uid::STUDY_ROOT_QR_MOVE, "ARCHIVE", &study_identifier())
        .await
        .unwrap();
    user.release().await.unwrap();

    assert_eq!(counters.completed, 0);
    assert_eq!(counters.failed, 2);
}
