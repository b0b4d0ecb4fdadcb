//! Association-level integration tests over loopback TCP
//!
//! A provider and a service user from this crate talk to each other on an
//! ephemeral port.

use async_trait::async_trait;
use dicompot::config::{ProviderConfig, UserConfig};
use dicompot::error::{DulError, Result};
use dicompot::io::{QueryHandler, QueryRequest, ServiceProvider, ServiceUser};
use dicompot::protocol::dataset::{find, tags, Element};
use dicompot::protocol::dimse::status;
use dicompot::protocol::uid;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

fn provider_config() -> ProviderConfig {
    ProviderConfig {
        listen_address: "127.0.0.1:0".to_string(),
        ..ProviderConfig::default()
    }
}

fn user_config(addr: SocketAddr, called_ae: &str) -> UserConfig {
    UserConfig {
        remote_address: addr.to_string(),
        called_ae_title: called_ae.to_string(),
        calling_ae_title: "SCANNER".to_string(),
        artim_timeout_ms: 2000,
        ..UserConfig::default()
    }
}

async fn start(provider: ServiceProvider) -> SocketAddr {
    let addr = provider.local_addr().unwrap();
    tokio::spawn(async move { provider.run().await });
    addr
}

/// Answers every query with two fixed patients and remembers the queries
struct TwoPatients {
    seen: Mutex<Vec<QueryRequest>>,
}

#[async_trait]
impl QueryHandler for TwoPatients {
    async fn find(&self, request: QueryRequest, matches: mpsc::Sender<Vec<Element>>) -> Result<()> {
        self.seen.lock().await.push(request);
        for (name, id) in [("DOE^JANE", "P001"), ("ROE^RICHARD", "P002")] {
            let identifier = vec![
                Element::text(tags::PATIENT_NAME, b"PN", name),
                Element::text(tags::PATIENT_ID, b"LO", id),
            ];
            matches
                .send(identifier)
                .await
                .map_err(|_| DulError::ConnectionClosed("find aborted".into()))?;
        }
        Ok(())
    }
}

struct BrokenArchive;

#[async_trait]
impl QueryHandler for BrokenArchive {
    async fn find(&self, _request: QueryRequest, _matches: mpsc::Sender<Vec<Element>>) -> Result<()> {
        Err(DulError::InvalidDataSet("archive offline".into()))
    }
}

#[tokio::test]
async fn test_echo_and_release() {
    let provider = ServiceProvider::bind(provider_config()).await.unwrap().with_echo();
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let accepted = user.contexts().lookup_by_abstract_syntax(uid::VERIFICATION).unwrap();
    assert_eq!(accepted.transfer_syntax_uid, uid::EXPLICIT_VR_LITTLE_ENDIAN);

    user.c_echo().await.unwrap();
    user.c_echo().await.unwrap();
    user.release().await.unwrap();
}

#[tokio::test]
async fn test_find_streams_matches() {
    let archive = Arc::new(TwoPatients {
        seen: Mutex::new(Vec::new()),
    });
    let provider = ServiceProvider::bind(provider_config())
        .await
        .unwrap()
        .with_find(archive.clone());
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let query = vec![
        Element::text(tags::QUERY_RETRIEVE_LEVEL, b"CS", "PATIENT"),
        Element::text(tags::PATIENT_NAME, b"PN", "*"),
    ];
    let matches = user.c_find(uid::PATIENT_ROOT_QR_FIND, &query).await.unwrap();
    user.release().await.unwrap();

    assert_eq!(matches.len(), 2);
    let names: Vec<String> = matches
        .iter()
        .map(|m| find(m, tags::PATIENT_NAME).unwrap().value_str())
        .collect();
    assert_eq!(names, vec!["DOE^JANE", "ROE^RICHARD"]);

    let seen = archive.seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].sop_class_uid, uid::PATIENT_ROOT_QR_FIND);
    assert_eq!(
        find(&seen[0].elements, tags::QUERY_RETRIEVE_LEVEL).unwrap().value_str(),
        "PATIENT"
    );
    assert!(seen[0].connection.peer_addr.is_some());
}

#[tokio::test]
async fn test_find_callback_failure_is_reported() {
    let provider = ServiceProvider::bind(provider_config())
        .await
        .unwrap()
        .with_find(Arc::new(BrokenArchive));
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let err = user
        .c_find(uid::STUDY_ROOT_QR_FIND, &[Element::text(tags::PATIENT_ID, b"LO", "X")])
        .await
        .unwrap_err();
    match err {
        DulError::OperationFailed { status: code, comment } => {
            assert_eq!(code, status::UNABLE_TO_PROCESS);
            assert!(comment.contains("archive offline"));
        }
        other => panic!("unexpected error: {}", other),
    }

    // The association survives a failed operation
    let again = user.c_find(uid::STUDY_ROOT_QR_FIND, &[]).await.unwrap_err();
    assert!(matches!(again, DulError::OperationFailed { .. }));
    user.release().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_store_is_unrecognized() {
    let provider = ServiceProvider::bind(provider_config()).await.unwrap().with_echo();
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let err = user
        .c_store(
            uid::CT_IMAGE_STORAGE,
            "1.2.3.4.5",
            &[Element::text(tags::PATIENT_ID, b"LO", "P001")],
        )
        .await
        .unwrap_err();
    match err {
        DulError::OperationFailed { status: code, comment } => {
            assert_eq!(code, status::UNRECOGNIZED_OPERATION);
            assert!(comment.contains("No callback found"));
        }
        other => panic!("unexpected error: {}", other),
    }
    user.c_echo().await.unwrap();
    user.release().await.unwrap();
}

#[tokio::test]
async fn test_called_ae_enforcement() {
    let config = ProviderConfig {
        ae_title: "PACS".to_string(),
        enforce_ae_title: true,
        reject_delay_ms: 50,
        ..provider_config()
    };
    let provider = ServiceProvider::bind(config).await.unwrap().with_echo();
    let addr = start(provider).await;

    let err = ServiceUser::connect(&user_config(addr, "WRONG")).await.err().unwrap();
    assert!(matches!(
        err,
        DulError::AssociationRejected {
            result: 1,
            reject_source: 1,
            reason: 7
        }
    ));

    let user = ServiceUser::connect(&user_config(addr, "PACS")).await.unwrap();
    user.c_echo().await.unwrap();
    user.release().await.unwrap();
}

#[tokio::test]
async fn test_acceptance_filter_rejects_context() {
    let config = ProviderConfig {
        accepted_abstract_syntaxes: vec![uid::VERIFICATION.to_string()],
        ..provider_config()
    };
    let provider = ServiceProvider::bind(config)
        .await
        .unwrap()
        .with_echo()
        .with_find(Arc::new(BrokenArchive));
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    let err = user.c_find(uid::PATIENT_ROOT_QR_FIND, &[]).await.unwrap_err();
    assert!(matches!(err, DulError::ContextRejected { .. }));
    assert!(!err.is_fatal());

    user.c_echo().await.unwrap();
    user.release().await.unwrap();
}

#[tokio::test]
async fn test_abort_ends_association() {
    let provider = ServiceProvider::bind(provider_config()).await.unwrap().with_echo();
    let addr = start(provider).await;

    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    user.c_echo().await.unwrap();
    user.abort().await.unwrap();

    // The provider keeps serving new associations
    let user = ServiceUser::connect(&user_config(addr, "radiant")).await.unwrap();
    user.c_echo().await.unwrap();
    user.release().await.unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = ServiceUser::connect(&user_config(addr, "radiant")).await.err().unwrap();
    assert!(matches!(err, DulError::Aborted(_) | DulError::ConnectionClosed(_)));
}
