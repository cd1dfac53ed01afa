mod support;

use std::sync::Arc;

use signon_client::{AuthService, SignonError};
use support::MockDaemon;

#[tokio::test]
async fn lists_methods_and_mechanisms() {
    let daemon = MockDaemon::new();
    let service = daemon.service();

    assert_eq!(service.query_methods().await.expect("methods"), vec!["password", "ssotest"]);
    assert_eq!(
        service.query_mechanisms("ssotest").await.expect("mechanisms"),
        vec!["mech1", "mech2", "mech3"]
    );
}

#[tokio::test]
async fn unknown_method_is_reported() {
    let daemon = MockDaemon::new();
    let err = daemon
        .service()
        .query_mechanisms("kerberos")
        .await
        .expect_err("unknown");
    assert_eq!(
        err,
        SignonError::MethodNotKnown {
            method: "kerberos".to_owned()
        }
    );
}

#[test]
fn default_instance_is_shared_per_thread() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let (first, second) = runtime.block_on(async {
        (AuthService::get().expect("first"), AuthService::get().expect("second"))
    });
    assert!(Arc::ptr_eq(&first, &second));

    let other = std::thread::spawn(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async { AuthService::get().expect("other thread") })
    })
    .join()
    .expect("thread");
    assert!(!Arc::ptr_eq(&first, &other));
}

#[test]
fn default_instance_is_recreated_after_release() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let first = AuthService::get().expect("first");
        let watcher = Arc::downgrade(&first);
        drop(first);
        assert!(watcher.upgrade().is_none());

        let second = AuthService::get().expect("second");
        assert_eq!(second.config().service_name, "com.google.code.AccountsSSO.SingleSignOn");
    });
}
