use quartzdb_rust_sdk::types::MapValue;
use quartzdb_rust_sdk::GetRequest;
use quartzdb_rust_sdk::Handle;
use quartzdb_rust_sdk::QuartzErrorCode;
use quartzdb_rust_sdk::ServiceMode;
use quartzdb_rust_sdk::SystemRequest;
use quartzdb_rust_sdk::TableUsageRequest;
use std::time::Duration;

async fn cloudsim_handle() -> Handle {
    Handle::builder()
        .endpoint("http://localhost:8080")
        .unwrap()
        .mode(ServiceMode::CloudSim)
        .unwrap()
        .timeout(Duration::from_secs(5))
        .unwrap()
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_builder_requires_endpoint() {
    let res = Handle::builder().build().await;
    assert!(res.is_err());
    assert_eq!(res.unwrap_err().code, QuartzErrorCode::IllegalArgument);
}

#[tokio::test]
async fn test_builder_validation() {
    assert!(Handle::builder().endpoint("").is_err());
    assert!(Handle::builder().timeout(Duration::ZERO).is_err());
    assert!(Handle::builder().rate_limiter_percent(0.0).is_err());
    assert!(Handle::builder().rate_limiter_percent(150.0).is_err());
    assert!(Handle::builder().rate_limiter_percent(25.0).is_ok());
    assert!(Handle::builder().max_memory_mb(0).is_err());
    assert!(Handle::builder().store_auth("", "pw").is_err());
}

#[tokio::test]
async fn test_closed_handle_rejects_requests() {
    let handle = cloudsim_handle().await;
    handle.close().await;
    let res = GetRequest::new("t")
        .key(MapValue::new().i32("id", 1))
        .execute(&handle)
        .await;
    assert!(res.is_err());
    assert_eq!(res.unwrap_err().code, QuartzErrorCode::IllegalState);
}

#[tokio::test]
async fn test_request_validation_precedes_network() {
    let handle = cloudsim_handle().await;
    // empty table name fails synchronously
    let res = GetRequest::new("").execute(&handle).await;
    assert_eq!(res.unwrap_err().code, QuartzErrorCode::IllegalArgument);
    // missing key fails synchronously
    let res = GetRequest::new("users").execute(&handle).await;
    assert_eq!(res.unwrap_err().code, QuartzErrorCode::IllegalArgument);
}

#[tokio::test]
async fn test_service_mode_gating() {
    // admin DDL is on-premise only
    let handle = cloudsim_handle().await;
    let res = SystemRequest::new("CREATE NAMESPACE ns1").execute(&handle).await;
    assert_eq!(
        res.unwrap_err().code,
        QuartzErrorCode::OperationNotSupported
    );

    // usage reports are cloud only
    let handle = Handle::builder()
        .endpoint("http://localhost:8080")
        .unwrap()
        .mode(ServiceMode::KVStore)
        .unwrap()
        .build()
        .await
        .unwrap();
    let res = TableUsageRequest::new("users").execute(&handle).await;
    assert_eq!(
        res.unwrap_err().code,
        QuartzErrorCode::OperationNotSupported
    );
}
