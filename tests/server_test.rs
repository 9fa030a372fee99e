//! Integration tests for the calibration HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use breath_monitor::calibration::{Calibration, PressureTransform};
    use breath_monitor::core::{SharedState, ENGINEERING_UNLOCK_CODE};
    use breath_monitor::protocol::CalibrationProtocol;
    use breath_monitor::server::{run, ServerConfig};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn start() -> (Arc<SharedState>, SocketAddr, oneshot::Sender<()>) {
        let shared = SharedState::in_memory();
        shared.calibration().set_calibration(Calibration {
            zero_offset: 2000,
            trigger_level: -160,
            exhalation_detect_level: 80,
        });
        let protocol = CalibrationProtocol::new(shared.clone(), PressureTransform::default());

        // Create server with random port
        let (addr, shutdown_tx) = run(ServerConfig::new(0), protocol)
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        (shared, addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_, addr, shutdown_tx) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_calibration_read_and_update() {
        let (shared, addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .get(format!("http://{}/calibration", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["zero_offset"], 2000);
        assert_eq!(body["trigger_level_pa"], -10.0);
        assert_eq!(body["exhalation_level_pa"], 5.0);

        let body: serde_json::Value = client
            .post(format!("http://{}/calibration/trigger", addr))
            .json(&serde_json::json!({ "pascals": -2.5 }))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["old"], -10.0);
        assert_eq!(body["new"], -2.5);

        let body: serde_json::Value = client
            .post(format!("http://{}/calibration/exhalation", addr))
            .json(&serde_json::json!({ "pascals": 1.0 }))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["old"], 5.0);
        assert_eq!(body["new"], 1.0);

        let cal = shared.calibration().get_calibration();
        assert_eq!(cal.trigger_level, -40);
        assert_eq!(cal.exhalation_detect_level, 16);
        assert_eq!(cal.zero_offset, 2000);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_zero_and_pressure_without_readings() {
        let (_, addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .get(format!("http://{}/pressure", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["pascals"], 0.0);

        // Nothing filtered yet, so zeroing keeps the offset
        let body: serde_json::Value = client
            .post(format!("http://{}/calibration/zero", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["old"], 2000);
        assert_eq!(body["new"], 2000);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_override_requires_unlock_code() {
        let (shared, addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .post(format!("http://{}/override", addr))
            .json(&serde_json::json!({ "unlock": 1234, "period_ms": 2000 }))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["period_ms"], 0);

        let body: serde_json::Value = client
            .post(format!("http://{}/override", addr))
            .json(&serde_json::json!({
                "unlock": ENGINEERING_UNLOCK_CODE,
                "period_ms": 2000
            }))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["period_ms"], 2000);
        assert_eq!(shared.engineering().active_period(), Some(2000));

        let body: serde_json::Value = client
            .get(format!("http://{}/override", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["period_ms"], 2000);

        // A zero period cancels without the unlock code
        let body: serde_json::Value = client
            .post(format!("http://{}/override", addr))
            .json(&serde_json::json!({ "unlock": 0, "period_ms": 0 }))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(body["period_ms"], 0);
        assert_eq!(shared.engineering().active_period(), None);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_console_endpoint() {
        let (_, addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/console", addr))
            .json(&serde_json::json!({ "args": ["showcal"] }))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        let output = body["output"].as_str().expect("missing output");
        assert!(output.contains("Breath Calibration"));
        assert!(output.contains("Zero Offset (counts):     2000"));

        let response = client
            .post(format!("http://{}/console", addr))
            .json(&serde_json::json!({ "args": ["settrigger"] }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status().as_u16(), 400);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "INVALID_COMMAND");

        let _ = shutdown_tx.send(());
    }
}
