//! Device session and streaming bridge behavior against a mock transport.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use laserctl::bridge::{self, StreamUpdate};
use laserctl::serial::command::Opcode;
use laserctl::serial::mock::MockTransport;
use laserctl::session::{
    ConnectTarget, DeviceSession, PowerConfig, PulseUpdate, SessionOptions,
};
use laserctl::LaserError;

fn session_with_mock(exchange_timeout: Duration) -> (Arc<DeviceSession>, MockTransport) {
    let transport = MockTransport::new();
    let handle = transport.clone();
    let options = SessionOptions {
        exchange_timeout,
        device_dir: PathBuf::from("/dev/serial/by-id"),
    };
    (
        Arc::new(DeviceSession::new(Box::new(transport), options)),
        handle,
    )
}

#[tokio::test]
async fn mutating_operation_before_connect_fails_not_open() {
    let (session, _mock) = session_with_mock(Duration::from_millis(200));

    let err = session.set_power(true).await.unwrap_err();
    assert!(matches!(err, LaserError::NotOpen));
    assert_eq!(session.engine().pending_len(), 0);
}

#[tokio::test]
async fn connect_is_idempotent_for_same_device_only() {
    let (session, _mock) = session_with_mock(Duration::from_millis(200));

    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();
    // repeating the same device is a no-op
    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();
    // a different device while open is refused
    let err = session
        .connect(ConnectTarget::Path("/dev/ttyMOCK1".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, LaserError::AlreadyOpen(_)));
}

#[tokio::test]
async fn connect_then_disconnect_clears_state_and_notifies() {
    let (session, mock) = session_with_mock(Duration::from_millis(200));
    let mut status = session.status_topic().subscribe();

    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();
    let connected = status.recv().await.unwrap();
    assert!(connected.connected);
    assert_eq!(connected.device.unwrap().path, "/dev/ttyMOCK0");
    assert!(!connected.trigger_armed);

    mock.push_reply(Opcode::ArmTrigger, [0x40]);
    session.set_trigger_arm(true).await.unwrap();
    assert!(status.recv().await.unwrap().trigger_armed);
    assert!(session.trigger_armed());

    mock.push_reply(Opcode::SetPower, [0x30]);
    session.set_power(true).await.unwrap();
    let powered = status.recv().await.unwrap();
    assert_eq!(powered.power, Some(PowerConfig { master_power: true }));

    session.disconnect().await.unwrap();
    let cleared = status.recv().await.unwrap();
    assert!(!cleared.connected);
    assert!(!cleared.trigger_armed);
    assert_eq!(cleared.power, None);
    assert_eq!(cleared.pulse, None);
    assert_eq!(cleared.device, None);

    // disconnecting again is a no-op
    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn device_version_decodes_hardware_and_firmware_bytes() {
    let (session, mock) = session_with_mock(Duration::from_millis(200));
    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();

    mock.push_reply(Opcode::Version, [0x20, 2, 7]);
    let version = session.device_version().await.unwrap();
    assert_eq!(version.hardware, 2);
    assert_eq!(version.firmware, 7);
}

#[tokio::test]
async fn get_power_reads_and_caches_the_device_value() {
    let (session, mock) = session_with_mock(Duration::from_millis(200));
    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();

    mock.push_reply(Opcode::GetPower, [0x31, 0x01]);
    let power = session.get_power().await.unwrap();
    assert!(power.master_power);
    assert_eq!(
        session.snapshot().power,
        Some(PowerConfig { master_power: true })
    );
}

#[tokio::test]
async fn pulse_writes_follow_fixed_order_and_commit_last() {
    let (session, mock) = session_with_mock(Duration::from_millis(200));
    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();
    let mut parameters = session.parameter_topic().subscribe();

    mock.push_reply(Opcode::SetExposure, [0x44]);
    mock.push_reply(Opcode::SetFilter, [0x42]);
    mock.push_reply(Opcode::SetDelay, [0x46]);
    mock.push_reply(Opcode::Commit, [0x50]);

    session
        .set_pulse_parameters(PulseUpdate {
            exposure: Some(720),
            filter: Some(2),
            delay: Some(10),
            polarity: None,
            commit: true,
        })
        .await
        .unwrap();

    let writes = mock.written();
    assert_eq!(
        writes,
        vec![
            (0x44, vec![0xD0, 0x02]),
            (0x42, vec![0x02, 0x00]),
            (0x46, vec![0x0A, 0x00]),
            (0x50, vec![]),
        ]
    );

    let event = parameters.recv().await.unwrap();
    let pulse = event.pulse.unwrap();
    assert_eq!(pulse.exposure, Some(720));
    assert_eq!(pulse.filter, Some(2));
    assert_eq!(pulse.delay, Some(10));
    assert_eq!(pulse.polarity, None);
}

#[tokio::test]
async fn pulse_write_aborts_on_first_timeout() {
    let (session, mock) = session_with_mock(Duration::from_millis(100));
    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();

    // exposure is acknowledged, the filter reply never arrives
    mock.push_reply(Opcode::SetExposure, [0x44]);

    let err = session
        .set_pulse_parameters(PulseUpdate {
            exposure: Some(720),
            filter: Some(2),
            delay: Some(10),
            polarity: None,
            commit: true,
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LaserError::DeadlineExceeded {
            command: "set-filter"
        }
    ));

    // delay and commit were never issued
    let writes = mock.written();
    assert_eq!(
        writes,
        vec![(0x44, vec![0xD0, 0x02]), (0x42, vec![0x02, 0x00])]
    );
    // the cache was not updated by the aborted operation
    assert_eq!(session.snapshot().pulse, None);
}

#[tokio::test]
async fn get_pulse_parameters_assembles_all_fields() {
    let (session, mock) = session_with_mock(Duration::from_millis(200));
    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();

    mock.push_reply(Opcode::GetExposure, [0x45, 0xD0, 0x02]);
    mock.push_reply(Opcode::GetFilter, [0x43, 0x02, 0x00]);
    mock.push_reply(Opcode::GetDelay, [0x47, 0x0A, 0x00]);
    mock.push_reply(Opcode::GetPolarity, [0x49, 0x01]);

    let pulse = session.get_pulse_parameters().await.unwrap();
    assert_eq!(pulse.exposure, Some(720));
    assert_eq!(pulse.filter, Some(2));
    assert_eq!(pulse.delay, Some(10));
    assert_eq!(pulse.polarity, Some(true));
    assert_eq!(session.snapshot().pulse, Some(pulse));
}

#[tokio::test]
async fn reset_sends_opcode_then_tears_down() {
    let (session, mock) = session_with_mock(Duration::from_millis(200));
    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();

    mock.push_reply(Opcode::Reset, [0x35]);
    session.reset().await.unwrap();

    assert!(!session.snapshot().connected);
    assert!(mock.written().contains(&(0x35, vec![])));
}

#[tokio::test]
async fn bridge_streams_snapshots_and_applies_updates() {
    let (session, mock) = session_with_mock(Duration::from_millis(200));
    session
        .connect(ConnectTarget::Path("/dev/ttyMOCK0".into()))
        .await
        .unwrap();

    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
    let bridge = tokio::spawn(bridge::run(
        session.clone(),
        ReceiverStream::new(inbound_rx),
        outbound_tx,
    ));

    // the current snapshot arrives before any change
    let initial = outbound_rx.recv().await.unwrap();
    assert!(initial.connected);

    // a session-side change is relayed outward
    mock.push_reply(Opcode::SetPower, [0x30]);
    session.set_power(true).await.unwrap();
    let powered = outbound_rx.recv().await.unwrap();
    assert_eq!(powered.power, Some(PowerConfig { master_power: true }));

    // an inbound pulse update is applied with commit forced on
    mock.push_reply(Opcode::SetExposure, [0x44]);
    mock.push_reply(Opcode::Commit, [0x50]);
    inbound_tx
        .send(StreamUpdate {
            power: None,
            pulse: Some(PulseUpdate {
                exposure: Some(100),
                ..Default::default()
            }),
        })
        .await
        .unwrap();

    let updated = outbound_rx.recv().await.unwrap();
    assert_eq!(updated.pulse.unwrap().exposure, Some(100));
    assert!(mock.written().iter().any(|(opcode, _)| *opcode == 0x50));

    // peer closing its inbound stream ends the bridge cleanly
    drop(inbound_tx);
    bridge.await.unwrap().unwrap();

    // both topic subscriptions were released
    assert_eq!(session.status_topic().subscriber_count(), 0);
    assert_eq!(session.parameter_topic().subscriber_count(), 0);
}
