//! Deadline and disconnect behavior: handshake timeouts, request timeouts
//! and in-flight rejection on connection loss.

use netron_protocol::{
    CallResult, CapabilityDescriptor, Context, Netron, NetronConfig, NetronError, Peer, PeerStatus,
    Result, Value,
};
use std::sync::Arc;
use std::time::Duration;

struct Sluggish {
    delay: Duration,
}

impl Context for Sluggish {
    fn call(&self, method: &str, _args: Vec<Value>) -> Result<CallResult> {
        match method {
            "slow" => {
                // Simulates a handler stuck in a long computation
                std::thread::sleep(self.delay);
                Ok(Value::Str("done".into()).into())
            }
            other => Err(NetronError::NotExists(format!("method '{other}'"))),
        }
    }
}

fn sluggish_caps() -> CapabilityDescriptor {
    CapabilityDescriptor::new().method("slow")
}

async fn pair(server: &Netron, client: &Netron) -> (Arc<Peer>, Arc<Peer>) {
    netron_protocol::utils::logging::setup_default_logging();
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (server_peer, client_peer) = tokio::join!(server.accept(a), client.connect(b));
    (server_peer.unwrap(), client_peer.unwrap())
}

#[tokio::test]
async fn connect_times_out_against_a_silent_remote() {
    let client = Netron::new(NetronConfig::default_with_overrides(|c| {
        c.handshake_timeout = Duration::from_millis(200);
    }));

    let (a, b) = tokio::io::duplex(1024);
    let _keep_open = b;
    let err = client.connect(a).await.unwrap_err();
    assert!(matches!(err, NetronError::Timeout));
    assert_eq!(client.peer_count(), 0);
}

#[tokio::test]
async fn accept_times_out_without_a_hello() {
    let server = Netron::new(NetronConfig::default_with_overrides(|c| {
        c.handshake_timeout = Duration::from_millis(200);
    }));

    let (a, b) = tokio::io::duplex(1024);
    let _keep_open = b;
    let err = server.accept(a).await.unwrap_err();
    assert!(matches!(err, NetronError::Timeout));
    assert_eq!(server.peer_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_handler_trips_the_response_deadline() {
    let server = Netron::new(NetronConfig::default());
    server
        .attach_context(
            "sluggish",
            Sluggish {
                delay: Duration::from_millis(500),
            },
            sluggish_caps(),
        )
        .unwrap();
    let client = Netron::new(NetronConfig::default_with_overrides(|c| {
        c.response_timeout = Duration::from_millis(100);
    }));
    let (_sp, cp) = pair(&server, &client).await;

    let iface = cp.interface("sluggish").unwrap();
    let err = iface.call("slow", vec![]).await.unwrap_err();
    assert!(matches!(err, NetronError::Timeout));

    // The late response must not poison the next request
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(cp.is_online());
    cp.ping().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnect_rejects_in_flight_requests() {
    let server = Netron::new(NetronConfig::default());
    server
        .attach_context(
            "sluggish",
            Sluggish {
                delay: Duration::from_millis(500),
            },
            sluggish_caps(),
        )
        .unwrap();
    let client = Netron::new(NetronConfig::default());
    let (_sp, cp) = pair(&server, &client).await;

    let iface = cp.interface("sluggish").unwrap();
    let inflight = tokio::spawn(async move { iface.call("slow", vec![]).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.disconnect_peer(&cp);

    let err = inflight.await.unwrap().unwrap_err();
    assert!(matches!(err, NetronError::ConnectionLost));
    assert_eq!(client.peer_count(), 0);
    assert_eq!(cp.status(), PeerStatus::Offline);
}

#[tokio::test]
async fn remote_disconnect_takes_the_peer_offline() {
    let server = Netron::new(NetronConfig::default());
    server
        .attach_context(
            "sluggish",
            Sluggish {
                delay: Duration::ZERO,
            },
            sluggish_caps(),
        )
        .unwrap();
    let client = Netron::new(NetronConfig::default());
    let (sp, cp) = pair(&server, &client).await;

    server.disconnect_peer(&sp);

    // Connection teardown propagates through the transport
    for _ in 0..100 {
        if cp.status() == PeerStatus::Offline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cp.status(), PeerStatus::Offline);
    assert_eq!(client.peer_count(), 0);

    let iface = cp.interface("sluggish").unwrap();
    let err = iface.call("slow", vec![]).await.unwrap_err();
    assert!(matches!(err, NetronError::ConnectionLost));
}
