//! Flow-controlled stream transfers between two connected instances.

use netron_protocol::{Netron, NetronConfig, NetronError, Peer};
use std::sync::Arc;
use std::time::Duration;

fn small_buffer_config() -> NetronConfig {
    NetronConfig::default_with_overrides(|c| c.stream_high_water_mark = 1024)
}

async fn pair(server: &Netron, client: &Netron) -> (Arc<Peer>, Arc<Peer>) {
    netron_protocol::utils::logging::setup_default_logging();
    let (a, b) = tokio::io::duplex(256 * 1024);
    let (server_peer, client_peer) = tokio::join!(server.accept(a), client.connect(b));
    (server_peer.unwrap(), client_peer.unwrap())
}

#[tokio::test]
async fn transfer_arrives_intact_and_in_order() {
    let server = Netron::new(NetronConfig::default());
    let client = Netron::new(NetronConfig::default());
    let (sp, cp) = pair(&server, &client).await;

    let writer = cp.open_stream().await.unwrap();
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();

    let send = {
        let payload = payload.clone();
        async move {
            for chunk in payload.chunks(4096) {
                writer.write(chunk.to_vec()).await.unwrap();
            }
            writer.end().unwrap();
        }
    };

    let receive = async move {
        let mut reader = sp.next_stream().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = reader.read().await {
            collected.extend_from_slice(&chunk);
        }
        collected
    };

    let ((), collected) = tokio::join!(send, receive);
    assert_eq!(collected, payload);
}

#[tokio::test]
async fn slow_reader_pauses_the_writer() {
    let server = Netron::new(small_buffer_config());
    let client = Netron::new(small_buffer_config());
    let (sp, cp) = pair(&server, &client).await;

    let writer = cp.open_stream().await.unwrap();
    let total_chunks = 16usize;

    let reader_task = tokio::spawn(async move {
        let mut reader = sp.next_stream().await.unwrap();
        let mut bytes = 0usize;
        while let Some(chunk) = reader.read().await {
            bytes += chunk.len();
            // Consume slower than the writer produces
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bytes
    });

    for _ in 0..total_chunks {
        writer.write(vec![0xAB; 4096]).await.unwrap();
    }
    writer.end().unwrap();

    let received = reader_task.await.unwrap();
    assert_eq!(received, total_chunks * 4096);
    // Each 4 KB chunk overshoots the 1 KB mark, so backpressure must have
    // kicked in at least once
    assert!(writer.times_paused() >= 1, "writer was never paused");
}

#[tokio::test]
async fn writes_after_end_fail() {
    let server = Netron::new(NetronConfig::default());
    let client = Netron::new(NetronConfig::default());
    let (_sp, cp) = pair(&server, &client).await;

    let writer = cp.open_stream().await.unwrap();
    writer.end().unwrap();
    let err = writer.write(vec![1, 2, 3]).await.unwrap_err();
    assert!(matches!(err, NetronError::IllegalState(_)));
}

#[tokio::test]
async fn concurrent_streams_do_not_interleave_data() {
    let server = Netron::new(NetronConfig::default());
    let client = Netron::new(NetronConfig::default());
    let (sp, cp) = pair(&server, &client).await;

    let w1 = cp.open_stream().await.unwrap();
    let w2 = cp.open_stream().await.unwrap();
    assert_ne!(w1.stream_id(), w2.stream_id());

    w1.write(vec![1u8; 100]).await.unwrap();
    w2.write(vec![2u8; 100]).await.unwrap();
    w1.end().unwrap();
    w2.end().unwrap();

    let mut r1 = sp.next_stream().await.unwrap();
    let mut r2 = sp.next_stream().await.unwrap();
    assert_eq!(r1.stream_id(), w1.stream_id());
    assert_eq!(r2.stream_id(), w2.stream_id());

    let mut b1 = Vec::new();
    while let Some(chunk) = r1.read().await {
        b1.extend_from_slice(&chunk);
    }
    let mut b2 = Vec::new();
    while let Some(chunk) = r2.read().await {
        b2.extend_from_slice(&chunk);
    }
    assert_eq!(b1, vec![1u8; 100]);
    assert_eq!(b2, vec![2u8; 100]);
}

#[tokio::test]
async fn streams_flow_in_both_directions() {
    let server = Netron::new(NetronConfig::default());
    let client = Netron::new(NetronConfig::default());
    let (sp, cp) = pair(&server, &client).await;

    let to_server = cp.open_stream().await.unwrap();
    let to_client = sp.open_stream().await.unwrap();

    to_server.write(b"up".to_vec()).await.unwrap();
    to_server.end().unwrap();
    to_client.write(b"down".to_vec()).await.unwrap();
    to_client.end().unwrap();

    let mut server_rx = sp.next_stream().await.unwrap();
    let mut client_rx = cp.next_stream().await.unwrap();
    assert_eq!(&server_rx.read().await.unwrap()[..], b"up");
    assert_eq!(&client_rx.read().await.unwrap()[..], b"down");
    assert!(server_rx.read().await.is_none());
    assert!(client_rx.read().await.is_none());
}
