//! Full socket-based integration tests for client <-> server communication.

use std::path::PathBuf;
use std::time::Duration;

use engine_client::input::InputSample;
use engine_client::GameClient;
use engine_server::server::bind_ephemeral;
use engine_shared::conn_fsm::ConnState;
use engine_shared::wire::{decode_datagram, encode_datagram, Message};

/// Unit-style test: the wire codec roundtrips its own framing.
#[test]
fn handshake_message_roundtrips_through_the_wire_codec() -> anyhow::Result<()> {
    let header = engine_shared::wire::Header {
        version: engine_shared::wire::PROTOCOL_VERSION,
        flags: 0,
        peer_seq: 0,
        peer_ack: 0,
        ack_bits: 0,
    };
    let messages = vec![Message::Handshake { client_capability_flags: 7 }];
    let bytes = encode_datagram(&header, &messages)?;
    let (decoded_header, decoded_messages) = decode_datagram(&bytes)?;
    assert_eq!(decoded_header, header);
    assert_eq!(decoded_messages, messages);
    Ok(())
}

/// Full integration: spawn server, connect client, run the handshake/auth
/// flow and exchange input/snapshots for a handful of ticks.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_roundtrip() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    let (mut server, cfg) = bind_ephemeral(64).await?;

    let server_handle = tokio::spawn(async move {
        for _ in 0..40 {
            server.step(1.0 / 64.0).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<_, anyhow::Error>(())
    });

    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut client = GameClient::new(cfg.clone(), PathBuf::from("maps")).await?;
    client.connect().await?;

    let mut got_snapshot = false;
    for _ in 0..40 {
        client.tick(InputSample { forward: 1.0, ..Default::default() }).await?;
        if client.predicted_state().is_some() {
            got_snapshot = true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    server_handle.await??;

    assert_eq!(client.state(), ConnState::Connected);
    assert!(got_snapshot, "expected the client to authenticate and predict a local player");

    Ok(())
}

/// Two clients joining the same server each get their own entity and can see
/// each other through interpolation once snapshots start flowing.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_see_each_other_in_interpolation_buffer() -> anyhow::Result<()> {
    let (mut server, cfg) = bind_ephemeral(64).await?;

    let server_handle = tokio::spawn(async move {
        for _ in 0..60 {
            server.step(1.0 / 64.0).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<_, anyhow::Error>(())
    });

    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut client_a = GameClient::new(cfg.clone(), PathBuf::from("maps")).await?;
    let mut client_b = GameClient::new(cfg.clone(), PathBuf::from("maps")).await?;
    client_a.connect().await?;
    client_b.connect().await?;

    for _ in 0..60 {
        client_a.tick(InputSample::default()).await?;
        client_b.tick(InputSample::default()).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    server_handle.await??;

    assert_eq!(client_a.state(), ConnState::Connected);
    assert_eq!(client_b.state(), ConnState::Connected);
    assert!(client_a.interpolation_buffer().tracked_entities().count() >= 1);
    assert!(client_b.interpolation_buffer().tracked_entities().count() >= 1);

    Ok(())
}
