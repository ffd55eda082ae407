mod common;

use std::time::Duration;

use anyhow::Result;
use futures_util::SinkExt;
use serde_json::json;
use tokio::{
    net::TcpSocket,
    time::{Instant, sleep},
};
use tokio_tungstenite::{client_async, tungstenite::Message};

use common::{
    READ_TIMEOUT, TestRelay, connect, expect_json, join, recv_json, send_json, send_raw, system,
};

#[tokio::test]
async fn unknown_token_is_rejected() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut client = connect(&relay.url).await?;
    send_json(&mut client, json!({"token": "token-mallory"})).await?;

    let reply = expect_json(&mut client, "waiting for auth reply").await?;
    assert_eq!(reply, json!({"type": "auth_failed", "message": "Invalid token"}));
    assert_eq!(recv_json(&mut client).await?, None);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn garbage_first_frame_is_rejected() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut client = connect(&relay.url).await?;
    send_raw(&mut client, "hello?").await?;

    let reply = expect_json(&mut client, "waiting for auth reply").await?;
    assert_eq!(reply["type"], "auth_failed");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn second_login_for_same_user_is_rejected() -> Result<()> {
    let relay = TestRelay::start().await?;
    let _alice = join(&relay.url, "alice").await?;

    let mut imposter = connect(&relay.url).await?;
    send_json(&mut imposter, json!({"token": "token-alice"})).await?;
    let reply = expect_json(&mut imposter, "waiting for duplicate reply").await?;
    assert_eq!(
        reply,
        json!({"type": "auth_failed", "message": "alice is already connected"})
    );

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn client_that_resets_during_login_does_not_hold_its_name() -> Result<()> {
    let relay = TestRelay::start().await?;

    // Linger zero turns the drop into a TCP reset, so the relay's reply to
    // the token can fail mid-handshake.
    let socket = TcpSocket::new_v4()?;
    socket.set_linger(Some(Duration::ZERO))?;
    let stream = socket.connect(relay.addr).await?;
    let (mut dropped, _response) = client_async(relay.url.as_str(), stream).await?;
    dropped
        .send(Message::text(json!({"token": "token-alice"}).to_string()))
        .await?;
    drop(dropped);

    let deadline = Instant::now() + READ_TIMEOUT;
    let _alice = loop {
        match join(&relay.url, "alice").await {
            Ok(client) => break client,
            Err(err) if Instant::now() >= deadline => {
                return Err(err.context("alice stayed locked out after a reset login"));
            }
            Err(_) => sleep(Duration::from_millis(50)).await,
        }
    };

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn clients_exchange_broadcasts_and_direct_messages() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut alice = join(&relay.url, "alice").await?;
    let mut bob = join(&relay.url, "bob").await?;
    assert_eq!(
        expect_json(&mut alice, "alice sees bob join").await?,
        system("bob joined the chat")
    );

    send_json(&mut alice, json!({"to": null, "content": "hello everyone"})).await?;
    assert_eq!(
        expect_json(&mut bob, "bob hears the broadcast").await?,
        json!({"from": "alice", "to": null, "content": "hello everyone"})
    );

    send_json(&mut bob, json!({"to": "alice", "content": "hi alice"})).await?;
    assert_eq!(
        expect_json(&mut alice, "alice gets the dm").await?,
        json!({"from": "bob", "to": "alice", "content": "hi alice"})
    );

    // The relay never echoes a sender's own messages, so the next thing bob
    // sees is the bounce for an offline recipient.
    send_json(&mut bob, json!({"to": "charlie", "content": "you there?"})).await?;
    assert_eq!(
        expect_json(&mut bob, "bob gets offline notice").await?,
        json!({"from": "SYSTEM", "to": "bob", "content": "User 'charlie' not found or offline"})
    );

    send_raw(&mut bob, "{not json").await?;
    let invalid = expect_json(&mut bob, "bob gets format notice").await?;
    assert_eq!(invalid["from"], "SYSTEM");
    assert_eq!(invalid["to"], "bob");
    assert!(
        invalid["content"]
            .as_str()
            .unwrap_or_default()
            .starts_with("Invalid message format:")
    );

    alice.close(None).await?;
    assert_eq!(
        expect_json(&mut bob, "bob sees alice leave").await?,
        system("alice left the chat")
    );

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_notifies_connected_clients() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = join(&relay.url, "alice").await?;

    relay.stop().await;

    assert_eq!(
        expect_json(&mut alice, "alice sees shutdown").await?,
        system("relay shutting down")
    );
    assert_eq!(recv_json(&mut alice).await?, None);
    Ok(())
}
