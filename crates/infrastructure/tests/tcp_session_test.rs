use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use unwind_dns_infrastructure::frontend::tcp::{spawn_session, TcpEvent};

mod helpers;
use helpers::build_query;

async fn session_fixture() -> (TcpStream, mpsc::Receiver<TcpEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (stream, from) = listener.accept().await.unwrap();

    let (tx, rx) = mpsc::channel(8);
    spawn_session(7, stream, from, tx);
    (client, rx)
}

#[tokio::test]
async fn test_framed_request_and_response() {
    let (mut client, mut rx) = session_fixture().await;

    let query = build_query(0x0101, 0x0100, "example.com.", 1, 1);
    client
        .write_all(&(query.len() as u16).to_be_bytes())
        .await
        .unwrap();
    client.write_all(&query).await.unwrap();

    let reply = match rx.recv().await.unwrap() {
        TcpEvent::Request {
            conn, wire, reply, ..
        } => {
            assert_eq!(conn, 7);
            assert_eq!(wire, query);
            reply
        }
        other => panic!("expected request, got {:?}", other),
    };

    let answer = vec![0xaa; 33];
    reply.send(answer.clone()).unwrap();

    let mut len_buf = [0u8; 2];
    client.read_exact(&mut len_buf).await.unwrap();
    let len = u16::from_be_bytes(len_buf) as usize;
    assert_eq!(len, answer.len());

    let mut body = vec![0u8; len];
    client.read_exact(&mut body).await.unwrap();
    assert_eq!(body, answer);

    // Exactly 2 + L bytes total: the stream ends after the answer.
    let n = client.read(&mut len_buf).await.unwrap();
    assert_eq!(n, 0);

    match rx.recv().await.unwrap() {
        TcpEvent::Closed { conn } => assert_eq!(conn, 7),
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test]
async fn test_split_writes_are_reassembled() {
    let (mut client, mut rx) = session_fixture().await;

    let query = build_query(0x0202, 0x0100, "example.org.", 28, 1);
    let mut framed = (query.len() as u16).to_be_bytes().to_vec();
    framed.extend_from_slice(&query);

    // Length prefix and body dribble in three writes.
    client.write_all(&framed[..1]).await.unwrap();
    client.flush().await.unwrap();
    tokio::task::yield_now().await;
    client.write_all(&framed[1..5]).await.unwrap();
    client.flush().await.unwrap();
    tokio::task::yield_now().await;
    client.write_all(&framed[5..]).await.unwrap();

    match rx.recv().await.unwrap() {
        TcpEvent::Request { wire, .. } => assert_eq!(wire, query),
        other => panic!("expected request, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dropping_reply_closes_connection() {
    let (mut client, mut rx) = session_fixture().await;

    let query = build_query(0x0303, 0x0100, "ads.example.", 1, 1);
    client
        .write_all(&(query.len() as u16).to_be_bytes())
        .await
        .unwrap();
    client.write_all(&query).await.unwrap();

    match rx.recv().await.unwrap() {
        TcpEvent::Request { reply, .. } => drop(reply),
        other => panic!("expected request, got {:?}", other),
    }

    match rx.recv().await.unwrap() {
        TcpEvent::Closed { conn } => assert_eq!(conn, 7),
        other => panic!("expected close, got {:?}", other),
    }

    // No answer: the connection just closes.
    let mut buf = [0u8; 2];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_peer_close_before_body_releases() {
    let (mut client, mut rx) = session_fixture().await;

    // Promise 32 bytes, deliver none.
    client.write_all(&[0x00, 0x20]).await.unwrap();
    drop(client);

    match rx.recv().await.unwrap() {
        TcpEvent::Closed { conn } => assert_eq!(conn, 7),
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_releases_connection() {
    let (mut client, mut rx) = session_fixture().await;

    // Length prefix only; the body never comes.
    client.write_all(&[0x00, 0x20]).await.unwrap();

    // Nothing happens before the deadline...
    tokio::select! {
        event = rx.recv() => panic!("premature event: {:?}", event),
        _ = tokio::time::sleep(Duration::from_secs(14)) => {}
    }

    // ...and the 15 second mark releases the connection.
    tokio::time::sleep(Duration::from_secs(2)).await;
    match rx.recv().await.unwrap() {
        TcpEvent::Closed { conn } => assert_eq!(conn, 7),
        other => panic!("expected close, got {:?}", other),
    }

    let mut buf = [0u8; 2];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_zero_length_frame_reaches_event_loop() {
    let (_client, mut rx) = session_fixture().await;

    _client.writable().await.unwrap();
    _client.try_write(&[0x00, 0x00]).unwrap();

    match rx.recv().await.unwrap() {
        TcpEvent::Request { wire, reply, .. } => {
            assert!(wire.is_empty());
            // The screening pipeline drops it; the session closes.
            drop(reply);
        }
        other => panic!("expected request, got {:?}", other),
    }

    match rx.recv().await.unwrap() {
        TcpEvent::Closed { .. } => {}
        other => panic!("expected close, got {:?}", other),
    }
}
