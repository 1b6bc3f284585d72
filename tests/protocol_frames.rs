//! Wire protocol over real sockets: the blocking codec on one end, the
//! async transport on the other.

use std::collections::{HashMap, HashSet};
use std::io::{BufReader, Write};
use std::net::TcpStream;

use kvdb::protocol::{
    self, AuthStatus, Message, ProtocolError, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN,
};
use kvdb::server::transport::{FrameReader, FrameWriter};
use tokio::net::TcpListener;

fn sample_messages() -> Vec<Message> {
    let pairs: HashMap<String, Vec<u8>> = [("a".to_string(), vec![1, 2]), ("b".to_string(), vec![])]
        .into_iter()
        .collect();
    let keys: HashSet<String> = ["a".to_string(), "zz".to_string()].into_iter().collect();

    vec![
        Message::AuthRequest {
            username: "user".to_string(),
            password: "pässword".to_string(),
        },
        Message::PutRequest {
            id: 1,
            key: "a".to_string(),
            value: vec![0, 255],
        },
        Message::GetRequest {
            id: 2,
            key: "a".to_string(),
        },
        Message::MultiPutRequest { id: 3, pairs: pairs.clone() },
        Message::MultiGetRequest { id: 4, keys },
        Message::GetWhenRequest {
            id: 5,
            key: "a".to_string(),
            key_cond: "b".to_string(),
            value_cond: vec![7],
        },
        Message::AuthResponse {
            status: AuthStatus::WrongCredentials,
        },
        Message::PutResponse { request_id: 1 },
        Message::GetResponse {
            request_id: 2,
            value: None,
        },
        Message::MultiGetResponse {
            request_id: 4,
            pairs,
        },
        Message::ErrorResponse {
            request_id: 5,
            message: "nope".to_string(),
        },
    ]
}

// =============================================================================
// Blocking Writer, Async Reader
// =============================================================================

#[tokio::test]
async fn test_blocking_frames_read_by_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let messages = sample_messages();

    let sent = messages.clone();
    let writer = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(address).unwrap();
        for message in &sent {
            protocol::write_frame(&mut stream, message).unwrap();
        }
    });

    let (socket, _) = listener.accept().await.unwrap();
    let mut reader = FrameReader::new(socket, DEFAULT_MAX_FRAME_SIZE);
    for expected in &messages {
        let received = reader.read_message().await.unwrap();
        assert_eq!(received.as_ref(), Some(expected));
    }

    writer.join().unwrap();
    assert_eq!(reader.read_message().await.unwrap(), None);
}

// =============================================================================
// Async Writer, Blocking Reader
// =============================================================================

#[tokio::test]
async fn test_transport_frames_read_by_blocking_codec() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let messages = sample_messages();

    let expected = messages.clone();
    let reader = std::thread::spawn(move || {
        let stream = TcpStream::connect(address).unwrap();
        let mut reader = BufReader::new(stream);
        for message in &expected {
            assert_eq!(
                &protocol::read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).unwrap(),
                message
            );
        }
        let end = protocol::read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(end.is_eof(), "{end:?}");
    });

    let (socket, _) = listener.accept().await.unwrap();
    let mut writer = FrameWriter::new(socket);
    for message in &messages {
        writer.write_message(message).await.unwrap();
    }
    writer.flush().await.unwrap();
    writer.shutdown().await.unwrap();

    tokio::task::spawn_blocking(move || reader.join().unwrap())
        .await
        .unwrap();
}

// =============================================================================
// Malformed Input
// =============================================================================

#[tokio::test]
async fn test_oversized_frame_is_rejected_before_reading_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let writer = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(address).unwrap();
        stream.write_all(&1_000_000u32.to_be_bytes()).unwrap();
        stream
    });

    let (socket, _) = listener.accept().await.unwrap();
    let mut reader = FrameReader::new(socket, 1024);
    let err = reader.read_message().await.unwrap_err();
    assert!(
        matches!(err, ProtocolError::FrameTooLarge { length: 1_000_000, limit: 1024 }),
        "{err:?}"
    );
    drop(writer.join().unwrap());
}

#[tokio::test]
async fn test_truncated_frame_is_an_eof_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let writer = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(address).unwrap();
        let frame = protocol::frame(&Message::PutResponse { request_id: 9 }).unwrap();
        // Header and part of the body only.
        stream.write_all(&frame[..FRAME_HEADER_LEN + 2]).unwrap();
    });

    let (socket, _) = listener.accept().await.unwrap();
    writer.join().unwrap();

    let mut reader = FrameReader::new(socket, DEFAULT_MAX_FRAME_SIZE);
    let err = reader.read_message().await.unwrap_err();
    assert!(err.is_eof(), "{err:?}");
}

#[test]
fn test_unknown_tag_in_frame() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.push(200);

    let err = protocol::read_frame(&mut bytes.as_slice(), DEFAULT_MAX_FRAME_SIZE).unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownTag { tag: 200 }), "{err:?}");
}

#[test]
fn test_zero_length_frame() {
    let bytes = 0u32.to_be_bytes();
    let err = protocol::read_frame(&mut bytes.as_slice(), DEFAULT_MAX_FRAME_SIZE).unwrap_err();
    assert!(matches!(err, ProtocolError::EmptyFrame), "{err:?}");
}
