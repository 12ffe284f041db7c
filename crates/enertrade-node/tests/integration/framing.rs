//! Stream framing against a live seller: split and coalesced writes,
//! frame errors, idle timeouts.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use enertrade_node::Endpoint;
use enertrade_protocol::{MessageCodec, MessageType, WireMessage};
use rust_decimal_macros::dec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

use crate::harness::{bid, query, TestSeller, TestSellerBuilder};

async fn raw_socket(seller: &TestSeller) -> TcpStream {
    match &seller.endpoint {
        Endpoint::Tcp(addr) => TcpStream::connect(addr.as_str()).await.unwrap(),
        other => panic!("expected tcp endpoint, got {other}"),
    }
}

fn encode(msg: WireMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    MessageCodec::lenient().encode(msg, &mut buf).unwrap();
    buf
}

/// Read until one whole reply decodes.
async fn read_reply(socket: &mut TcpStream) -> WireMessage {
    let mut codec = MessageCodec::lenient();
    let mut buf = BytesMut::new();
    loop {
        if let Some(msg) = codec.decode(&mut buf).unwrap() {
            return msg;
        }
        let n = tokio::time::timeout(Duration::from_secs(5), socket.read_buf(&mut buf))
            .await
            .expect("reply timed out")
            .unwrap();
        assert!(n > 0, "seller closed the connection");
    }
}

#[tokio::test]
async fn test_frame_split_across_writes() {
    let seller = TestSellerBuilder::new().build().await.unwrap();
    let mut socket = raw_socket(&seller).await;
    socket.set_nodelay(true).unwrap();

    let frame = encode(query(20));
    for chunk in frame.chunks(3) {
        socket.write_all(chunk).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let reply = read_reply(&mut socket).await;
    assert_eq!(reply.message_type, MessageType::QueryResponse);
    assert_eq!(reply.percentage_for_sale, dec!(50));

    seller.shutdown().await;
}

#[tokio::test]
async fn test_coalesced_frames_each_answered() {
    let seller = TestSellerBuilder::new().build().await.unwrap();
    let mut socket = raw_socket(&seller).await;

    let mut burst = encode(query(20));
    burst.unsplit(encode(bid(20, dec!(12))));
    burst.unsplit(encode(bid(20, dec!(15))));
    socket.write_all(&burst).await.unwrap();

    let mut codec = MessageCodec::lenient();
    let mut buf = BytesMut::new();
    let mut replies = Vec::new();
    while replies.len() < 3 {
        if let Some(msg) = codec.decode(&mut buf).unwrap() {
            replies.push(msg.message_type);
            continue;
        }
        let n = tokio::time::timeout(Duration::from_secs(5), socket.read_buf(&mut buf))
            .await
            .expect("reply timed out")
            .unwrap();
        assert!(n > 0, "seller closed the connection");
    }

    assert_eq!(
        replies,
        vec![
            MessageType::QueryResponse,
            MessageType::BidRejected,
            MessageType::BidAccepted
        ]
    );

    seller.shutdown().await;
}

/// A frame with the wrong field count ends that connection only.
#[tokio::test]
async fn test_bad_frame_does_not_affect_other_connections() {
    let seller = TestSellerBuilder::new().build().await.unwrap();
    let mut healthy = seller.connect().await.unwrap();

    let mut bad = raw_socket(&seller).await;
    let text = b"3 1 20 0 15.00";
    let mut frame = BytesMut::new();
    frame.put_u32(text.len() as u32);
    frame.extend_from_slice(text);
    bad.write_all(&frame).await.unwrap();

    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), bad.read_to_end(&mut rest))
        .await
        .expect("seller did not close the bad connection")
        .unwrap_or(0);
    assert_eq!(n, 0);

    healthy.send(query(21)).await.unwrap();
    let reply = healthy.expect().await.unwrap();
    assert_eq!(reply.message_type, MessageType::QueryResponse);
    assert_eq!(seller.state().await.highest_bid(), dec!(0));

    // The listener still accepts new sessions
    let mut fresh = seller.connect().await.unwrap();
    fresh.send(query(22)).await.unwrap();
    assert_eq!(
        fresh.expect().await.unwrap().message_type,
        MessageType::QueryResponse
    );

    seller.shutdown().await;
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    let seller = TestSellerBuilder::new()
        .read_timeout(Duration::from_millis(200))
        .build()
        .await
        .unwrap();
    let mut idle = raw_socket(&seller).await;

    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), idle.read_to_end(&mut rest))
        .await
        .expect("seller kept the idle connection open")
        .unwrap_or(0);
    assert_eq!(n, 0);

    seller.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let seller = TestSellerBuilder::new().build().await.unwrap();
    let endpoint = seller.endpoint.clone();
    seller.shutdown().await;

    let result = enertrade_node::transport::connect(&endpoint).await;
    assert!(result.is_err(), "listener should be closed after shutdown");
}
