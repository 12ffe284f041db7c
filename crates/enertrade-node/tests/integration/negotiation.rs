//! End-to-end negotiation scenarios over real TCP sockets.

use std::time::Duration;

use enertrade_market::{AbandonReason, AcceptancePolicy, SessionOutcome};
use enertrade_protocol::{MessageType, WireMessage};
use rust_decimal_macros::dec;

use crate::harness::{bid, confirmation, query, TestSellerBuilder};

/// Seller 13.5 kWh / 50% / reserve 14.0, buyer ceiling 18.5: the buyer
/// climbs past the reserve, gets accepted, confirms, inventory drops.
#[tokio::test]
async fn test_scenario_deal_closed() {
    let seller = TestSellerBuilder::new().build().await.unwrap();

    let mut buyer = seller.buyer(20, dec!(18.5), 1);
    let outcome = buyer.negotiate(&seller.endpoint).await.unwrap();

    let trade = match outcome {
        SessionOutcome::Confirmed(trade) => trade,
        other => panic!("expected a deal, got {other:?}"),
    };
    assert!(trade.price >= dec!(14.0), "price {} below reserve", trade.price);
    assert!(trade.price <= dec!(18.5), "price {} above ceiling", trade.price);
    assert_eq!(trade.seller_id, 50);
    assert_eq!(trade.percentage, dec!(50));
    assert_eq!(trade.quantity_kwh, dec!(6.75));

    seller
        .wait_percentage(dec!(0), Duration::from_secs(5))
        .await
        .unwrap();
    let state = seller.state().await;
    assert_eq!(state.highest_bid(), trade.price);
    assert_eq!(state.highest_bidder_id(), 20);

    seller.shutdown().await;
}

/// Nothing for sale: the buyer stops after the query without bidding.
#[tokio::test]
async fn test_scenario_nothing_for_sale() {
    let seller = TestSellerBuilder::new()
        .percentage_for_sale(dec!(0))
        .build()
        .await
        .unwrap();

    let mut buyer = seller.buyer(20, dec!(18.5), 2);
    let outcome = buyer.negotiate(&seller.endpoint).await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Abandoned(AbandonReason::NothingForSale)
    );

    let state = seller.state().await;
    assert_eq!(state.highest_bid(), dec!(0));
    assert_eq!(state.highest_bidder_id(), 0);

    seller.shutdown().await;
}

/// Ceiling below reserve: every bid is rejected until the next increment
/// would pass the ceiling; seller state is untouched.
#[tokio::test]
async fn test_scenario_ceiling_below_reserve() {
    let seller = TestSellerBuilder::new().build().await.unwrap();

    let mut buyer = seller.buyer(20, dec!(10), 3);
    let outcome = buyer.negotiate(&seller.endpoint).await.unwrap();
    match outcome {
        SessionOutcome::Abandoned(AbandonReason::CeilingReached {
            last_offer,
            ceiling,
        }) => {
            assert_eq!(ceiling, dec!(10));
            assert!(last_offer <= dec!(10));
        }
        other => panic!("expected ceiling abandon, got {other:?}"),
    }

    let state = seller.state().await;
    assert_eq!(state.percentage_for_sale(), dec!(50));
    assert_eq!(state.highest_bid(), dec!(0));

    seller.shutdown().await;
}

#[tokio::test]
async fn test_query_response_fields() {
    let seller = TestSellerBuilder::new().build().await.unwrap();
    let mut conn = seller.connect().await.unwrap();

    conn.send(query(20)).await.unwrap();
    let reply = conn.expect().await.unwrap();
    assert_eq!(reply.message_type, MessageType::QueryResponse);
    assert_eq!(reply.device_id, 50);
    assert_eq!(reply.percentage_for_sale, dec!(50));
    assert_eq!(reply.energy_total, dec!(13.5));

    seller.shutdown().await;
}

#[tokio::test]
async fn test_reject_then_accept_on_one_connection() {
    let seller = TestSellerBuilder::new().build().await.unwrap();
    let mut conn = seller.connect().await.unwrap();

    conn.send(bid(21, dec!(13.99))).await.unwrap();
    let reply = conn.expect().await.unwrap();
    assert_eq!(reply.message_type, MessageType::BidRejected);
    assert_eq!(reply.bid_price, dec!(13.99));
    assert_eq!(seller.state().await.highest_bid(), dec!(0));

    conn.send(bid(21, dec!(14))).await.unwrap();
    let reply = conn.expect().await.unwrap();
    assert_eq!(reply.message_type, MessageType::BidAccepted);
    assert_eq!(reply.device_id, 21);
    assert_eq!(reply.bid_price, dec!(14));
    assert_eq!(reply.percentage_for_sale, dec!(50));

    let state = seller.state().await;
    assert_eq!(state.highest_bid(), dec!(14));
    assert_eq!(state.highest_bidder_id(), 21);

    seller.shutdown().await;
}

#[tokio::test]
async fn test_confirmations_floor_at_zero() {
    let seller = TestSellerBuilder::new().build().await.unwrap();
    let mut conn = seller.connect().await.unwrap();

    conn.send(confirmation(21, dec!(20))).await.unwrap();
    seller
        .wait_percentage(dec!(30), Duration::from_secs(5))
        .await
        .unwrap();

    conn.send(confirmation(21, dec!(45))).await.unwrap();
    seller
        .wait_percentage(dec!(0), Duration::from_secs(5))
        .await
        .unwrap();

    // A sentinel confirmation is refused, not added back
    let mut conn = seller.connect().await.unwrap();
    conn.send(confirmation(21, dec!(-1))).await.unwrap();
    conn.send(query(21)).await.unwrap();
    let reply = conn.expect().await.unwrap();
    assert_eq!(reply.percentage_for_sale, dec!(0));

    seller.shutdown().await;
}

/// Register and unknown types are dropped; the connection keeps serving.
#[tokio::test]
async fn test_unexpected_messages_keep_connection_open() {
    let seller = TestSellerBuilder::new().build().await.unwrap();
    let mut conn = seller.connect().await.unwrap();

    conn.send(WireMessage::new(MessageType::Register, 10_003, 21))
        .await
        .unwrap();
    conn.send(WireMessage::new(MessageType::Unknown(42), 10_004, 21))
        .await
        .unwrap();
    conn.send(WireMessage::new(MessageType::BidAccepted, 10_005, 21))
        .await
        .unwrap();
    conn.send(query(21)).await.unwrap();

    let reply = conn.expect().await.unwrap();
    assert_eq!(reply.message_type, MessageType::QueryResponse);

    seller.shutdown().await;
}

#[tokio::test]
async fn test_outbid_policy_rejects_lower_late_bid() {
    let seller = TestSellerBuilder::new()
        .policy(AcceptancePolicy::OutbidHighest)
        .build()
        .await
        .unwrap();

    let mut first = seller.connect().await.unwrap();
    first.send(bid(21, dec!(17))).await.unwrap();
    assert_eq!(
        first.expect().await.unwrap().message_type,
        MessageType::BidAccepted
    );

    let mut second = seller.connect().await.unwrap();
    second.send(bid(22, dec!(15))).await.unwrap();
    assert_eq!(
        second.expect().await.unwrap().message_type,
        MessageType::BidRejected
    );

    let state = seller.state().await;
    assert_eq!(state.highest_bid(), dec!(17));
    assert_eq!(state.highest_bidder_id(), 21);

    seller.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_session_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seller.sock");
    let seller = TestSellerBuilder::new()
        .endpoint(enertrade_node::Endpoint::Unix(path))
        .build()
        .await
        .unwrap();

    let mut buyer = seller.buyer(20, dec!(18.5), 4);
    let outcome = buyer.negotiate(&seller.endpoint).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Confirmed(_)));
    seller
        .wait_percentage(dec!(0), Duration::from_secs(5))
        .await
        .unwrap();

    seller.shutdown().await;
}
