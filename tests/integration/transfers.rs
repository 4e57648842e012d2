use crate::fault::*;
use crate::*;

use skiff_core::{memory_pair, MsgType, UdpTransport};

// ══════════════════════════════════════════════════════════════════════════════
//  Clean transfers
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_random_3000_bytes_over_memory() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let file = random_file(3000);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    let sent = outcome.sent.unwrap();
    let received = outcome.received.unwrap();
    assert_eq!(sent.chunks, 3);
    assert_eq!(received.chunks, 3);
    assert_eq!(received.bytes, 3000);
    assert_eq!(sent.retransmits, 0);
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test(start_paused = true)]
async fn test_exact_multiple_of_chunk_size() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let file = random_file(2048);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    assert_eq!(outcome.sent.unwrap().chunks, 2);
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test(start_paused = true)]
async fn test_empty_file() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), Bytes::new()).await;

    assert_eq!(outcome.sent.unwrap().chunks, 0);
    assert_eq!(outcome.received.unwrap().chunks, 0);
    assert_eq!(outcome.written, Some(Bytes::new()));
}

#[tokio::test(start_paused = true)]
async fn test_small_chunks_and_custom_magic() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let mut config = fast_config();
    config.protocol.magic = 0x5c;
    config.protocol.chunk_size = 100;
    let file = random_file(2950);

    let outcome = run_transfer(&s_end, &r_end, &config, file.clone()).await;

    assert_eq!(outcome.sent.unwrap().chunks, 30);
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test]
async fn test_udp_loopback_transfer() {
    let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let s_end = UdpTransport::bind(any).await.unwrap();
    let r_end = UdpTransport::bind(any).await.unwrap();
    let file = random_file(10_000);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    assert_eq!(outcome.sent.unwrap().chunks, 10);
    outcome.received.unwrap();
    assert_eq!(outcome.written, Some(file));
}

// ══════════════════════════════════════════════════════════════════════════════
//  Recovery from loss and corruption
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_lost_request_is_repeated() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let s_end = FaultyTransport::new(s_end, first_n(MsgType::SendReq, 2, Fault::Drop));
    let file = random_file(1500);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    assert_eq!(outcome.sent.unwrap().retransmits, 2);
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test(start_paused = true)]
async fn test_lost_accept_is_recovered() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let r_end = FaultyTransport::new(r_end, first_n(MsgType::SendAccept, 1, Fault::Drop));
    let file = random_file(1500);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    outcome.sent.unwrap();
    outcome.received.unwrap();
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test(start_paused = true)]
async fn test_lost_acks_cause_chunk_resend() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let r_end = FaultyTransport::new(r_end, first_n(MsgType::FilePktAck, 2, Fault::Drop));
    let file = random_file(4000);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    assert!(outcome.sent.unwrap().retransmits >= 1);
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_chunk_is_retransmitted() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let s_end = FaultyTransport::new(s_end, first_n(MsgType::FilePkt, 1, Fault::Corrupt));
    let file = random_file(2500);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    assert_eq!(outcome.sent.unwrap().retransmits, 1);
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_ack_is_retransmitted() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let r_end = FaultyTransport::new(r_end, first_n(MsgType::FilePktAck, 1, Fault::Corrupt));
    let file = random_file(2500);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    assert_eq!(outcome.sent.unwrap().retransmits, 1);
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sender_loss() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let s_end = FaultyTransport::new(s_end, every_nth(3));
    let file = random_file(8 * 1024 + 17);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    assert_eq!(outcome.sent.unwrap().chunks, 9);
    assert_eq!(outcome.written, Some(file));
}
