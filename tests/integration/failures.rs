use crate::fault::*;
use crate::*;

use skiff_core::wire::{FilePkt, SendReq};
use skiff_core::{memory_pair, Codec, Failure, Message, MsgType, PeerAddr};

// ══════════════════════════════════════════════════════════════════════════════
//  Hostile or broken peers
// ══════════════════════════════════════════════════════════════════════════════

/// Datagrams from any address but the configured sender never reach the
/// session, even when they are well-formed and arrive first.
#[tokio::test(start_paused = true)]
async fn test_foreign_sender_is_ignored() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let stranger: SocketAddr = "10.66.0.1:7100".parse().unwrap();
    let codec = Codec::default();

    let decoy = random_file(1024);
    let forged_req = Message::SendReq(SendReq::for_file(stranger.into(), 1, &decoy));
    let forged_chunk = Message::FilePkt(FilePkt {
        chunk_no: 0,
        data: decoy,
    });
    r_end.inject(stranger, codec.encode(&forged_req).unwrap());
    r_end.inject(stranger, codec.encode(&forged_chunk).unwrap());
    r_end.inject(sender_addr(), Bytes::from_static(b"\x1a\x09garbage"));

    let file = random_file(2500);
    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    outcome.sent.unwrap();
    outcome.received.unwrap();
    assert_eq!(outcome.written, Some(file));
}

#[tokio::test(start_paused = true)]
async fn test_silent_receiver_times_out() {
    let (s_end, _r_end) = memory_pair(sender_addr(), receiver_addr());
    let config = fast_config();

    let err = send_file(
        &s_end,
        &config,
        sender_addr().into(),
        receiver_addr(),
        random_file(100),
        |_| {},
    )
    .await
    .unwrap_err();

    assert!(err.is_timeout(), "got {err}");
    assert!(matches!(
        err,
        TransferError::Failed(Failure::Timeout { attempts: 4 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_absent_sender_times_out_receiver() {
    let (_s_end, r_end) = memory_pair(sender_addr(), receiver_addr());

    let err = receive_file(&r_end, &fast_config(), sender_addr(), |_| Ok(()), |_| {})
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "got {err}");
}

/// A SendReq whose whole-file digest was altered in flight: every chunk
/// verifies individually, but the reassembled file does not match. The
/// receiver writes nothing and the sender, never seeing EOF, times out.
#[tokio::test(start_paused = true)]
async fn test_tampered_request_digest_aborts_receiver() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let s_end = FaultyTransport::new(s_end, always(MsgType::SendReq, Fault::Corrupt));

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), random_file(3000)).await;

    let received = outcome.received.unwrap_err();
    assert!(received.is_integrity_mismatch(), "got {received}");
    assert!(outcome.written.is_none());
    assert!(outcome.sent.unwrap_err().is_timeout());
}

/// The receiver does not linger after sending EOF, so a lost EOF leaves the
/// sender to time out even though the file arrived intact.
#[tokio::test(start_paused = true)]
async fn test_lost_eof_fails_sender_only() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let r_end = FaultyTransport::new(r_end, always(MsgType::EofPkt, Fault::Drop));
    let file = random_file(1500);

    let outcome = run_transfer(&s_end, &r_end, &fast_config(), file.clone()).await;

    outcome.received.unwrap();
    assert_eq!(outcome.written, Some(file));
    assert!(outcome.sent.unwrap_err().is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_magic_mismatch_never_connects() {
    let (s_end, r_end) = memory_pair(sender_addr(), receiver_addr());
    let sender_config = fast_config();
    let mut receiver_config = fast_config();
    receiver_config.protocol.magic = 0x2b;

    let (sent, received) = tokio::join!(
        send_file(
            &s_end,
            &sender_config,
            PeerAddr::from(sender_addr()),
            receiver_addr(),
            random_file(10),
            |_| {}
        ),
        receive_file(&r_end, &receiver_config, sender_addr(), |_| Ok(()), |_| {}),
    );

    assert!(sent.unwrap_err().is_timeout());
    assert!(received.unwrap_err().is_timeout());
}
