//! Integration tests for the send→deliver→statistics pipeline.
//!
//! These tests drive the full stack over the channel transport, playing the
//! IP layer and the remote peer in-process, without real network access.
//! Time is paused, so timeout and interval behavior is deterministic.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use pingcore::wire::message::{
    EchoKind, ErrorKind, CODE_HOST_UNREACHABLE, ICMP_PROTOCOL, IP_HEADER_LEN,
};
use pingcore::{ChannelTransport, IcmpError, IcmpMessage, IcmpStack, OutboundPacket, PingConfig};

const TARGET: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

/// Play the remote peer: reflect every echo request as an echo reply after
/// `latency`, except the sequences listed in `drop_seqs`.
fn spawn_reflector(
    stack: &Arc<IcmpStack>,
    mut rx: UnboundedReceiver<OutboundPacket>,
    latency: Duration,
    drop_seqs: &[u16],
) {
    let drop_seqs = drop_seqs.to_vec();
    let stack = Arc::clone(stack);
    tokio::spawn(async move {
        while let Some(pkt) = rx.recv().await {
            let Ok(IcmpMessage::Echo {
                kind: EchoKind::Request,
                identifier,
                sequence,
                payload,
            }) = IcmpMessage::decode(&pkt.bytes)
            else {
                continue;
            };
            if drop_seqs.contains(&sequence) {
                continue;
            }
            let reply = IcmpMessage::Echo {
                kind: EchoKind::Reply,
                identifier,
                sequence,
                payload,
            }
            .encode_vec();
            let stack = Arc::clone(&stack);
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                stack.deliver(pkt.dst, &reply);
            });
        }
    });
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_ping_all_replies() {
    let (transport, rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());
    spawn_reflector(&stack, rx, Duration::from_millis(50), &[]);

    let stats = stack.ping(TARGET, 4, 1000).await.unwrap();

    assert_eq!(stats.sent, 4);
    assert_eq!(stats.received, 4);
    assert_eq!(stats.lost, 0);
    assert_eq!(stats.errors, 0);
    assert!(!stats.active);

    let min = stats.rtt_min.unwrap();
    assert!(min >= Duration::from_millis(50));
    assert!(min <= stats.rtt_avg);
    assert!(stats.rtt_avg <= stats.rtt_max);
    assert!(stats.rtt_max < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_ping_with_one_lost_reply() {
    let (transport, rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());
    // Third request never comes back
    spawn_reflector(&stack, rx, Duration::from_millis(50), &[2]);

    let stats = stack.ping(TARGET, 4, 1000).await.unwrap();

    assert_eq!(stats.sent, 4);
    assert_eq!(stats.received, 3);
    assert_eq!(stats.lost, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.lost + stats.received + stats.errors, stats.sent);
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_ping_defaults() {
    let (transport, rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());
    spawn_reflector(&stack, rx, Duration::from_millis(10), &[]);

    // count 0 and timeout_ms 0 fall back to 4 probes and 1000 ms
    let stats = stack.ping(TARGET, 0, 0).await.unwrap();
    assert_eq!(stats.sent, 4);
    assert_eq!(stats.received, 4);
}

#[tokio::test(start_paused = true)]
async fn test_ping_rejects_bad_destination() {
    let (transport, _rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());

    assert_eq!(
        stack.ping(Ipv4Addr::UNSPECIFIED, 1, 100).await.unwrap_err(),
        IcmpError::InvalidArgument
    );
    assert_eq!(
        stack.ping(Ipv4Addr::BROADCAST, 1, 100).await.unwrap_err(),
        IcmpError::InvalidArgument
    );
}

#[tokio::test(start_paused = true)]
async fn test_ping_surfaces_send_failure() {
    let (transport, rx) = ChannelTransport::new();
    // IP layer gone: every send fails
    drop(rx);
    let stack = IcmpStack::new(transport, PingConfig::default());

    match stack.ping(TARGET, 2, 100).await {
        Err(IcmpError::Send(_)) => {}
        other => panic!("expected send failure, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_error_reply_counts_as_error_not_loss() {
    let (transport, mut rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());

    // Router answers the first request with host-unreachable quoting it
    {
        let stack = Arc::clone(&stack);
        tokio::spawn(async move {
            while let Some(pkt) = rx.recv().await {
                let mut quoted_header = vec![0u8; IP_HEADER_LEN];
                quoted_header[0] = 0x45;
                quoted_header[9] = ICMP_PROTOCOL;
                quoted_header[16..20].copy_from_slice(&pkt.dst.octets());
                let quoted_payload = pkt.bytes[..8.min(pkt.bytes.len())].to_vec();

                let error = IcmpMessage::Error {
                    kind: ErrorKind::DestUnreachable(CODE_HOST_UNREACHABLE),
                    original_header: quoted_header,
                    original_payload: quoted_payload,
                }
                .encode_vec();
                let stack = Arc::clone(&stack);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    stack.deliver(Ipv4Addr::new(192, 0, 2, 1), &error);
                });
            }
        });
    }

    let stats = stack.ping(TARGET, 2, 1000).await.unwrap();

    assert_eq!(stats.sent, 2);
    assert_eq!(stats.received, 0);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.lost, 0);
    assert_eq!(stats.lost + stats.received + stats.errors, stats.sent);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_session_lifecycle() {
    let (transport, rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());
    spawn_reflector(&stack, rx, Duration::from_millis(20), &[]);

    assert!(!stack.ping_is_active());
    stack.ping_start(TARGET).unwrap();
    assert!(stack.ping_is_active());

    // Second start without an intervening stop is refused
    assert_eq!(stack.ping_start(TARGET).unwrap_err(), IcmpError::Busy);
    assert!(stack.ping_is_active());

    // Let a few send intervals elapse
    tokio::time::sleep(Duration::from_millis(3100)).await;

    stack.ping_stop().await.unwrap();
    assert!(!stack.ping_is_active());

    let stats = stack.ping_get_stats();
    assert_eq!(stats.destination, TARGET);
    assert!(stats.sent >= 3);
    assert!(stats.received > 0);
    assert_eq!(stats.lost + stats.received + stats.errors, stats.sent);
    assert!(!stats.active);
    assert!(stats.ended_at.is_some());

    // The last snapshot stays readable after stop
    let again = stack.ping_get_stats();
    assert_eq!(again.sent, stats.sent);
    assert_eq!(again.received, stats.received);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_losses_counted_on_stop() {
    let (transport, rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());
    // Nothing ever answers
    spawn_reflector(&stack, rx, Duration::from_millis(20), &(0..64).collect::<Vec<u16>>());

    stack.ping_start(TARGET).unwrap();
    tokio::time::sleep(Duration::from_millis(2600)).await;
    stack.ping_stop().await.unwrap();

    let stats = stack.ping_get_stats();
    assert!(stats.sent >= 2);
    assert_eq!(stats.received, 0);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.lost, stats.sent);
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_start_is_an_error() {
    let (transport, _rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());

    assert_eq!(stack.ping_stop().await.unwrap_err(), IcmpError::InvalidArgument);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_resets_statistics() {
    let (transport, rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());
    spawn_reflector(&stack, rx, Duration::from_millis(20), &[]);

    stack.ping_start(TARGET).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    stack.ping_stop().await.unwrap();
    let first = stack.ping_get_stats();
    assert!(first.sent > 0);

    let other = Ipv4Addr::new(10, 0, 0, 2);
    stack.ping_start(other).unwrap();
    let fresh = stack.ping_get_stats();
    assert_eq!(fresh.destination, other);
    assert_eq!(fresh.sent, 0);
    assert!(fresh.active);
    stack.ping_stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_during_continuous_session() {
    let (transport, rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, PingConfig::default());
    spawn_reflector(&stack, rx, Duration::from_millis(10), &[]);

    stack.ping_start(TARGET).unwrap();

    // A one-shot to a different host shares the table without disturbing
    // the running session
    let stats = stack
        .ping(Ipv4Addr::new(10, 0, 0, 2), 2, 500)
        .await
        .unwrap();
    assert_eq!(stats.received, 2);

    assert!(stack.ping_is_active());
    stack.ping_stop().await.unwrap();

    let session = stack.ping_get_stats();
    assert_eq!(session.destination, TARGET);
    assert_eq!(session.lost + session.received + session.errors, session.sent);
}
