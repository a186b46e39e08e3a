use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use pingcore::wire::message::EchoKind;
use pingcore::{ChannelTransport, IcmpMessage, IcmpStack, OutboundPacket, PingStats};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    stderrlog::new()
        .verbosity(args.verbose as usize + 1)
        .init()
        .context("failed to initialize logging")?;

    let config = args.to_config();
    let (transport, rx) = ChannelTransport::new();
    let stack = IcmpStack::new(transport, config);

    // Play the remote peer: reflect echo requests after a fixed latency
    tokio::spawn(reflect_loop(
        Arc::clone(&stack),
        rx,
        Duration::from_millis(args.latency),
        args.drop_every,
    ));

    let stats = if args.continuous {
        stack
            .ping_start(args.target)
            .with_context(|| format!("failed to start pinging {}", args.target))?;
        eprintln!("pinging {} until Ctrl-C...", args.target);
        tokio::signal::ctrl_c().await.ok();
        stack
            .ping_stop()
            .await
            .context("failed to stop continuous ping")?;
        stack.ping_get_stats()
    } else {
        stack
            .ping(
                args.target,
                args.count,
                args.timeout_duration().as_millis() as u64,
            )
            .await
            .with_context(|| format!("ping {} failed", args.target))?
    };

    debug!("stack counters: {}", stack.counters());
    report(&stats, args.json)
}

/// Simulated far end of the link: every captured echo request comes back as
/// an echo reply after `latency`, except every `drop_every`th packet.
async fn reflect_loop(
    stack: Arc<IcmpStack>,
    mut rx: UnboundedReceiver<OutboundPacket>,
    latency: Duration,
    drop_every: u64,
) {
    let mut seen: u64 = 0;
    while let Some(pkt) = rx.recv().await {
        seen += 1;
        if drop_every != 0 && seen % drop_every == 0 {
            debug!("link dropped packet {} to {}", seen, pkt.dst);
            continue;
        }

        let Ok(IcmpMessage::Echo {
            kind: EchoKind::Request,
            identifier,
            sequence,
            payload,
        }) = IcmpMessage::decode(&pkt.bytes)
        else {
            continue;
        };
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
}

fn report(stats: &PingStats, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(stats).context("failed to serialize statistics")?
        );
    } else {
        println!("{}", stats);
    }
    Ok(())
}
