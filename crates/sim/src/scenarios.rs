//! Simulation scenarios running one gateway and several terminals over the satellite channel

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use colored::Colorize;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};
use satdama_core::{DamaMessage, FmtId, FmtTable, TerminalFmtRegistry, TerminalId, BROADCAST_TERMINAL_ID, NO_FMT};
use satdama_link::{
    DamaAgent, DamaController, ForwardScheduler, Packet, PacketQueue, QueueAccess, TerminalCategory,
};
use tokio::time::{interval, timeout_at, Instant};

use crate::network::{ChannelNode, SatelliteChannel};
use crate::{SimulationConfig, GATEWAY_ID};

#[derive(Debug, Clone, Default)]
pub struct TerminalReport {
    pub terminal_id: TerminalId,
    pub requests_sent: u64,
    pub bursts_sent: u64,
    pub packets_sent: u64,
    pub offered_bytes: u64,
    pub sent_bytes: u64,
    pub backlog_bytes: u64,
    /// MODCOD of the last allocation before logoff.
    pub last_fmt: FmtId,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayReport {
    pub requests_received: u64,
    pub rbdc_granted_kbps: u64,
    pub vbdc_granted_kb: u64,
    pub fca_granted_kbps: u64,
    pub forward_frames: u64,
    pub forward_bytes: u64,
    pub forward_dropped: u64,
    pub logged_on_at_end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub terminals: Vec<TerminalReport>,
    pub gateway: GatewayReport,
    pub messages_sent: u64,
    pub messages_delivered: u64,
}

impl SimulationReport {
    pub fn sent_bytes(&self) -> u64 {
        self.terminals.iter().map(|t| t.sent_bytes).sum()
    }

    pub fn backlog_bytes(&self) -> u64 {
        self.terminals.iter().map(|t| t.backlog_bytes).sum()
    }
}

fn terminal_ids(count: u16) -> Vec<TerminalId> {
    (1..)
        .filter(|id| *id != BROADCAST_TERMINAL_ID)
        .take(count as usize)
        .collect()
}

/// Packet arrivals per frame for a mean rate in kb/s.
fn arrivals(rate_kbps: f64, frame_ms: u32, packet_bytes: usize) -> Result<Poisson<f64>> {
    let lambda = rate_kbps * frame_ms as f64 / (packet_bytes.max(1) * 8) as f64;
    Poisson::new(lambda.max(f64::MIN_POSITIVE)).map_err(|e| anyhow!("invalid traffic rate {}: {}", rate_kbps, e))
}

pub async fn run(config: SimulationConfig) -> Result<SimulationReport> {
    info!(
        "Simulating {} terminals for {} superframes, {:?} propagation delay",
        config.terminals, config.superframes, config.propagation_delay
    );
    let table = Arc::new(config.dama.fmt_table()?);
    let registry = TerminalFmtRegistry::new();
    let controller = DamaController::new(1, config.dama.clone(), table.clone(), registry.clone())?;
    let channel = SatelliteChannel::new(config.propagation_delay);
    let gateway_node = channel.join(GATEWAY_ID).await;

    let ids = terminal_ids(config.terminals);
    let mut handles = Vec::new();
    for (index, terminal_id) in ids.iter().enumerate() {
        let node = channel.join(*terminal_id).await;
        let seed = config.seed.wrapping_add(index as u64 + 1);
        handles.push(tokio::spawn(run_terminal(
            *terminal_id,
            node,
            config.clone(),
            table.clone(),
            seed,
        )));
    }
    let gateway = tokio::spawn(run_gateway(gateway_node, controller, config.clone(), table, registry, ids));

    let mut terminals = Vec::new();
    for handle in handles {
        terminals.push(handle.await??);
    }
    let gateway = gateway.await??;
    let (messages_sent, messages_delivered, _, _, _) = channel.get_stats().await;

    Ok(SimulationReport {
        terminals,
        gateway,
        messages_sent,
        messages_delivered,
    })
}

async fn run_terminal(
    terminal_id: TerminalId,
    mut node: ChannelNode,
    config: SimulationConfig,
    table: Arc<FmtTable>,
    seed: u64,
) -> Result<TerminalReport> {
    let traffic = &config.traffic;
    let mut agent = DamaAgent::new(
        terminal_id,
        &config.dama,
        table,
        traffic.cra_kbps,
        traffic.max_rbdc_kbps,
        traffic.max_vbdc_kb,
    )?;
    agent.add_queue(PacketQueue::new("EF", 0, QueueAccess::Rbdc, 10_000));
    agent.add_queue(PacketQueue::new("BE", 1, QueueAccess::Vbdc, 10_000));

    let mut rng = StdRng::seed_from_u64(seed);
    let arrivals = arrivals(traffic.mean_rate_kbps, config.dama.frame_duration_ms, traffic.packet_bytes)?;
    let cni = Normal::new(config.link.mean_cni_db, config.link.cni_std_db)
        .map_err(|e| anyhow!("invalid link conditions: {}", e))?;
    let mut ticker = interval(Duration::from_millis(config.dama.frame_duration_ms as u64));
    let mut report = TerminalReport {
        terminal_id,
        ..TerminalReport::default()
    };

    node.send(&DamaMessage::LogonRequest(agent.logon_request()), GATEWAY_ID)
        .await?;

    for superframe in 1..=config.superframes {
        ticker.tick().await;
        while let Some((_, message)) = node.try_recv() {
            match message {
                DamaMessage::LogonResponse(response) => {
                    agent.on_logon_response(&response);
                }
                DamaMessage::TimePlan(plan) => {
                    agent.on_time_plan(&plan);
                }
                other => debug!("ST{}: unexpected {} ignored", terminal_id, other.name()),
            }
        }

        let count = arrivals.sample(&mut rng) as u64;
        for _ in 0..count {
            let access = if rng.random::<f64>() < traffic.vbdc_share {
                QueueAccess::Vbdc
            } else {
                QueueAccess::Rbdc
            };
            let packet = Packet::new(terminal_id, GATEWAY_ID, vec![0u8; traffic.packet_bytes]);
            if agent.enqueue(access, packet, superframe as u64) {
                report.offered_bytes += traffic.packet_bytes as u64;
            }
        }

        if !agent.is_logged_on() {
            continue;
        }
        agent.on_start_of_frame(superframe)?;
        agent.set_cni(cni.sample(&mut rng));
        if let Some(request) = agent.build_request()? {
            node.send(&DamaMessage::CapacityRequest(request.to_sac()), GATEWAY_ID)
                .await?;
        }
        let outcome = agent.schedule_outgoing(superframe as u64)?;
        report.sent_bytes += outcome.payload_bytes() as u64;
        if agent.fmt_id() != NO_FMT {
            report.last_fmt = agent.fmt_id();
        }
    }

    let logoff = agent.on_logoff();
    node.send(&DamaMessage::Logoff(logoff), GATEWAY_ID).await?;

    let (requests, bursts, packets) = agent.get_stats();
    report.requests_sent = requests;
    report.bursts_sent = bursts;
    report.packets_sent = packets;
    report.backlog_bytes = agent.queues().iter().map(|q| q.byte_len() as u64).sum();
    debug!(
        "ST{}: {} requests, {} bursts, {} bytes sent, {} bytes left",
        terminal_id, requests, bursts, report.sent_bytes, report.backlog_bytes
    );
    Ok(report)
}

async fn handle_at_gateway(
    controller: &mut DamaController,
    node: &ChannelNode,
    from: TerminalId,
    message: DamaMessage,
    report: &mut GatewayReport,
) -> Result<()> {
    match message {
        DamaMessage::LogonRequest(logon) => {
            if let Some(response) = controller.on_logon(&logon) {
                node.send(&DamaMessage::LogonResponse(response), from).await?;
            }
        }
        DamaMessage::CapacityRequest(sac) => {
            if controller.on_capacity_request(&sac.to_request()) {
                report.requests_received += 1;
            }
        }
        DamaMessage::Logoff(logoff) => {
            controller.on_logoff(&logoff);
        }
        other => debug!("Gateway: unexpected {} from {} ignored", other.name(), from),
    }
    Ok(())
}

async fn run_gateway(
    mut node: ChannelNode,
    mut controller: DamaController,
    config: SimulationConfig,
    table: Arc<FmtTable>,
    registry: TerminalFmtRegistry,
    terminal_ids: Vec<TerminalId>,
) -> Result<GatewayReport> {
    let frame = Duration::from_millis(config.dama.frame_duration_ms as u64);
    let mut forward = TerminalCategory::from_config(&config.dama.forward, config.dama.frame_duration_ms);
    let mut forward_scheduler = ForwardScheduler::new();
    let mut forward_queues = vec![PacketQueue::new("ACM", 0, QueueAccess::Acm, 10_000)];
    let mut rng = StdRng::seed_from_u64(config.seed);
    let forward_arrivals = arrivals(
        config.traffic.forward_rate_kbps,
        config.dama.frame_duration_ms,
        config.traffic.packet_bytes,
    )?;
    let mut ticker = interval(frame);
    let mut report = GatewayReport::default();

    for superframe in 1..=config.superframes {
        ticker.tick().await;
        while let Some((from, message)) = node.try_recv() {
            handle_at_gateway(&mut controller, &node, from, message, &mut report).await?;
        }

        let plan = controller.on_superframe_start(superframe);
        node.broadcast(&DamaMessage::TimePlan(plan)).await?;
        let (rbdc_kbps, vbdc_kb, fca_kbps) = controller.last_grants();
        report.rbdc_granted_kbps += rbdc_kbps;
        report.vbdc_granted_kb += vbdc_kb;
        report.fca_granted_kbps += fca_kbps;

        for terminal_id in terminal_ids.iter().filter(|id| controller.terminal(**id).is_some()) {
            let count = forward_arrivals.sample(&mut rng) as u64;
            for _ in 0..count {
                let packet = Packet::new(GATEWAY_ID, *terminal_id, vec![0u8; config.traffic.packet_bytes]);
                forward_queues[0].push(packet, superframe as u64);
            }
        }
        let outcome = forward_scheduler.schedule(
            superframe,
            &mut forward,
            &mut forward_queues,
            &table,
            &registry,
            superframe as u64,
        )?;
        report.forward_frames += outcome.frames.len() as u64;
        report.forward_bytes += outcome.payload_bytes() as u64;
    }

    // logoffs are still travelling when the last superframe ends
    let deadline = Instant::now() + config.propagation_delay * 2 + frame;
    while let Ok(Some((from, message))) = timeout_at(deadline, node.recv()).await {
        handle_at_gateway(&mut controller, &node, from, message, &mut report).await?;
    }

    report.forward_dropped = forward_scheduler.dropped_packets();
    report.logged_on_at_end = controller.terminal_count();
    Ok(report)
}

pub fn print_report(name: &str, report: &SimulationReport) {
    println!("{}", format!("\n>>> {}", name).bright_green().bold());
    println!(
        "{:>6} {:>9} {:>8} {:>12} {:>12} {:>12} {:>6}",
        "ST", "requests", "bursts", "offered B", "sent B", "backlog B", "MODCOD"
    );
    for terminal in &report.terminals {
        println!(
            "{:>6} {:>9} {:>8} {:>12} {:>12} {:>12} {:>6}",
            terminal.terminal_id,
            terminal.requests_sent,
            terminal.bursts_sent,
            terminal.offered_bytes,
            terminal.sent_bytes,
            terminal.backlog_bytes,
            terminal.last_fmt
        );
    }
    let gateway = &report.gateway;
    println!(
        "Gateway: {} requests, RBDC {} kb/s, VBDC {} kb, FCA {} kb/s granted over the run",
        gateway.requests_received, gateway.rbdc_granted_kbps, gateway.vbdc_granted_kb, gateway.fca_granted_kbps
    );
    println!(
        "Forward: {} BBFrames, {} bytes, {} packets dropped",
        gateway.forward_frames, gateway.forward_bytes, gateway.forward_dropped
    );
    println!(
        "Channel: {} messages sent, {} delivered",
        report.messages_sent, report.messages_delivered
    );
    if report.backlog_bytes() > 0 {
        println!(
            "{}",
            format!("{} bytes still queued at the terminals", report.backlog_bytes()).yellow()
        );
    }
}
