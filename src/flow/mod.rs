//! Flow state machine
//!
//! Consumes candidate nodes from the decoder and either merges them into the
//! stored flow or inserts them. Completed flows leave through the output
//! queue; a TCP flow carrying a ClientHello payload gets its fingerprint
//! attached on the way out.

pub mod node;
pub mod table;

use tracing::{debug, warn};

use crate::ip_proto;
use crate::ja4::Ja4Record;
use crate::output::OutputQueue;
use crate::tcp_flags;
use crate::tls::{self, Transport};
use node::{FlowNode, NodeState};
use table::FlowTable;

const DNS_PORT: u16 = 53;

/// Dispatch a candidate node to its per-protocol flow path
pub(crate) fn process_node(table: &mut FlowTable, out: &OutputQueue, node: FlowNode) {
    match node.key().proto {
        ip_proto::TCP => process_tcp(table, out, node),
        ip_proto::UDP => process_udp(table, out, node),
        ip_proto::ICMP | ip_proto::ICMPV6 => process_icmp(out, node),
        _ => process_other(table, node),
    }
}

fn process_tcp(table: &mut FlowTable, out: &OutputQueue, node: FlowNode) {
    let key = *node.key();
    let fin = node.is_fin_rst();

    match table.insert_or_get(node) {
        None => {
            debug!(?key, "new TCP flow");
            // a FIN/RST-only first packet is flushed immediately
            if fin {
                if let Some(n) = table.remove(&key) {
                    flush_node(out, n);
                }
                return;
            }
            if table.link_reverse(&key) {
                // linking means this flow is the server answer
                mark_server_latency(table, &key);
            }
        }
        Some(delta) => {
            let flush = delta.is_fin_rst();
            if let Some(stored) = table.get_mut(&key) {
                match stored.latency.phase {
                    1 => {
                        // first client packet after the server reply
                        stored.latency.client_us =
                            delta.t_first.saturating_sub(stored.latency.mark_us);
                        stored.latency.phase = 2;
                        stored.latency.mark_us = delta.t_first;
                    }
                    2 if delta.payload.is_some() => {
                        stored.latency.application_us =
                            delta.t_first.saturating_sub(stored.latency.mark_us);
                        stored.latency.phase = 3;
                    }
                    _ => {}
                }

                stored.flags |= delta.flags;
                stored.packets += 1;
                stored.bytes += delta.bytes;
                stored.t_last = stored.t_last.max(delta.t_last);
                if stored.payload.is_none() && delta.payload.is_some() {
                    stored.payload = delta.payload;
                }
            }
            if flush {
                if let Some(n) = table.remove(&key) {
                    flush_node(out, n);
                }
            }
        }
    }
}

/// Server latency: gap between the SYN and the linked SYN+ACK, recorded on
/// the client-direction flow.
fn mark_server_latency(table: &mut FlowTable, server_key: &node::FlowKey) {
    let (reply_first, reply_flags) = match table.get(server_key) {
        Some(reply) => (reply.t_first, reply.flags),
        None => return,
    };
    let syn_ack = tcp_flags::SYN | tcp_flags::ACK;
    if reply_flags & syn_ack != syn_ack {
        return;
    }
    if let Some(client) = table.get_mut(&server_key.reverse()) {
        if client.flags & tcp_flags::SYN != 0 && client.latency.phase == 0 {
            client.latency.server_us = reply_first.saturating_sub(client.t_first);
            client.latency.phase = 1;
            client.latency.mark_us = reply_first;
        }
    }
}

fn process_udp(table: &mut FlowTable, out: &OutputQueue, node: FlowNode) {
    // DNS queries and answers bypass the table
    if node.key().src_port == DNS_PORT || node.key().dst_port == DNS_PORT {
        flush_node(out, node);
        return;
    }

    let key = *node.key();
    if let Some(delta) = table.insert_or_get(node) {
        if let Some(stored) = table.get_mut(&key) {
            stored.packets += 1;
            stored.bytes += delta.bytes;
            stored.t_last = stored.t_last.max(delta.t_last);
        }
    }
}

fn process_icmp(out: &OutputQueue, node: FlowNode) {
    // never inserted
    flush_node(out, node);
}

fn process_other(table: &mut FlowTable, node: FlowNode) {
    let key = *node.key();
    if let Some(delta) = table.insert_or_get(node) {
        if let Some(stored) = table.get_mut(&key) {
            stored.packets += 1;
            stored.bytes += delta.bytes;
            stored.t_last = stored.t_last.max(delta.t_last);
        }
    }
}

/// Hand a completed node to the output queue
///
/// TCP flows with a captured payload are probed for a ClientHello; a
/// successful fingerprint is attached to the node and also emitted as its
/// own record.
pub(crate) fn flush_node(out: &OutputQueue, mut node: FlowNode) {
    node.state = NodeState::Flushed;

    if node.key().proto == ip_proto::TCP {
        if let Some(payload) = node.payload.as_deref() {
            if let Some(hello) = tls::parse_client_hello(payload, Transport::Tcp) {
                if let Some(record) = Ja4Record::from_handshake(&hello) {
                    node.fingerprint = Some(record.clone());
                    if let Err(e) = out.push_fingerprint(record, *node.key()) {
                        warn!(error = %e, "fingerprint push failed");
                    }
                }
            }
        }
    }

    if let Err(e) = out.push_flow(node) {
        warn!(error = %e, "flow push failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backpressure;
    use crate::output::OutboundItem;
    use crate::tcp_flags::{ACK, FIN, PSH, RST, SYN};
    use node::FlowKey;
    use std::net::Ipv4Addr;

    fn queue() -> (OutputQueue, crossbeam_channel::Receiver<OutboundItem>) {
        OutputQueue::bounded(64, Backpressure::Block)
    }

    fn tcp_key(sport: u16, dport: u16) -> FlowKey {
        FlowKey::from_v4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            sport,
            dport,
            ip_proto::TCP,
        )
    }

    fn tcp_node(key: FlowKey, ts: u64, flags: u8, payload: Option<&[u8]>) -> FlowNode {
        let mut n = FlowNode::new(key, ts);
        n.flags = flags;
        n.bytes = 20 + payload.map_or(0, |p| p.len() as u64);
        n.payload = payload.map(|p| p.to_vec());
        n
    }

    fn recv_flows(rx: &crossbeam_channel::Receiver<OutboundItem>) -> Vec<FlowNode> {
        let mut flows = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let OutboundItem::Flow(n) = item {
                flows.push(*n);
            }
        }
        flows
    }

    #[test]
    fn test_tcp_syn_stays_in_table() {
        let (out, rx) = queue();
        let mut table = FlowTable::new();
        process_node(&mut table, &out, tcp_node(tcp_key(1000, 80), 0, SYN, None));
        assert_eq!(table.len(), 1);
        assert!(recv_flows(&rx).is_empty());
    }

    #[test]
    fn test_tcp_first_packet_rst_flushes() {
        let (out, rx) = queue();
        let mut table = FlowTable::new();
        process_node(&mut table, &out, tcp_node(tcp_key(1000, 80), 0, RST, None));
        assert!(table.is_empty());
        let flows = recv_flows(&rx);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].state, NodeState::Flushed);
        assert_eq!(flows[0].flags, RST);
    }

    #[test]
    fn test_tcp_merge_and_fin_flush() {
        let (out, rx) = queue();
        let mut table = FlowTable::new();
        let key = tcp_key(1000, 80);
        process_node(&mut table, &out, tcp_node(key, 0, SYN, None));
        process_node(&mut table, &out, tcp_node(key, 10, ACK, None));
        process_node(
            &mut table,
            &out,
            tcp_node(key, 20, ACK | PSH, Some(&[0xab; 100])),
        );
        process_node(&mut table, &out, tcp_node(key, 30, FIN | ACK, None));

        assert!(table.is_empty());
        let flows = recv_flows(&rx);
        assert_eq!(flows.len(), 1);
        let flow = &flows[0];
        assert_eq!(flow.packets, 4);
        assert_eq!(flow.flags, SYN | ACK | PSH | FIN);
        assert_eq!(flow.t_first, 0);
        assert_eq!(flow.t_last, 30);
        assert_eq!(flow.payload.as_ref().map(|p| p.len()), Some(100));
    }

    #[test]
    fn test_tcp_payload_moves_once() {
        let (out, _rx) = queue();
        let mut table = FlowTable::new();
        let key = tcp_key(1000, 80);
        process_node(&mut table, &out, tcp_node(key, 0, SYN, None));
        process_node(&mut table, &out, tcp_node(key, 1, ACK, Some(b"first")));
        process_node(&mut table, &out, tcp_node(key, 2, ACK, Some(b"second")));
        let stored = table.get(&key).unwrap();
        assert_eq!(stored.payload.as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn test_tcp_handshake_latency_slots() {
        let (out, _rx) = queue();
        let mut table = FlowTable::new();
        let client = tcp_key(40000, 443);
        let server = client.reverse();

        process_node(&mut table, &out, tcp_node(client, 1_000, SYN, None));
        process_node(&mut table, &out, tcp_node(server, 1_500, SYN | ACK, None));
        process_node(&mut table, &out, tcp_node(client, 1_900, ACK, None));
        process_node(
            &mut table,
            &out,
            tcp_node(client, 2_400, ACK | PSH, Some(b"GET /")),
        );

        let flow = table.get(&client).unwrap();
        assert_eq!(flow.latency.server_us, 500);
        assert_eq!(flow.latency.client_us, 400);
        assert_eq!(flow.latency.application_us, 500);
        assert_eq!(flow.reverse, Some(server));
        assert_eq!(table.get(&server).unwrap().reverse, Some(client));
    }

    #[test]
    fn test_udp_dns_bypasses_table() {
        let (out, rx) = queue();
        let mut table = FlowTable::new();
        let key = FlowKey::from_v4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            5353,
            53,
            ip_proto::UDP,
        );
        let mut n = FlowNode::new(key, 0);
        n.bytes = 40;
        process_node(&mut table, &out, n);
        assert!(table.is_empty());
        assert_eq!(recv_flows(&rx).len(), 1);
    }

    #[test]
    fn test_udp_other_merges() {
        let (out, rx) = queue();
        let mut table = FlowTable::new();
        let key = FlowKey::from_v4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            10000,
            4500,
            ip_proto::UDP,
        );
        let mut a = FlowNode::new(key, 0);
        a.bytes = 100;
        let mut b = FlowNode::new(key, 5);
        b.bytes = 50;
        process_node(&mut table, &out, a);
        process_node(&mut table, &out, b);
        let stored = table.get(&key).unwrap();
        assert_eq!(stored.packets, 2);
        assert_eq!(stored.bytes, 150);
        assert_eq!(stored.t_last, 5);
        assert!(recv_flows(&rx).is_empty());
    }

    #[test]
    fn test_icmp_flushes_directly() {
        let (out, rx) = queue();
        let mut table = FlowTable::new();
        let key = FlowKey::from_v4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            0,
            0x0800,
            ip_proto::ICMP,
        );
        process_node(&mut table, &out, FlowNode::new(key, 0));
        assert!(table.is_empty());
        assert_eq!(recv_flows(&rx).len(), 1);
    }

    #[test]
    fn test_flush_attaches_fingerprint() {
        let (out, rx) = queue();
        let hello = crate::tls::tests::firefox_client_hello();
        let key = tcp_key(40000, 443);
        let mut node = FlowNode::new(key, 0);
        node.payload = Some(hello);
        flush_node(&out, node);

        let mut saw_fingerprint = false;
        let mut saw_flow = false;
        while let Ok(item) = rx.try_recv() {
            match item {
                OutboundItem::Fingerprint { record, key: k } => {
                    assert_eq!(record.to_string(), "t13d1715h2_5b57614c22b0_3d5424432f57");
                    assert_eq!(k, key);
                    saw_fingerprint = true;
                }
                OutboundItem::Flow(n) => {
                    assert!(n.fingerprint.is_some());
                    saw_flow = true;
                }
                OutboundItem::Shutdown => {}
            }
        }
        assert!(saw_fingerprint && saw_flow);
    }
}
