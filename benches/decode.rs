//! Packet decode and fingerprint benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use flowprobe::config::Backpressure;
use flowprobe::{
    Engine, EngineConfig, Ja4Record, LinkType, OutputQueue, PacketHeader, TlsHandshake, Transport,
};

fn tcp_packet(payload_len: usize) -> Vec<u8> {
    let mut pkt = vec![0u8; 12];
    pkt.extend_from_slice(&0x0800u16.to_be_bytes());
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((40 + payload_len) as u16).to_be_bytes());
    ip[9] = 6;
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
    pkt.extend_from_slice(&ip);
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&40000u16.to_be_bytes());
    tcp[2..4].copy_from_slice(&443u16.to_be_bytes());
    tcp[12] = 5 << 4;
    tcp[13] = 0x18; // PSH|ACK
    pkt.extend_from_slice(&tcp);
    pkt.extend(std::iter::repeat(0xab).take(payload_len));
    pkt
}

fn decode_benchmark(c: &mut Criterion) {
    let (queue, rx) = OutputQueue::bounded(1 << 20, Backpressure::Drop);
    let mut engine = Engine::new(EngineConfig::default(), LinkType::Ethernet, queue);
    let pkt = tcp_packet(512);
    let hdr = PacketHeader {
        ts_sec: 1_700_000_000,
        ts_usec: 0,
        caplen: pkt.len() as u32,
        len: pkt.len() as u32,
    };

    c.bench_function("decode_tcp_512", |b| {
        b.iter(|| {
            engine.process_packet(black_box(&hdr), black_box(&pkt));
        })
    });
    drop(rx);
}

fn fingerprint_benchmark(c: &mut Criterion) {
    let hs = TlsHandshake {
        transport: Transport::Tcp,
        version: 0x0304,
        sni: Some("example.com".into()),
        alpn: "h2".into(),
        cipher_suites: vec![
            0x1301, 0x1303, 0x1302, 0xc02b, 0xc02f, 0xcca9, 0xcca8, 0xc02c, 0xc030, 0xc00a,
            0xc009, 0xc013, 0xc014, 0x009c, 0x009d, 0x002f, 0x0035,
        ],
        extensions: vec![
            0x0000, 0x0017, 0xff01, 0x000a, 0x000b, 0x0023, 0x0010, 0x0005, 0x0022, 0x0033,
            0x002b, 0x000d, 0x002d, 0x001c, 0x0015,
        ],
        signature_algorithms: vec![
            0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203,
            0x0201,
        ],
    };

    c.bench_function("ja4_from_handshake", |b| {
        b.iter(|| Ja4Record::from_handshake(black_box(&hs)))
    });
}

criterion_group!(benches, decode_benchmark, fingerprint_benchmark);
criterion_main!(benches);
