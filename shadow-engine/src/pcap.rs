use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use shadow_host::PcapRecord;
use shadow_topo::{Protocol, TcpFlags};

const LINKTYPE_ETHERNET: u32 = 1;
const ETHERTYPE_IPV4: u16 = 0x0800;

/// Write one classic (non-pcapng) `libpcap` file containing every record
/// captured at a host's NIC (SPEC_FULL.md §12 PCAP emission, spec.md §6
/// Persisted state).
///
/// TCP/UDP checksums are left zeroed: these are frames synthesized for a
/// simulated network, not wire captures, and nothing ever validates them.
pub fn write_pcap_file(path: &Path, records: &[PcapRecord]) -> io::Result<()> {
    let mut file = File::create(path)?;
    write_global_header(&mut file)?;
    for record in records {
        write_record(&mut file, record)?;
    }
    file.flush()
}

fn write_global_header(w: &mut impl Write) -> io::Result<()> {
    w.write_all(&0xa1b2_c3d4u32.to_le_bytes())?;
    w.write_all(&2u16.to_le_bytes())?;
    w.write_all(&4u16.to_le_bytes())?;
    w.write_all(&0i32.to_le_bytes())?;
    w.write_all(&0u32.to_le_bytes())?;
    w.write_all(&65_535u32.to_le_bytes())?;
    w.write_all(&LINKTYPE_ETHERNET.to_le_bytes())?;
    Ok(())
}

fn write_record(w: &mut impl Write, record: &PcapRecord) -> io::Result<()> {
    let frame = synthesize_frame(record);
    let duration = record.timestamp.to_duration();
    w.write_all(&(duration.as_secs() as u32).to_le_bytes())?;
    w.write_all(&duration.subsec_micros().to_le_bytes())?;
    w.write_all(&(frame.len() as u32).to_le_bytes())?;
    w.write_all(&(frame.len() as u32).to_le_bytes())?;
    w.write_all(&frame)
}

/// Build a minimal Ethernet/IPv4/TCP-or-UDP frame around a simulated
/// packet's header fields and payload, for tools expecting a real
/// link-layer capture (`tcpdump`, Wireshark).
fn synthesize_frame(record: &PcapRecord) -> Vec<u8> {
    let packet = &record.packet;
    let payload = packet.payload();

    let l4_header_len: usize = match packet.protocol {
        Protocol::Tcp => 20,
        Protocol::Udp => 8,
    };
    let ip_total_len = 20 + l4_header_len + payload.len();

    let mut frame = Vec::with_capacity(14 + ip_total_len);

    frame.extend_from_slice(&[0u8; 6]); // destination MAC
    frame.extend_from_slice(&[0u8; 6]); // source MAC
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    let ip_header_start = frame.len();
    frame.push(0x45); // version 4, IHL 5 (20-byte header, no options)
    frame.push(0x00); // DSCP/ECN
    frame.extend_from_slice(&(ip_total_len as u16).to_be_bytes());
    frame.extend_from_slice(&(packet.id.0 as u16).to_be_bytes()); // identification
    frame.extend_from_slice(&0u16.to_be_bytes()); // flags/fragment offset
    frame.push(64); // TTL
    frame.push(match packet.protocol {
        Protocol::Tcp => 6,
        Protocol::Udp => 17,
    });
    frame.extend_from_slice(&[0u8; 2]); // checksum placeholder, patched below
    frame.extend_from_slice(&packet.src_ip.octets());
    frame.extend_from_slice(&packet.dst_ip.octets());

    let checksum = ip_checksum(&frame[ip_header_start..ip_header_start + 20]);
    frame[ip_header_start + 10..ip_header_start + 12].copy_from_slice(&checksum.to_be_bytes());

    match packet.protocol {
        Protocol::Tcp => {
            let header = packet.tcp.expect("TCP packets always carry a TcpHeader");
            frame.extend_from_slice(&packet.src_port.to_be_bytes());
            frame.extend_from_slice(&packet.dst_port.to_be_bytes());
            frame.extend_from_slice(&header.seq.to_be_bytes());
            frame.extend_from_slice(&header.ack.to_be_bytes());
            frame.push(5 << 4); // data offset, no options
            frame.push(tcp_flags_byte(&header.flags));
            frame.extend_from_slice(&header.window.to_be_bytes());
            frame.extend_from_slice(&[0u8; 2]); // checksum, unvalidated
            frame.extend_from_slice(&[0u8; 2]); // urgent pointer
        }
        Protocol::Udp => {
            frame.extend_from_slice(&packet.src_port.to_be_bytes());
            frame.extend_from_slice(&packet.dst_port.to_be_bytes());
            frame.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
            frame.extend_from_slice(&[0u8; 2]); // checksum, unvalidated
        }
    }

    frame.extend_from_slice(payload);
    frame
}

fn tcp_flags_byte(flags: &TcpFlags) -> u8 {
    (flags.fin as u8) | ((flags.syn as u8) << 1) | ((flags.rst as u8) << 2) | ((flags.ack as u8) << 4)
}

/// The standard Internet checksum (RFC 1071) over a 20-byte IPv4 header with
/// the checksum field itself zeroed.
fn ip_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in header.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += word as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use shadow_time::SimTime;
    use shadow_topo::{Packet, PacketId};

    fn udp_record() -> PcapRecord {
        PcapRecord {
            timestamp: SimTime::from_millis(250),
            packet: Packet::new(
                PacketId(7),
                Ipv4Addr::new(10, 0, 0, 1),
                4000,
                Ipv4Addr::new(10, 0, 0, 2),
                5000,
                Protocol::Udp,
                None,
                Arc::from(vec![1, 2, 3, 4]),
            ),
        }
    }

    #[test]
    fn writes_a_valid_global_header_and_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.pcap");
        write_pcap_file(&path, &[udp_record()]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], &0xa1b2_c3d4u32.to_le_bytes());
        let snaplen = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        assert_eq!(snaplen, 65_535);

        // Global header (24 bytes) + per-record header (16 bytes) + frame.
        let incl_len = u32::from_le_bytes(bytes[24 + 8..24 + 12].try_into().unwrap());
        assert_eq!(bytes.len(), 24 + 16 + incl_len as usize);
    }

    #[test]
    fn ip_header_checksum_is_self_consistent() {
        let frame = synthesize_frame(&udp_record());
        // Bytes 14..34 are the IPv4 header; verifying over it (checksum
        // included) must sum to the ones-complement of zero.
        let verify = ip_checksum(&frame[14..34]);
        assert_eq!(verify, 0);
    }
}
