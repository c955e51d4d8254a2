//! Human readable rendering of packets and chains.

use std::fmt::{self, Write};
use std::net::Ipv4Addr;

use crate::chain::Chain;
use crate::field::{Field, FieldKind};
use crate::packet::Packet;
use crate::protocols::ethernet::format_mac;
use crate::value::Value;

/// Format a field value; addresses get their conventional notation.
pub fn format_field(field: &Field) -> String {
    let v = field.value();
    match (field.kind(), &v) {
        (FieldKind::Int { width: 32 }, Value::Int(x)) if is_address(field.name()) => {
            Ipv4Addr::from(*x as u32).to_string()
        }
        (FieldKind::Bytes { width: Some(48) }, Value::Bytes(b)) => format_mac(b),
        (FieldKind::Int { width }, Value::Int(x)) if *width >= 16 && *width % 4 == 0 => {
            format!("{} (0x{:0w$x})", x, x, w = (*width / 4) as usize)
        }
        (FieldKind::OptionList { options }, _) => {
            let parts: Vec<String> = options
                .iter()
                .map(|o| match o.kind() {
                    FieldKind::Int { .. } => o.name().to_string(),
                    _ => format!("{}={}", o.name(), o.value()),
                })
                .collect();
            format!("[{}]", parts.join(", "))
        }
        _ => v.to_string(),
    }
}

fn is_address(name: &str) -> bool {
    matches!(name, "src" | "dst" | "spa" | "tpa")
}

fn write_fields<W: Write>(w: &mut W, packet: &Packet, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    writeln!(w, "{}{}", pad, packet.protocol().describe())?;
    let width = packet.fields().iter().map(|f| f.name().len()).max().unwrap_or(0);
    for field in packet.fields() {
        writeln!(w, "{}  {:<width$} {}", pad, field.name(), format_field(field), width = width)?;
    }
    Ok(())
}

/// A packet followed by the packets it carries, each one level deeper.
pub fn write_packet<W: Write>(w: &mut W, packet: &Packet) -> fmt::Result {
    let mut depth = 0;
    let mut current = Some(packet);
    while let Some(p) = current {
        write_fields(w, p, depth)?;
        depth += 1;
        current = p.data();
    }
    Ok(())
}

pub fn write_chain<W: Write>(w: &mut W, chain: &Chain) -> fmt::Result {
    if let Some(ts) = chain.timestamp() {
        writeln!(w, "@ {}.{:06}", ts.as_secs(), ts.subsec_micros())?;
    }
    for (depth, p) in chain.iter().enumerate() {
        write_fields(w, p, depth)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProtocolRegistry;

    #[test]
    fn addresses_and_hex_are_rendered() {
        let registry = ProtocolRegistry::builtin();
        let mut ip = registry.packet("ipv4").unwrap();
        ip.set("src", Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        ip.set("length", 40u16).unwrap();
        let text = ip.to_string();
        assert!(text.starts_with("IPv4\n"));
        assert!(text.contains("src      10.0.0.1\n"));
        assert!(text.contains("length   40 (0x0028)\n"));

        let mut eth = registry.packet("ethernet").unwrap();
        eth.set("dst", [0xffu8; 6]).unwrap();
        let chain = eth / ip;
        let text = chain.to_string();
        assert!(text.contains("dst  ff:ff:ff:ff:ff:ff\n"));
        assert!(text.contains("\n  IPv4\n"));
    }
}
