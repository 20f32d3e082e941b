//! Pkt-line framing for the ref-advertisement header, ported from the
//! teacher's `protocol::utils::add_pkt_line_string` /
//! `PKT_LINE_END_MARKER`.

use bytes::{BufMut, Bytes, BytesMut};

/// Length `0000`: a flush packet.
pub const FLUSH_MARKER: &[u8; 4] = b"0000";

/// Frame `line` as a pkt-line: a four-hex-digit length prefix (length
/// includes the prefix itself) followed by the payload.
pub fn encode_line(line: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(line.len() + 4);
    add_pkt_line_string(&mut buf, line);
    buf.freeze()
}

pub fn add_pkt_line_string(stream: &mut BytesMut, line: &str) {
    let total_len = line.len() + 4;
    stream.put_slice(format!("{total_len:04x}").as_bytes());
    stream.put_slice(line.as_bytes());
}

/// The `# service=git-<svc>\n` pkt-line followed by a flush packet, as
/// required at the start of every v1 smart-HTTP ref advertisement.
pub fn service_announcement(service: &str) -> Bytes {
    let mut buf = BytesMut::new();
    add_pkt_line_string(&mut buf, &format!("# service={service}\n"));
    buf.put_slice(FLUSH_MARKER);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_length_prefixed_line() {
        let line = encode_line("hello\n");
        assert_eq!(&line[..4], b"000a");
        assert_eq!(&line[4..], b"hello\n");
    }

    #[test]
    fn service_announcement_ends_with_flush() {
        let announcement = service_announcement("git-upload-pack");
        assert!(announcement.ends_with(FLUSH_MARKER));
        assert_eq!(&announcement[..4], b"001e");
    }
}
