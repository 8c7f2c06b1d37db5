//! Wire decoding for the serial source: CSV lines, the MoTeC-style binary
//! framing, and format auto-detection.

use super::DataFormat;

/// Binary frame sync marker.
pub const SYNC: u8 = 0xAA;

/// sync(1) + id(2) + len(1)
const HEADER_LEN: usize = 4;
const CRC_LEN: usize = 2;

/// Parse one CSV line positionally against the configured channel order.
/// Extra columns are ignored; unparseable or missing columns are excluded.
pub fn decode_csv_line(line: &str, order: &[String], separator: &str) -> Vec<(String, f64)> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || order.is_empty() {
        return Vec::new();
    }

    line.split(separator)
        .map(str::trim)
        .zip(order.iter())
        .filter_map(|(column, sensor_id)| {
            column
                .parse::<f64>()
                .ok()
                .map(|value| (sensor_id.clone(), value))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryFrame {
    pub id: u16,
    pub payload: Vec<u8>,
}

/// Incremental deframer for the binary format: sync byte 0xAA, id u16 LE,
/// len u8, payload, CRC-16 LE over id+len+payload. A CRC mismatch skips the
/// sync byte and rescans.
#[derive(Debug, Default)]
pub struct BinaryDeframer {
    buf: Vec<u8>,
    pub crc_errors: u64,
}

impl BinaryDeframer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Option<BinaryFrame> {
        loop {
            // Resynchronize: discard everything before the next sync byte.
            match self.buf.iter().position(|&b| b == SYNC) {
                Some(0) => {}
                Some(offset) => {
                    self.buf.drain(..offset);
                }
                None => {
                    self.buf.clear();
                    return None;
                }
            }

            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let len = self.buf[3] as usize;
            let total = HEADER_LEN + len + CRC_LEN;
            if self.buf.len() < total {
                return None;
            }

            let computed = crc16_ccitt(&self.buf[1..HEADER_LEN + len]);
            let stored = u16::from_le_bytes([self.buf[HEADER_LEN + len], self.buf[HEADER_LEN + len + 1]]);

            if computed != stored {
                self.crc_errors += 1;
                self.buf.drain(..1);
                continue;
            }

            let id = u16::from_le_bytes([self.buf[1], self.buf[2]]);
            let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
            self.buf.drain(..total);
            return Some(BinaryFrame { id, payload });
        }
    }
}

/// Map a binary frame's payload (consecutive f32 LE values) onto channel ids,
/// starting at position `id` of the configured channel order.
pub fn payload_channels(frame: &BinaryFrame, order: &[String]) -> Vec<(String, f64)> {
    frame
        .payload
        .chunks_exact(4)
        .enumerate()
        .filter_map(|(index, chunk)| {
            let sensor_id = order.get(frame.id as usize + index)?;
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            Some((sensor_id.clone(), f64::from(value)))
        })
        .collect()
}

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF).
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Decide the wire format from a peek buffer: mostly printable ASCII with a
/// line terminator reads as CSV, anything else as binary.
pub fn sniff_format(buf: &[u8]) -> DataFormat {
    if buf.is_empty() {
        return DataFormat::MotecBinary;
    }
    let printable = buf
        .iter()
        .filter(|&&b| b == b'\r' || b == b'\n' || b == b'\t' || (0x20..0x7F).contains(&b))
        .count();
    let has_terminator = buf.iter().any(|&b| b == b'\n' || b == b'\r');
    if printable * 100 >= buf.len() * 80 && has_terminator {
        DataFormat::Csv
    } else {
        DataFormat::MotecBinary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Vec<String> {
        vec!["rpm".to_string(), "speed_kph".to_string(), "tps_pct".to_string()]
    }

    fn encode_frame(id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![SYNC];
        out.extend_from_slice(&id.to_le_bytes());
        out.push(payload.len() as u8);
        out.extend_from_slice(payload);
        let crc = crc16_ccitt(&out[1..]);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    #[test]
    fn csv_line_pairs_positionally() {
        let channels = decode_csv_line("6500, 82.5, 14\n", &order(), ",");
        assert_eq!(
            channels,
            vec![
                ("rpm".to_string(), 6500.0),
                ("speed_kph".to_string(), 82.5),
                ("tps_pct".to_string(), 14.0),
            ]
        );
    }

    #[test]
    fn csv_extra_columns_ignored_missing_excluded() {
        let channels = decode_csv_line("6500;82.5;14;99;100", &order(), ";");
        assert_eq!(channels.len(), 3);

        let channels = decode_csv_line("6500", &order(), ",");
        assert_eq!(channels, vec![("rpm".to_string(), 6500.0)]);
    }

    #[test]
    fn csv_unparseable_column_excluded() {
        let channels = decode_csv_line("6500,--,14", &order(), ",");
        assert_eq!(channels.len(), 2);
        assert!(!channels.iter().any(|(id, _)| id == "speed_kph"));
    }

    #[test]
    fn crc16_matches_known_vector() {
        // CRC-16/CCITT-FALSE of "123456789" is 0x29B1.
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn deframer_roundtrip() {
        let payload = 6500.0f32.to_le_bytes();
        let wire = encode_frame(0, &payload);

        let mut deframer = BinaryDeframer::new();
        deframer.push(&wire);
        let frame = deframer.next_frame().expect("frame");
        assert_eq!(frame.id, 0);
        assert_eq!(frame.payload, payload);
        assert!(deframer.next_frame().is_none());
        assert_eq!(deframer.crc_errors, 0);
    }

    #[test]
    fn deframer_resynchronizes_after_bad_crc() {
        let good = encode_frame(1, &42.0f32.to_le_bytes());
        let mut corrupted = good.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut deframer = BinaryDeframer::new();
        deframer.push(&corrupted);
        deframer.push(&good);
        let frame = deframer.next_frame().expect("second frame survives");
        assert_eq!(frame.id, 1);
        assert!(deframer.crc_errors >= 1);
    }

    #[test]
    fn deframer_skips_leading_garbage() {
        let mut wire = vec![0x00, 0x13, 0x37];
        wire.extend_from_slice(&encode_frame(2, &1.0f32.to_le_bytes()));

        let mut deframer = BinaryDeframer::new();
        deframer.push(&wire);
        assert!(deframer.next_frame().is_some());
    }

    #[test]
    fn payload_maps_consecutive_channels_from_id_offset() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&82.5f32.to_le_bytes());
        payload.extend_from_slice(&14.0f32.to_le_bytes());
        let frame = BinaryFrame { id: 1, payload };

        let channels = payload_channels(&frame, &order());
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].0, "speed_kph");
        assert_eq!(channels[1].0, "tps_pct");
    }

    #[test]
    fn payload_ids_past_order_are_dropped() {
        let frame = BinaryFrame {
            id: 99,
            payload: 1.0f32.to_le_bytes().to_vec(),
        };
        assert!(payload_channels(&frame, &order()).is_empty());
    }

    #[test]
    fn sniff_detects_csv_and_binary() {
        assert_eq!(sniff_format(b"6500,82.5,14\n6501,83.0,15\n"), DataFormat::Csv);
        assert_eq!(
            sniff_format(&[SYNC, 0x01, 0x00, 0x04, 1, 2, 3, 4, 0xAB, 0xCD]),
            DataFormat::MotecBinary
        );
        // Printable but no terminator yet: keep treating as binary.
        assert_eq!(sniff_format(b"6500,82.5"), DataFormat::MotecBinary);
    }
}
