// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

/// Internet checksum (RFC 1071) over `data`, starting from `init`.
///
/// Words are read big-endian and an odd trailing byte is padded with zero.
/// Running this over a header that already carries a correct checksum
/// returns 0.
pub fn checksum16(data: &[u8], init: u32) -> u16 {
  let mut sum = init;

  let mut chunks = data.chunks_exact(2);
  for word in &mut chunks {
    sum += u16::from_be_bytes([word[0], word[1]]) as u32;
  }
  if let [last] = chunks.remainder() {
    sum += (*last as u32) << 8;
  }

  while (sum >> 16) > 0 {
    sum = (sum & 0xffff) + (sum >> 16);
  }

  !(sum as u16)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_checksum_rfc1071_example() {
    // RFC 1071 section 3 sample: sum is 0xddf2, checksum is its complement.
    let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
    assert_eq!(checksum16(&data, 0), !0xddf2);
  }

  #[test]
  fn test_checksum_odd_length() {
    assert_eq!(checksum16(&[0x12], 0), !0x1200);
  }

  #[test]
  fn test_checksum_verifies_to_zero() {
    let mut header = [
      0x45, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x00, 0x00, 0x40, 0x01,
      0x00, 0x00, 0xc0, 0x00, 0x02, 0x01, 0xc0, 0x00, 0x02, 0x02,
    ];
    let sum = checksum16(&header, 0);
    header[10..12].copy_from_slice(&sum.to_be_bytes());
    assert_eq!(checksum16(&header, 0), 0);
  }

  #[test]
  fn test_checksum_empty() {
    assert_eq!(checksum16(&[], 0), 0xffff);
  }
}
