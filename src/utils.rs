use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

use crate::error::FixtureError;

/// Parses a Bluetooth UUID in 16-bit short form (`2a19`, `0x2A19`) or full 128-bit form.
///
/// # Errors
///
/// Returns [`FixtureError::InvalidUuid`] when `value` is neither form.
pub fn parse_ble_uuid(value: &str) -> Result<Uuid, FixtureError> {
    let trimmed = value.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if short.len() == 4 {
        if let Ok(short_uuid) = u16::from_str_radix(short, 16) {
            return Ok(uuid_from_u16(short_uuid));
        }
    }

    Uuid::parse_str(trimmed).map_err(|_| FixtureError::InvalidUuid {
        value: trimmed.to_string(),
    })
}

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats an optional RSSI for terminal output.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    rssi.map_or_else(|| "-".to_string(), |value| value.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn format_hex_handles_empty_payload() {
        assert_eq!("<empty>", format_hex(&[]));
    }

    #[test]
    fn format_hex_formats_uppercase_pairs() {
        assert_eq!("05 00 A1 FF", format_hex(&[0x05, 0x00, 0xA1, 0xFF]));
    }

    #[test]
    fn format_rssi_handles_unknown() {
        assert_eq!("-", format_rssi(None));
    }

    #[rstest]
    #[case("2a19")]
    #[case("0x2A19")]
    #[case("00002a19-0000-1000-8000-00805f9b34fb")]
    fn parse_ble_uuid_accepts_short_and_full_forms(#[case] raw: &str) {
        assert_eq!(
            Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb),
            parse_ble_uuid(raw).expect("uuid should parse")
        );
    }

    #[test]
    fn parse_ble_uuid_rejects_garbage() {
        assert_matches!(
            parse_ble_uuid("battery"),
            Err(FixtureError::InvalidUuid { value }) if value == "battery"
        );
    }
}
