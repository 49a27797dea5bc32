use std::fmt::{self, Display, Formatter};

use crate::central::PeripheralInfo;
use crate::utils::format_rssi;

use super::painter::Painter;
use super::table::Table;

/// Renders one peripheral as a field/value table.
pub(crate) struct PeripheralView<'a> {
    peripheral: &'a PeripheralInfo,
    painter: &'a Painter,
}

impl<'a> PeripheralView<'a> {
    pub(crate) fn new(peripheral: &'a PeripheralInfo, painter: &'a Painter) -> Self {
        Self {
            peripheral,
            painter,
        }
    }
}

impl Display for PeripheralView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("device_id", self.painter.value(self.peripheral.id().as_str())),
                (
                    "name",
                    self.painter
                        .value(self.peripheral.local_name().unwrap_or("<unknown>")),
                ),
                ("rssi", self.painter.value(format_rssi(self.peripheral.rssi()))),
            ],
        );
        write!(f, "{table}")
    }
}

/// Renders everything a scan found, one row per peripheral.
pub(crate) struct ScanResultView<'a> {
    peripherals: &'a [PeripheralInfo],
    painter: &'a Painter,
}

impl<'a> ScanResultView<'a> {
    pub(crate) fn new(peripherals: &'a [PeripheralInfo], painter: &'a Painter) -> Self {
        Self {
            peripherals,
            painter,
        }
    }
}

impl Display for ScanResultView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.peripherals.is_empty() {
            return write!(f, "{}", self.painter.warning("No peripherals found."));
        }

        let rows = self
            .peripherals
            .iter()
            .map(|peripheral| {
                vec![
                    self.painter.value(peripheral.id().as_str()),
                    peripheral.local_name().unwrap_or("-").to_owned(),
                    format_rssi(peripheral.rssi()),
                ]
            })
            .collect();
        let table = Table::grid(["device_id", "name", "rssi"], rows);

        write!(
            f,
            "{}",
            self.painter
                .heading(format!("Found {} peripheral(s):", self.peripherals.len()))
        )?;
        write!(f, "\n{table}")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::central::PeripheralId;

    fn peripheral(name: Option<&str>, rssi: Option<i16>) -> PeripheralInfo {
        PeripheralInfo::new(PeripheralId::from("AA:BB:CC"), name.map(String::from), rssi)
    }

    #[rstest]
    #[case::all_fields(Some("Thermo"), Some(-43), "Thermo", "-43")]
    #[case::missing_name(None, Some(-43), "<unknown>", "-43")]
    #[case::missing_rssi(Some("Thermo"), None, "Thermo", "-")]
    fn peripheral_view_lists_fields(
        #[case] name: Option<&str>,
        #[case] rssi: Option<i16>,
        #[case] shown_name: &str,
        #[case] shown_rssi: &str,
    ) {
        let painter = Painter::new(false);
        let found = peripheral(name, rssi);
        let rendered = PeripheralView::new(&found, &painter).to_string();

        assert!(rendered.contains("AA:BB:CC"));
        assert!(rendered.contains(shown_name));
        assert!(rendered.contains(shown_rssi));
    }

    #[test]
    fn empty_scan_says_nothing_was_found() {
        let painter = Painter::new(false);
        assert_eq!(
            "No peripherals found.",
            ScanResultView::new(&[], &painter).to_string()
        );
    }

    #[test]
    fn scan_result_counts_peripherals() {
        let painter = Painter::new(false);
        let found = vec![peripheral(Some("Thermo"), Some(-43)), peripheral(None, None)];
        let rendered = ScanResultView::new(&found, &painter).to_string();

        assert!(rendered.starts_with("Found 2 peripheral(s):"));
        assert!(rendered.contains("Thermo"));
    }
}
