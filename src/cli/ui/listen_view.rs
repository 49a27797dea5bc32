use std::fmt::{self, Display, Formatter};

use time::format_description::well_known::Rfc3339;

use crate::central::{CharacteristicInfo, PeripheralInfo};
use crate::cli::listen::{ListenStopReason, ListenSummary};
use crate::notification::Notification;
use crate::utils::format_hex;

use super::painter::Painter;
use super::peripheral_view::PeripheralView;
use super::table::Table;

/// Printed once notifications are enabled.
pub(crate) struct ListenReadyView<'a> {
    peripheral: &'a PeripheralInfo,
    characteristic: &'a CharacteristicInfo,
    painter: &'a Painter,
}

impl<'a> ListenReadyView<'a> {
    pub(crate) fn new(
        peripheral: &'a PeripheralInfo,
        characteristic: &'a CharacteristicInfo,
        painter: &'a Painter,
    ) -> Self {
        Self {
            peripheral,
            characteristic,
            painter,
        }
    }
}

impl Display for ListenReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let properties = self
            .characteristic
            .properties()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let session = Table::key_value(
            self.painter,
            vec![
                ("service", self.painter.value(self.characteristic.service().to_string())),
                (
                    "characteristic",
                    self.painter.value(self.characteristic.uuid().to_string()),
                ),
                ("properties", self.painter.muted(properties)),
            ],
        );

        write!(f, "{}", self.painter.heading("Connected peripheral:"))?;
        write!(f, "\n{}", PeripheralView::new(self.peripheral, self.painter))?;
        writeln!(f)?;
        write!(f, "\n{}", self.painter.heading("Listening on:"))?;
        write!(f, "\n{session}")
    }
}

/// One received notification.
pub(crate) struct ListenNotificationView<'a> {
    index: usize,
    notification: &'a Notification,
    painter: &'a Painter,
}

impl<'a> ListenNotificationView<'a> {
    pub(crate) fn new(index: usize, notification: &'a Notification, painter: &'a Painter) -> Self {
        Self {
            index,
            notification,
            painter,
        }
    }
}

impl Display for ListenNotificationView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let received_at = self
            .notification
            .received_at()
            .format(&Rfc3339)
            .map_err(|_error| fmt::Error)?;
        write!(
            f,
            "{} {} {}",
            self.painter.muted(format!("[{:04}]", self.index)),
            self.painter.value(format_hex(self.notification.payload())),
            self.painter.muted(received_at)
        )
    }
}

/// Closing line of a listen session.
pub(crate) struct ListenSummaryView<'a> {
    summary: &'a ListenSummary,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(summary: &'a ListenSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = self.summary.stop_reason().to_string();
        let reason = match self.summary.stop_reason() {
            ListenStopReason::ReachedLimit(_) => self.painter.success(reason),
            ListenStopReason::IdleTimeout(_) | ListenStopReason::LinkLost => {
                self.painter.warning(reason)
            }
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            reason,
            self.painter.value(format!(
                "- received {} notification(s)",
                self.summary.received()
            ))
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use uuid::Uuid;

    use super::*;
    use crate::central::{CharProperty, CharacteristicRef, PeripheralId};

    fn peripheral() -> PeripheralInfo {
        PeripheralInfo::new(PeripheralId::from("AA:BB:CC"), Some("Thermo".into()), Some(-43))
    }

    #[test]
    fn ready_view_names_characteristic_and_properties() {
        let painter = Painter::new(false);
        let characteristic = CharacteristicInfo::new(
            Uuid::from_u128(0x180f),
            Uuid::from_u128(0x2a19),
            vec![CharProperty::Read, CharProperty::Notify],
        );
        let found = peripheral();
        let rendered = ListenReadyView::new(&found, &characteristic, &painter).to_string();

        assert!(rendered.starts_with("Connected peripheral:"));
        assert!(rendered.contains("Listening on:"));
        assert!(rendered.contains("read, notify"));
        assert!(rendered.contains(&Uuid::from_u128(0x2a19).to_string()));
    }

    #[test]
    fn notification_line_shows_index_and_payload() {
        let painter = Painter::new(false);
        let notification = Notification::new(Uuid::nil(), vec![0x05, 0x00, 0x64]);
        let rendered = ListenNotificationView::new(42, &notification, &painter).to_string();

        assert!(rendered.starts_with("[0042] 05 00 64 "));
    }

    #[rstest]
    #[case::reached_limit(ListenStopReason::ReachedLimit(5), "Stopped: reached limit of 5 notification(s) - received 5 notification(s)")]
    #[case::link_lost(ListenStopReason::LinkLost, "Stopped: link lost - received 5 notification(s)")]
    fn summary_names_stop_reason(#[case] reason: ListenStopReason, #[case] expected: &str) {
        let painter = Painter::new(false);
        let summary = ListenSummary::new(
            peripheral(),
            CharacteristicRef::new(Uuid::nil(), Uuid::nil()),
            5,
            reason,
        );
        assert_eq!(expected, ListenSummaryView::new(&summary, &painter).to_string());
    }
}
