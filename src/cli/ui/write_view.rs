use std::fmt::{self, Display, Formatter};

use crate::cli::write::WriteReport;
use crate::utils::format_hex;

use super::painter::Painter;
use super::table::Table;

/// Renders a delivered write.
pub(crate) struct WriteReportView<'a> {
    report: &'a WriteReport,
    painter: &'a Painter,
}

impl<'a> WriteReportView<'a> {
    pub(crate) fn new(report: &'a WriteReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }
}

impl Display for WriteReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                (
                    "device_id",
                    self.painter.value(self.report.peripheral().id().as_str()),
                ),
                (
                    "characteristic",
                    self.painter.value(self.report.characteristic().to_string()),
                ),
                ("mode", self.painter.muted(self.report.kind().to_string())),
                ("payload", self.painter.value(format_hex(self.report.payload()))),
            ],
        );
        write!(
            f,
            "{}",
            self.painter
                .success(format!("Wrote {} byte(s):", self.report.payload().len()))
        )?;
        write!(f, "\n{table}")
    }
}
