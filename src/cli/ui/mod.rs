mod listen_view;
mod painter;
mod peripheral_view;
mod table;
mod write_view;

pub(crate) use self::listen_view::{ListenNotificationView, ListenReadyView, ListenSummaryView};
pub(crate) use self::painter::Painter;
pub(crate) use self::peripheral_view::ScanResultView;
pub(crate) use self::write_view::WriteReportView;
