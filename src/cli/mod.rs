pub(crate) mod command;
mod gatt;
pub(crate) mod listen;
pub(crate) mod scan;
pub(crate) mod ui;
pub(crate) mod write;

pub use self::command::{Args, Backend, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::listen::{ListenArgs, ListenStopReason, ListenSummary};
pub use self::scan::ScanArgs;
pub use self::write::{WriteArgs, WriteReport};
