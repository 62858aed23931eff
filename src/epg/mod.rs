//! EPG (Electronic Program Guide) module
//!
//! XMLTV parsing, the per-channel guide window and the controller that keeps
//! the window in sync with the selected channel.

mod controller;
mod parser;
mod window;

pub use controller::GuideController;
pub use parser::{
    parse_xmltv_time, GuideChannel, HttpScheduleSource, ProgrammeEvent, Schedule, ScheduleParser, ScheduleSource,
};
pub use window::{GuideBatch, GuideItem, GuideWindow, LoadTrigger, ProgrammeMarker};

use chrono::{DateTime, Local, Utc};

/// Format a UTC instant as local time HH:MM
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M").to_string()
}

/// Format a UTC instant as local datetime YYYY-MM-DD HH:MM
pub fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
