//! Schedule entries, solar configuration and the per-relay schedule table.

pub mod entry;
pub mod table;

pub use entry::{ScheduleEntry, SunConfig, schedules_from_value};
pub use table::{
    ScheduleTable, SolarWindow, is_solar_name, local_midnight, next_fire, next_local_midnight,
};
