//! Node status report
//!
//! Text shown on `AT+STATUS=?` and announced once after start-up.

use core::fmt::Write;

use crate::catalog::{Catalog, ModuleKind, SlotState};
use crate::settings::Settings;

pub const DEFAULT_NAME: &str = "WisBlock Node";

/// Name a module gives the node when it's active.
fn name_of(kind: ModuleKind) -> Option<&'static str> {
    match kind {
        ModuleKind::Rak1903 | ModuleKind::Rak12010 => Some("WisBlock Weather Station"),
        ModuleKind::Rak1906 | ModuleKind::Rak12037 => Some("WisBlock Environment Sensor"),
        ModuleKind::Rak12047 => Some("WisBlock VOC Sensor"),
        ModuleKind::Rak12500 => Some("WisBlock Location Tracker"),
        _ => None,
    }
}

/// Device name derived from the active modules.
///
/// Modules are considered in init order; the last one that names the node
/// wins.
pub fn device_name<const N: usize>(catalog: &Catalog<N>) -> &'static str {
    catalog
        .arbitration_order()
        .iter()
        .filter_map(|id| catalog.slot(*id))
        .filter(|slot| slot.state == SlotState::Active)
        .filter_map(|slot| name_of(slot.kind()))
        .last()
        .unwrap_or(DEFAULT_NAME)
}

/// One `+EVT:<part> OK` line per active module, in slot order.
pub fn announce<W: Write, const N: usize>(out: &mut W, catalog: &Catalog<N>) -> core::fmt::Result {
    for slot in catalog.active() {
        write!(out, "+EVT:{} OK\r\n", slot.kind().part())?;
    }
    Ok(())
}

/// Full status: name, send interval, active modules.
pub fn write_status<W: Write, const N: usize>(
    out: &mut W,
    catalog: &Catalog<N>,
    settings: &Settings,
) -> core::fmt::Result {
    write!(out, "Device name: {}\r\n", device_name(catalog))?;
    match settings.send_interval_ms {
        0 => write!(out, "Send time: off\r\n")?,
        ms => write!(out, "Send time: {} s\r\n", ms / 1000)?,
    }
    write!(out, "Modules found:\r\n")?;
    announce(out, catalog)
}
