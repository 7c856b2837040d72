use core::fmt::Write;

use embassy_executor::task;
use embassy_time::{Duration, Ticker};

use crate::state;
use crate::usb::UsbSerial;

/// Operator console: one human-readable status line at 5 Hz over USB, for
/// bench work with the craft on a cable.
#[task]
pub async fn printer_task(mut console: UsbSerial<'static>) {
    let mut ticker = Ticker::every(Duration::from_hz(5));

    loop {
        ticker.next().await;
        if state::exiting() {
            return;
        }
        if !console.dtr() {
            continue;
        }

        let t = state::CORE_TELEM.lock(|c| c.get());
        let sp = state::SETPOINT.lock(|c| c.get());

        let mut line = heapless::String::<160>::new();
        let _ = write!(
            line,
            "[{}|{}] r={:.2} p={:.2} y={:.2} thr={:.2} esc=[{:.2} {:.2} {:.2} {:.2}] vbat={:.1}\r\n",
            core_mode_tag(),
            flight_mode_tag(),
            t.roll,
            t.pitch,
            t.yaw,
            sp.throttle,
            t.esc[0],
            t.esc[1],
            t.esc[2],
            t.esc[3],
            t.vbatt
        );
        let _ = console.write_packet(line.as_bytes()).await;
    }
}

fn core_mode_tag() -> &'static str {
    match state::core_mode() {
        state::CoreMode::Disarmed => "DISARMED",
        state::CoreMode::Attitude => "ATTITUDE",
        state::CoreMode::Position => "POSITION",
    }
}

fn flight_mode_tag() -> &'static str {
    match state::flight_mode() {
        state::FlightMode::UserAttitude => "USER",
        state::FlightMode::EmergencyLand => "E-LAND",
        state::FlightMode::EmergencyKill => "E-KILL",
        state::FlightMode::Loiter => "LOITER",
        state::FlightMode::Cartesian => "CART",
        state::FlightMode::Radial => "RADIAL",
        state::FlightMode::TargetHold => "TGT",
    }
}
