use embassy_executor::task;
use embassy_stm32::peripherals::SPI1;
use embassy_time::{Duration, Ticker};

use crate::arming;
use crate::drivers::flash::W25qxx;
use crate::state::{self, CoreMode, DisarmReason, FlightMode};

/// Throttle held while descending on loss of link: enough to come down
/// slowly, not enough to climb.
const EMERGENCY_LAND_THR: f32 = 0.15;

/// Flight stack, ~100 Hz: maps pilot intent and flight mode into the core
/// setpoint. While the core is disarmed it parks inside the arming
/// supervisor, so the setpoint only moves when the craft may actually fly.
#[task]
pub async fn flight_stack_task(mut flash: W25qxx<'static, SPI1>) {
    let mut ticker = Ticker::every(Duration::from_hz(100));
    let mut last_mode = state::flight_mode();

    loop {
        ticker.next().await;
        if state::exiting() {
            defmt::info!("flight stack stopped");
            return;
        }

        let input = state::USER_INPUT.lock(|c| c.get());
        let fmode = state::flight_mode();
        if fmode != last_mode {
            defmt::info!("flight mode -> {}", fmode);
            last_mode = fmode;
        }

        if input.kill_switch || fmode == FlightMode::EmergencyKill {
            state::disarm(DisarmReason::KillSwitch);
        }

        if state::core_mode() == CoreMode::Disarmed {
            if !arming::arm_sequence(&mut flash).await {
                return;
            }
            continue;
        }

        let cfg = state::CONFIG.lock(|c| c.get());
        let mut sp = state::SETPOINT.lock(|c| c.get());
        match fmode {
            FlightMode::UserAttitude => {
                sp.throttle = (input.throttle + 1.0) / 2.0;
                sp.roll = input.roll * cfg.max_roll_setpoint;
                sp.pitch = input.pitch * cfg.max_pitch_setpoint;
                sp.yaw_rate = input.yaw * cfg.max_yaw_rate;
            }
            FlightMode::EmergencyLand => {
                sp.throttle = EMERGENCY_LAND_THR;
                sp.roll = 0.0;
                sp.pitch = 0.0;
                sp.yaw_rate = 0.0;
            }
            // Kill is handled above; the reserved modes hold the last
            // setpoint until their outer loops exist.
            FlightMode::EmergencyKill
            | FlightMode::Loiter
            | FlightMode::Cartesian
            | FlightMode::Radial
            | FlightMode::TargetHold => {}
        }
        state::SETPOINT.lock(|c| c.set(sp));
    }
}
