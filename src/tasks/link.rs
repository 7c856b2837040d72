use embassy_executor::task;
use embassy_futures::select::{select, Either};
use embassy_stm32::peripherals::{DMA1_CH1, USART3};
use embassy_stm32::usart::UartRx;
use embassy_time::{Duration, Instant, Timer};

use crate::drivers::dsm::{DsmFrame, DsmParser};
use crate::state::{self, CoreMode, DisarmReason, FlightMode, StickInput};

/// No frames for this long -> descend on our own.
const LAND_TIMEOUT: Duration = Duration::from_millis(300);
/// No frames for this long -> the flight is over.
const DISARM_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll window; also the timeout-check cadence (~100 Hz).
const POLL_WINDOW: Duration = Duration::from_millis(10);

/// Link watcher: decodes DSM2 satellite frames into pilot intent and
/// escalates loss-of-link through emergency-land to disarm. Timeouts are
/// armed only after the first good frame so a cold start without a
/// transmitter is not a loss of link.
#[task]
pub async fn link_task(mut radio_rx: UartRx<'static, USART3, DMA1_CH1>) {
    let mut parser = DsmParser::new();
    let mut buf = [0u8; 64];
    let mut last_frame: Option<Instant> = None;
    let mut mode_switch_high: Option<bool> = None;

    loop {
        if state::exiting() {
            defmt::info!("link watcher stopped");
            return;
        }

        match select(radio_rx.read_until_idle(&mut buf), Timer::after(POLL_WINDOW)).await {
            Either::First(Ok(n)) => {
                if let Some(frame) = parser.push_bytes(&buf[..n]) {
                    last_frame = Some(Instant::now());
                    apply_frame(&frame, &mut mode_switch_high);
                }
            }
            // A UART error counts as a missed frame; the timeouts cover it.
            Either::First(Err(_)) => {}
            Either::Second(()) => {}
        }

        let Some(t) = last_frame else { continue };
        let elapsed = Instant::now() - t;

        if elapsed > LAND_TIMEOUT && state::flight_mode() != FlightMode::EmergencyLand {
            defmt::warn!("link silent for {} ms: emergency land", elapsed.as_millis());
            state::set_flight_mode(FlightMode::EmergencyLand);
            state::USER_INPUT.lock(|c| {
                let mut input = c.get();
                input.throttle = -1.0;
                input.roll = 0.0;
                input.pitch = 0.0;
                input.yaw = 0.0;
                c.set(input);
            });
        }
        if elapsed > DISARM_TIMEOUT && state::core_mode() != CoreMode::Disarmed {
            state::disarm(DisarmReason::LinkLost);
        }
    }
}

fn apply_frame(frame: &DsmFrame, mode_switch_high: &mut Option<bool>) {
    let switch_high = frame.channel_normalized(5) > 0.0;
    let input = StickInput {
        throttle: frame.channel_normalized(0),
        // Aileron and elevator come in reversed from the transmitter.
        roll: -frame.channel_normalized(1),
        pitch: -frame.channel_normalized(2),
        yaw: frame.channel_normalized(3),
        kill_switch: frame.channel_normalized(4) < 0.0,
        requested_mode: mode_from_switch(switch_high),
    };
    state::USER_INPUT.lock(|c| c.set(input));

    // The flight mode follows switch *movement*, not position: recovering
    // from an emergency requires the pilot to re-select a mode deliberately.
    if *mode_switch_high != Some(switch_high) {
        state::set_flight_mode(input.requested_mode);
        *mode_switch_high = Some(switch_high);
    }
}

fn mode_from_switch(_high: bool) -> FlightMode {
    // Single flight mode for now; both switch positions fly attitude.
    FlightMode::UserAttitude
}
