use embassy_executor::task;
use embassy_time::{Duration, Ticker};

use crate::drivers::leds::StatusLeds;
use crate::state::{self, CoreMode};

/// Status indicator: red flashing at 1 Hz while disarmed, solid green while
/// armed.
#[task]
pub async fn indicator_task(mut leds: StatusLeds) {
    let mut ticker = Ticker::every(Duration::from_millis(500));

    loop {
        ticker.next().await;
        if state::exiting() {
            leds.set_red(false);
            leds.set_green(false);
            return;
        }

        if state::core_mode() == CoreMode::Disarmed {
            leds.set_green(false);
            leds.toggle_red();
        } else {
            leds.set_red(false);
            leds.set_green(true);
        }
    }
}
