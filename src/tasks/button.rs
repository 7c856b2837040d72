use embassy_executor::task;
use embassy_futures::select::{select, Either};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::peripherals::PB2;
use embassy_time::{Duration, Timer};

use crate::state::{self, DisarmReason, SystemState};

const DEBOUNCE: Duration = Duration::from_millis(30);
const LONG_PRESS: Duration = Duration::from_secs(2);

/// Pause button (active low). Short press: disarm and toggle pause.
/// Long press: shut the whole system down.
#[task]
pub async fn button_task(mut button: ExtiInput<'static, PB2>) {
    loop {
        if state::exiting() {
            return;
        }
        button.wait_for_falling_edge().await;
        Timer::after(DEBOUNCE).await;

        match select(button.wait_for_high(), Timer::after(LONG_PRESS)).await {
            Either::First(()) => match state::system_state() {
                SystemState::Running => {
                    state::disarm(DisarmReason::PauseButton);
                    state::set_system_state(SystemState::Paused);
                    defmt::info!("paused");
                }
                SystemState::Paused => {
                    state::set_system_state(SystemState::Running);
                    defmt::info!("resumed");
                }
                SystemState::Exiting => return,
            },
            Either::Second(()) => {
                defmt::info!("pause button held: shutting down");
                state::disarm(DisarmReason::Shutdown);
                state::set_system_state(SystemState::Exiting);
                return;
            }
        }
        Timer::after(DEBOUNCE).await;
    }
}
