/// Arming supervisor: a blocking gesture recognizer. The flight stack parks
/// here whenever the core is disarmed, and nothing re-arms the craft except
/// a completed sequence:
///
///   level craft -> kill switch off -> throttle down, up, down -> still level
///
/// then the ESCs get a burst of minimum-width pulses (emitted by the core at
/// its own 200 Hz cadence), the config is re-read from flash, and the core
/// mode latch is released to ATTITUDE.
use core::sync::atomic::Ordering;

use embassy_stm32::spi::Instance;
use embassy_time::{Duration, Timer};
use micromath::F32Ext;

use crate::config;
use crate::drivers::flash::W25qxx;
use crate::state;

/// Largest attitude at which arming is allowed, rad.
const ARM_TIP_THRESHOLD: f32 = 0.20;
/// Stick deflection counted as fully down / fully up.
const STICK_GATE: f32 = 0.9;
/// Gesture polls run at 10 Hz.
const POLL: Duration = Duration::from_millis(100);
/// Minimum pulses sent to wake the ESCs out of calibration mode.
const WAKE_PULSES: u8 = 10;
/// Wake pulses span 50 ms of core ticks; leave margin before arming.
const ESC_WAKE_SETTLE_MS: u64 = 80;

/// Runs the full gesture. Returns `false` when shutdown was requested while
/// waiting; the craft is then still disarmed.
pub async fn arm_sequence<T: Instance>(flash: &mut W25qxx<'_, T>) -> bool {
    defmt::info!("waiting for arm gesture");
    loop {
        if !wait_until(is_level).await {
            return false;
        }
        if !wait_until(|| !state::USER_INPUT.lock(|c| c.get()).kill_switch).await {
            return false;
        }
        if !wait_for_throttle(|t| t < -STICK_GATE).await {
            return false;
        }
        if !wait_for_throttle(|t| t > STICK_GATE).await {
            return false;
        }
        if !wait_for_throttle(|t| t < -STICK_GATE).await {
            return false;
        }
        // The gesture takes time; a craft knocked over mid-sequence must not
        // arm. Restart from the top instead.
        if is_level() {
            break;
        }
        defmt::warn!("arm gesture aborted: craft not level");
    }

    // Hand the ESC wake burst to the core; one pulse per control tick.
    state::ESC_WAKE_PULSES.store(WAKE_PULSES, Ordering::Release);
    Timer::after(Duration::from_millis(ESC_WAKE_SETTLE_MS)).await;

    // Ground tuning takes effect now: re-read gains before the core builds
    // its controllers on the first armed tick.
    let cfg = config::load_or_default(flash);
    state::CONFIG.lock(|c| c.set(cfg));

    state::arm();
    true
}

fn is_level() -> bool {
    let t = state::CORE_TELEM.lock(|c| c.get());
    t.roll.abs() < ARM_TIP_THRESHOLD && t.pitch.abs() < ARM_TIP_THRESHOLD
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    loop {
        if state::exiting() {
            return false;
        }
        if cond() {
            return true;
        }
        Timer::after(POLL).await;
    }
}

async fn wait_for_throttle(cond: impl Fn(f32) -> bool) -> bool {
    wait_until(|| cond(state::USER_INPUT.lock(|c| c.get()).throttle)).await
}
