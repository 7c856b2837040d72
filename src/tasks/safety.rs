use embassy_executor::task;
use embassy_stm32::adc::Adc;
use embassy_stm32::peripherals::{ADC1, PC2};
use embassy_time::{Duration, Ticker};
use micromath::F32Ext;

use crate::state::{self, CoreMode, DisarmReason};

/// Attitude beyond this is a tipover, rad.
const TIP_THRESHOLD: f32 = 1.5;

/// Battery sense: 12-bit ADC behind a 10k:1k divider.
const ADC_FULL_SCALE: f32 = 4095.0;
const ADC_REF_VOLTS: f32 = 3.3;
const VBATT_DIVIDER: f32 = 11.0;

/// Safety supervisor, 20 Hz: disarms on tipover and keeps the shared battery
/// voltage fresh for the core state, log and telemetry.
#[task]
pub async fn safety_task(mut adc: Adc<'static, ADC1>, mut vbat_pin: PC2) {
    let mut ticker = Ticker::every(Duration::from_hz(20));
    let mut low_warned = false;

    loop {
        ticker.next().await;
        if state::exiting() {
            defmt::info!("safety supervisor stopped");
            return;
        }

        let raw = adc.read(&mut vbat_pin);
        let volts = raw as f32 / ADC_FULL_SCALE * ADC_REF_VOLTS * VBATT_DIVIDER;
        state::set_battery_volts(volts);

        let cfg = state::CONFIG.lock(|c| c.get());
        if volts < cfg.low_battery_volts {
            if !low_warned {
                defmt::warn!("battery low: {} V", volts);
                low_warned = true;
            }
        } else {
            low_warned = false;
        }

        if state::core_mode() != CoreMode::Disarmed {
            let t = state::CORE_TELEM.lock(|c| c.get());
            if t.roll.abs() > TIP_THRESHOLD || t.pitch.abs() > TIP_THRESHOLD {
                defmt::warn!("tipover: roll={} pitch={}", t.roll, t.pitch);
                state::disarm(DisarmReason::Tipover);
            }
        }
    }
}
