use core::sync::atomic::Ordering;

use embassy_executor::task;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::{DMA1_CH0, DMA1_CH7, I2C1, PC4, TIM3};
use embassy_time::{with_timeout, Duration};
use heapless::spsc::Producer;

use crate::drivers::esc::QuadEsc;
use crate::drivers::imu::Mpu9150;
use crate::flight_core::FlightCore;
use crate::state::{self, CoreTelem, DisarmReason};

/// A data-ready edge that takes longer than this means the sample was lost;
/// the tick is skipped, never interpolated.
const SAMPLE_WAIT: Duration = Duration::from_millis(15);

/// Flight core, paced by the IMU data-ready line at 200 Hz. Highest-priority
/// path in the system: between the sample read and the actuator write there
/// are no await points and no locks held across other tasks' writes.
#[task]
pub async fn core_loop_task(
    mut i2c: I2c<'static, I2C1, DMA1_CH7, DMA1_CH0>,
    mut imu: Mpu9150,
    mut imu_int: ExtiInput<'static, PC4>,
    mut esc: QuadEsc<'static, TIM3>,
    mut log_tx: Producer<'static, CoreTelem>,
    blackbox: bool,
) {
    let mut core = FlightCore::new(&state::CONFIG.lock(|c| c.get()));

    loop {
        if state::exiting() {
            state::disarm(DisarmReason::Shutdown);
            esc.silence();
            defmt::info!("flight core stopped");
            return;
        }

        if with_timeout(SAMPLE_WAIT, imu_int.wait_for_rising_edge())
            .await
            .is_err()
        {
            continue;
        }
        let sample = match imu.read_sample(&mut i2c).await {
            Ok(s) => s,
            Err(_) => continue, // transient sensor miss: skip the tick
        };

        let mode = state::core_mode();
        let sp = state::SETPOINT.lock(|c| c.get());
        let cfg = state::CONFIG.lock(|c| c.get());
        core.vbatt = state::battery_volts();

        match core.tick(&sample, &sp, &cfg, mode) {
            Some(out) => {
                for (motor, x) in out.iter().enumerate() {
                    esc.send_pulse_normalized(motor, *x);
                }
                if blackbox {
                    // The queue is SPSC and bounded; a full queue drops the
                    // row rather than ever blocking this path.
                    let _ = log_tx.enqueue(core.telem());
                }
            }
            None => {
                // Disarmed. The only pulses allowed out are the minimum-width
                // wake burst the arming supervisor may have queued.
                let wake = state::ESC_WAKE_PULSES
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
                if wake.is_ok() {
                    esc.send_min_pulse_all();
                } else {
                    esc.silence();
                }
            }
        }

        state::CORE_TELEM.lock(|c| c.set(core.telem()));
    }
}
