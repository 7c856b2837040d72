use embassy_executor::task;
use embassy_stm32::peripherals::{DMA1_CH4, UART4};
use embassy_stm32::usart::UartTx;
use embassy_time::{Duration, Instant, Ticker};

use crate::drivers::mavlink::{
    self, MavWriter, MAV_MAX_FRAME, MAV_MODE_FLAG_SAFETY_ARMED, MAV_STATE_ACTIVE,
    MAV_STATE_STANDBY, MSG_ID_ATTITUDE, MSG_ID_HEARTBEAT, MSG_ID_SYS_STATUS,
};
use crate::state::{self, CoreMode};

/// MAVLink downlink: ATTITUDE at 10 Hz, HEARTBEAT and SYS_STATUS at 1 Hz.
#[task]
pub async fn telemetry_task(
    mut downlink: UartTx<'static, UART4, DMA1_CH4>,
    system_id: u8,
    component_id: u8,
) {
    let mut writer = MavWriter::new(system_id, component_id);
    let mut frame = [0u8; MAV_MAX_FRAME];
    let mut ticker = Ticker::every(Duration::from_hz(10));
    let mut tick: u32 = 0;

    loop {
        ticker.next().await;
        if state::exiting() {
            defmt::info!("telemetry stopped");
            return;
        }
        tick = tick.wrapping_add(1);

        let t = state::CORE_TELEM.lock(|c| c.get());
        let armed = state::core_mode() != CoreMode::Disarmed;

        let n = writer.build_frame(
            &mut frame,
            MSG_ID_ATTITUDE,
            &mavlink::payload_attitude(
                Instant::now().as_millis() as u32,
                t.roll,
                t.pitch,
                t.yaw,
                t.droll,
                t.dpitch,
                t.dyaw,
            ),
        );
        let _ = downlink.write(&frame[..n]).await;

        if tick % 10 == 1 {
            let base_mode = if armed { MAV_MODE_FLAG_SAFETY_ARMED } else { 0 };
            let status = if armed { MAV_STATE_ACTIVE } else { MAV_STATE_STANDBY };
            let n = writer.build_frame(
                &mut frame,
                MSG_ID_HEARTBEAT,
                &mavlink::payload_heartbeat(state::flight_mode() as u32, base_mode, status),
            );
            let _ = downlink.write(&frame[..n]).await;

            let n = writer.build_frame(
                &mut frame,
                MSG_ID_SYS_STATUS,
                &mavlink::payload_sys_status((t.vbatt * 1000.0) as u16, 0),
            );
            let _ = downlink.write(&frame[..n]).await;
        }
    }
}
