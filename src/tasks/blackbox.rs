use core::fmt::Write;

use embassy_executor::task;
use embassy_stm32::peripherals::{DMA2_CH7, USART1};
use embassy_stm32::usart::UartTx;
use embassy_time::{Duration, Timer};
use heapless::spsc::Consumer;

use crate::state::{self, CoreTelem};

const HEADER: &[u8] =
    b"loop,roll,pitch,yaw,droll,dpitch,dyaw,u0,u1,u2,u3,esc0,esc1,esc2,esc3,vbatt\r\n";

/// Blackbox writer: drains the core's log queue to the logger UART as CSV,
/// one fixed-column row per control tick. The producer side never blocks;
/// this side just has to keep the queue from filling.
#[task]
pub async fn blackbox_task(
    mut sink: UartTx<'static, USART1, DMA2_CH7>,
    mut rows: Consumer<'static, CoreTelem>,
) {
    let _ = sink.write(HEADER).await;

    loop {
        let stopping = state::exiting();
        while let Some(row) = rows.dequeue() {
            let mut line = heapless::String::<192>::new();
            if write_row(&mut line, &row).is_ok() {
                let _ = sink.write(line.as_bytes()).await;
            }
        }
        if stopping {
            // Queue drained after the core stopped producing: log is flushed.
            defmt::info!("blackbox flushed");
            return;
        }
        Timer::after(Duration::from_millis(10)).await;
    }
}

fn write_row(line: &mut heapless::String<192>, r: &CoreTelem) -> core::fmt::Result {
    write!(
        line,
        "{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{:.2}\r\n",
        r.loops,
        r.roll,
        r.pitch,
        r.yaw,
        r.droll,
        r.dpitch,
        r.dyaw,
        r.u[0],
        r.u[1],
        r.u[2],
        r.u[3],
        r.esc[0],
        r.esc[1],
        r.esc[2],
        r.esc[3],
        r.vbatt
    )
}
