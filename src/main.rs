#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

mod arming;
mod board;
mod config;
mod drivers;
mod flight_core;
mod state;
mod tasks;
mod usb;

use embassy_executor::Spawner;
use embassy_stm32::adc::Adc;
use embassy_stm32::dma::NoDma;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Level, Output, OutputType, Pin, Pull, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::usart::{Config as UsartConfig, UartRx, UartTx};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_time::{Delay, Duration, Timer};
use heapless::spsc::Queue;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::board::Board;
use crate::drivers::esc::QuadEsc;
use crate::drivers::flash::W25qxx;
use crate::drivers::imu::Mpu9150;
use crate::drivers::leds::StatusLeds;
use crate::state::CoreTelem;

// ── Operator options (the process flags of the bench build) ───────────────────
/// Drain the per-tick flight log to the blackbox UART.
const BLACKBOX_ENABLED: bool = true;
/// Suppress the 5 Hz status line on the USB console.
const CONSOLE_QUIET: bool = false;
/// Stream MAVLink to the ground station radio.
const TELEMETRY_ENABLED: bool = true;
const MAV_SYSTEM_ID: u8 = 1;
const MAV_COMPONENT_ID: u8 = 1;

/// Sensor-to-mount axis map handed to the IMU at init.
const IMU_MOUNT_MATRIX: [i8; 9] = [1, 0, 0, 0, 1, 0, 0, 0, 1];

// ── Flight log queue (core produces, blackbox writer drains) ──────────────────
pub const LOG_QUEUE_DEPTH: usize = 64;
static LOG_QUEUE: StaticCell<Queue<CoreTelem, LOG_QUEUE_DEPTH>> = StaticCell::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    I2C1_EV  => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER  => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
    USART3   => embassy_stm32::usart::InterruptHandler<peripherals::USART3>;
});

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;

    // 2. USB CDC-ACM operator console
    let (usb_dev, usb_serial) = usb::init(p.USB_OTG_FS, p.PA12, p.PA11);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();

    // 3. I2C1 @ 400 kHz — MPU-9150 IMU (SCL=PB8, SDA=PB9)
    let mut i2c = I2c::new(
        p.I2C1,
        p.PB8,
        p.PB9,
        Irqs,
        p.DMA1_CH7,
        p.DMA1_CH0,
        TimeHertz(400_000),
        Default::default(),
    );

    // IMU data-ready line paces the flight core (PC4, EXTI4)
    let imu_int = ExtiInput::new(Input::new(p.PC4, Pull::Down), p.EXTI4);

    // 4. SPI1 @ 8 MHz — W25Q config flash (SCK=PA5, MOSI=PA7, MISO=PA6, CS=PB12)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(8_000_000);
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_config);
    let cs_flash = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);
    let mut flash = W25qxx::new(spi, cs_flash);
    if flash.read_id().is_err() {
        defmt::warn!("config flash not responding");
    }

    // 5. ESC outputs — TIM3 CH1..CH4 on PC6..PC9 at the 200 Hz control rate
    let pwm = SimplePwm::new(
        p.TIM3,
        Some(PwmPin::new_ch1(p.PC6, OutputType::PushPull)),
        Some(PwmPin::new_ch2(p.PC7, OutputType::PushPull)),
        Some(PwmPin::new_ch3(p.PC8, OutputType::PushPull)),
        Some(PwmPin::new_ch4(p.PC9, OutputType::PushPull)),
        TimeHertz(flight_core::LOOP_HZ as u32),
        Default::default(),
    );
    let esc = QuadEsc::new(pwm);

    // 6. DSM2 satellite receiver — USART3 RX (PB11) @ 115200
    let mut radio_config = UsartConfig::default();
    radio_config.baudrate = 115_200;
    let radio_rx = UartRx::new(p.USART3, Irqs, p.PB11, p.DMA1_CH1, radio_config).unwrap();

    // 7. MAVLink downlink radio — UART4 TX (PA0) @ 57600
    let mut mav_config = UsartConfig::default();
    mav_config.baudrate = 57_600;
    let downlink = UartTx::new(p.UART4, p.PA0, p.DMA1_CH4, mav_config).unwrap();

    // 8. Blackbox serial logger — USART1 TX (PA9) @ 921600
    let mut bb_config = UsartConfig::default();
    bb_config.baudrate = 921_600;
    let blackbox_uart = UartTx::new(p.USART1, p.PA9, p.DMA2_CH7, bb_config).unwrap();

    // 9. Status LEDs (red=PC13, green=PC14) and pause button (PB2, EXTI2)
    let mut leds = StatusLeds::new(
        Output::new(p.PC13.degrade(), Level::Low, Speed::Low),
        Output::new(p.PC14.degrade(), Level::Low, Speed::Low),
    );
    let button = ExtiInput::new(Input::new(p.PB2, Pull::Up), p.EXTI2);

    // 10. Battery sense — ADC1 on PC2 behind an 11:1 divider
    let adc = Adc::new(p.ADC1, &mut Delay);

    // 11. IMU bring-up. No inertial data means no flight: report and halt
    //     with the fault indication instead of spawning anything.
    Timer::after(Duration::from_millis(100)).await;
    let mut imu = Mpu9150::new();
    if imu
        .init(&mut i2c, flight_core::LOOP_HZ as u16, IMU_MOUNT_MATRIX)
        .await
        .is_err()
    {
        defmt::error!("IMU init failed, staying down");
        leds.set_red(true);
        return;
    }

    // 12. Config from NOR flash; defaults are materialized on first boot
    let cfg = config::load_or_default(&mut flash);
    state::CONFIG.lock(|c| c.set(cfg));

    let (log_tx, log_rx) = LOG_QUEUE.init(Queue::new()).split();

    // 13. Spawn the fabric
    spawner
        .spawn(tasks::core_loop::core_loop_task(
            i2c,
            imu,
            imu_int,
            esc,
            log_tx,
            BLACKBOX_ENABLED,
        ))
        .unwrap();
    spawner
        .spawn(tasks::flight_stack::flight_stack_task(flash))
        .unwrap();
    spawner.spawn(tasks::link::link_task(radio_rx)).unwrap();
    spawner.spawn(tasks::safety::safety_task(adc, p.PC2)).unwrap();
    spawner.spawn(tasks::indicator::indicator_task(leds)).unwrap();
    spawner.spawn(tasks::button::button_task(button)).unwrap();
    if TELEMETRY_ENABLED {
        spawner
            .spawn(tasks::telemetry::telemetry_task(
                downlink,
                MAV_SYSTEM_ID,
                MAV_COMPONENT_ID,
            ))
            .unwrap();
    }
    if BLACKBOX_ENABLED {
        spawner
            .spawn(tasks::blackbox::blackbox_task(blackbox_uart, log_rx))
            .unwrap();
    }
    if !CONSOLE_QUIET {
        spawner.spawn(tasks::printer::printer_task(usb_serial)).unwrap();
    }

    defmt::info!("autopilot up, disarmed");

    // 14. Idle supervisor: wait out the flight, let the tasks wind down
    loop {
        Timer::after(Duration::from_millis(500)).await;
        if state::exiting() {
            defmt::info!("shutdown");
            return;
        }
    }
}
