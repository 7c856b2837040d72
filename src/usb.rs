/// USB CDC-ACM operator console. One serial class on the full-speed OTG
/// port; the printer task writes status lines to it.
use core::mem::MaybeUninit;

use embassy_stm32::usb_otg::{self, Driver};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::{Builder, Config, UsbDevice};

bind_interrupts!(pub struct Irqs {
    OTG_FS => usb_otg::InterruptHandler<peripherals::USB_OTG_FS>;
});

pub type UsbDriver = Driver<'static, peripherals::USB_OTG_FS>;
pub type UsbSerial<'a> = CdcAcmClass<'a, UsbDriver>;

/// Descriptor and endpoint buffers must outlive the device; they live in one
/// static block that `init` hands out exactly once.
pub struct UsbResources<'a> {
    config_desc: [u8; 256],
    bos_desc: [u8; 256],
    control_buf: [u8; 64],
    state: MaybeUninit<State<'a>>,
    ep_out_buffer: [u8; 256],
}

impl<'a> UsbResources<'a> {
    pub const fn new() -> Self {
        Self {
            config_desc: [0; 256],
            bos_desc: [0; 256],
            control_buf: [0; 64],
            state: MaybeUninit::uninit(),
            ep_out_buffer: [0; 256],
        }
    }
}

static mut USB_RES: UsbResources<'static> = UsbResources::new();

#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

pub fn init(
    usb_periph: peripherals::USB_OTG_FS,
    pa12: peripherals::PA12,
    pa11: peripherals::PA11,
) -> (UsbDevice<'static, UsbDriver>, UsbSerial<'static>) {
    // `init` runs once before any task; taking the statics here is sound.
    let driver_buf = unsafe { &mut *(&raw mut USB_RES.ep_out_buffer) };
    let mut usb_config = embassy_stm32::usb_otg::Config::default();
    usb_config.vbus_detection = false;
    let driver = Driver::new_fs(usb_periph, Irqs, pa12, pa11, driver_buf, usb_config);

    let mut config = Config::new(0xc0de, 0xcafe);
    config.manufacturer = Some("quadrotor-autopilot");
    config.product = Some("Quadrotor Flight Core");
    config.serial_number = Some("00000001");

    let builder = unsafe {
        let res = &mut *(&raw mut USB_RES);
        Builder::new(
            driver,
            config,
            &mut res.config_desc,
            &mut res.bos_desc,
            &mut [], // msos descriptors
            &mut res.control_buf,
        )
    };

    let res = unsafe { &mut *(&raw mut USB_RES) };
    let console_state = res.state.write(State::new());

    let mut builder = builder;
    let console = CdcAcmClass::new(&mut builder, console_state, 64);
    let usb = builder.build();

    (usb, console)
}
