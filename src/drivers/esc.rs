/// Four-channel ESC output: one standard servo pulse per motor per control
/// tick. The timer runs at the control rate so each duty write is emitted
/// exactly once before the next tick overwrites it.
use embassy_stm32::timer::simple_pwm::SimplePwm;
use embassy_stm32::timer::{CaptureCompare16bitInstance, Channel};

/// Pulse band accepted by the ESCs, microseconds.
pub const PULSE_MIN_US: u32 = 1000;
pub const PULSE_MAX_US: u32 = 2000;
/// Timer period at the 200 Hz update rate.
const PERIOD_US: u32 = 5000;

const CHANNELS: [Channel; 4] = [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4];

pub struct QuadEsc<'d, T: CaptureCompare16bitInstance> {
    pwm: SimplePwm<'d, T>,
    max_duty: u32,
}

impl<'d, T: CaptureCompare16bitInstance> QuadEsc<'d, T> {
    /// Takes a timer already configured for the 200 Hz period with all four
    /// compare channels routed to the motor pads. Outputs start silent.
    pub fn new(pwm: SimplePwm<'d, T>) -> Self {
        let max_duty = pwm.get_max_duty() as u32;
        let mut esc = Self { pwm, max_duty };
        for ch in CHANNELS {
            esc.pwm.set_duty(ch, 0);
            esc.pwm.enable(ch);
        }
        esc
    }

    /// Emit a pulse on motor `motor` (0..4): 0.0 maps to the minimum
    /// calibration pulse, 1.0 to full width.
    pub fn send_pulse_normalized(&mut self, motor: usize, x: f32) {
        let x = x.clamp(0.0, 1.0);
        let width_us = PULSE_MIN_US + (x * (PULSE_MAX_US - PULSE_MIN_US) as f32) as u32;
        let duty = (width_us * self.max_duty / PERIOD_US) as u16;
        self.pwm.set_duty(CHANNELS[motor], duty);
    }

    /// Minimum-width pulse on every channel (ESC wake / calibration floor).
    pub fn send_min_pulse_all(&mut self) {
        for motor in 0..4 {
            self.send_pulse_normalized(motor, 0.0);
        }
    }

    /// Stop producing pulses entirely.
    pub fn silence(&mut self) {
        for ch in CHANNELS {
            self.pwm.set_duty(ch, 0);
        }
    }
}
