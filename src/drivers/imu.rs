/// MPU-9150 IMU in fused-sample mode: every read returns the three Euler
/// angles from the onboard complementary fusion together with the raw gyro
/// words, which is all the flight core consumes.
///
/// Angles are reported in the sensor frame; the board mounting (including
/// the swapped X/Y axes) is corrected downstream by the attitude estimator.
use core::f32::consts::PI;

use embassy_stm32::i2c::{Error, I2c, Instance, RxDma, TxDma};
use embassy_time::{Duration, Timer};
use micromath::F32Ext;

const ADDR: u8 = 0x68;

const REG_SMPLRT_DIV: u8 = 0x19;
const REG_CONFIG: u8 = 0x1A;
const REG_GYRO_CONFIG: u8 = 0x1B;
const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_INT_ENABLE: u8 = 0x38;
const REG_ACCEL_XOUT_H: u8 = 0x3B;
const REG_PWR_MGMT_1: u8 = 0x6B;
#[allow(dead_code)]
const REG_WHO_AM_I: u8 = 0x75;

/// Gyro full-scale range configured below (FS_SEL = 3).
pub const GYRO_FSR_DPS: f32 = 2000.0;
/// Accel at ±8 g -> 4096 LSB/g.
const ACCEL_LSB_PER_G: f32 = 4096.0;

/// Complementary-filter gyro weight.
const FUSION_ALPHA: f32 = 0.98;

/// One fused sample as consumed by the flight core.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImuSample {
    /// Fused Euler angles about the sensor X/Y/Z axes, rad, each in (-pi, pi].
    pub euler: [f32; 3],
    /// Raw 16-bit gyro words at `GYRO_FSR_DPS` full scale.
    pub gyro_raw: [i16; 3],
}

pub struct Mpu9150 {
    /// Signed permutation applied to raw vectors for the board mounting.
    orientation: [i8; 9],
    dt: f32,
    roll: f32,
    pitch: f32,
    yaw: f32,
    fused_once: bool,
}

impl Mpu9150 {
    pub fn new() -> Self {
        Self {
            orientation: [1, 0, 0, 0, 1, 0, 0, 0, 1],
            dt: 0.0,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            fused_once: false,
        }
    }

    /// Configure for `rate_hz` data-ready interrupts with `orientation`
    /// mapping sensor axes onto the mount frame.
    pub async fn init<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
        rate_hz: u16,
        orientation: [i8; 9],
    ) -> Result<(), Error> {
        self.orientation = orientation;
        self.dt = 1.0 / rate_hz as f32;

        // Out of sleep, clock from the X gyro PLL
        self.write_reg(i2c, REG_PWR_MGMT_1, 0x01).await?;
        Timer::after(Duration::from_millis(30)).await;

        // DLPF 42 Hz -> gyro output rate 1 kHz
        self.write_reg(i2c, REG_CONFIG, 0x03).await?;
        // Sample rate divider: 1 kHz / (div + 1)
        let div = (1000 / rate_hz as u32).saturating_sub(1) as u8;
        self.write_reg(i2c, REG_SMPLRT_DIV, div).await?;

        // Gyro ±2000 dps, accel ±8 g
        self.write_reg(i2c, REG_GYRO_CONFIG, 0x18).await?;
        self.write_reg(i2c, REG_ACCEL_CONFIG, 0x10).await?;

        // Data-ready interrupt drives the control loop
        self.write_reg(i2c, REG_INT_ENABLE, 0x01).await?;
        Timer::after(Duration::from_millis(10)).await;

        Ok(())
    }

    /// Read the latest sample and advance the fusion one step.
    pub async fn read_sample<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<ImuSample, Error> {
        let mut raw = [0u8; 14];
        i2c.write_read(ADDR, &[REG_ACCEL_XOUT_H], &mut raw).await?;

        let word = |i: usize| i16::from_be_bytes([raw[i], raw[i + 1]]);
        let accel = self.remap([word(0), word(2), word(4)]);
        // raw[6..8] is the die temperature, unused
        let gyro = self.remap([word(8), word(10), word(12)]);

        self.fuse(&accel, &gyro);
        Ok(ImuSample {
            euler: [self.roll, self.pitch, self.yaw],
            gyro_raw: gyro,
        })
    }

    fn remap(&self, v: [i16; 3]) -> [i16; 3] {
        let m = &self.orientation;
        let mut out = [0i16; 3];
        for r in 0..3 {
            let mut acc = 0i32;
            for c in 0..3 {
                acc += m[r * 3 + c] as i32 * v[c] as i32;
            }
            out[r] = acc.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
        out
    }

    fn fuse(&mut self, accel: &[i16; 3], gyro: &[i16; 3]) {
        let ax = accel[0] as f32 / ACCEL_LSB_PER_G;
        let ay = accel[1] as f32 / ACCEL_LSB_PER_G;
        let az = accel[2] as f32 / ACCEL_LSB_PER_G;

        let to_rad_s = GYRO_FSR_DPS * (PI / 180.0) / 32767.0;
        let gx = gyro[0] as f32 * to_rad_s;
        let gy = gyro[1] as f32 * to_rad_s;
        let gz = gyro[2] as f32 * to_rad_s;

        let roll_acc = ay.atan2(az);
        let pitch_acc = (-ax).atan2((ay * ay + az * az).sqrt());

        if !self.fused_once {
            // Seed from the accelerometer so startup attitude is level-true
            self.roll = roll_acc;
            self.pitch = pitch_acc;
            self.yaw = 0.0;
            self.fused_once = true;
            return;
        }

        self.roll = FUSION_ALPHA * (self.roll + gx * self.dt) + (1.0 - FUSION_ALPHA) * roll_acc;
        self.pitch = FUSION_ALPHA * (self.pitch + gy * self.dt) + (1.0 - FUSION_ALPHA) * pitch_acc;
        // No magnetometer in the loop: yaw is pure gyro integration, wrapped
        // like the fused output so consumers see a (-pi, pi] angle.
        self.yaw = wrap_pi(self.yaw + gz * self.dt);
    }

    async fn write_reg<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
        reg: u8,
        value: u8,
    ) -> Result<(), Error> {
        i2c.write(ADDR, &[reg, value]).await
    }
}

fn wrap_pi(mut a: f32) -> f32 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a <= -PI {
        a += 2.0 * PI;
    }
    a
}
