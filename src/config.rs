/// Flight configuration record. Lives in NOR flash, loaded at boot and
/// re-read by the arming supervisor on every arm so ground tuning takes
/// effect on the next flight.
use crate::drivers::flash::{FlashError, W25qxx};
use embassy_stm32::spi::Instance;

pub const CONFIG_MAGIC: u32 = 0x51_46_43_31; // "QFC1"
pub const CONFIG_VERSION: u32 = 2;
pub const CONFIG_BLOB_LEN: usize = 8 + NUM_FIELDS * 4 + 4;

const NUM_FIELDS: usize = 18;

#[derive(Clone, Copy, Debug)]
pub struct FlightConfig {
    // Rate-loop gains (roll and pitch act on angular rate error)
    pub roll_rate_kp: f32,
    pub roll_rate_ki: f32,
    pub roll_rate_kd: f32,
    pub pitch_rate_kp: f32,
    pub pitch_rate_ki: f32,
    pub pitch_rate_kd: f32,
    // Yaw acts on accumulated heading error
    pub yaw_kp: f32,
    pub yaw_ki: f32,
    pub yaw_kd: f32,
    /// Normalized throttle the mixer adds so the props never fully stop in flight.
    pub idle_throttle: f32,
    /// Largest roll/pitch angle the sticks may command, rad.
    pub max_roll_setpoint: f32,
    pub max_pitch_setpoint: f32,
    /// Largest yaw rate the sticks may command, rad/s.
    pub max_yaw_rate: f32,
    /// Outer-loop conversion: commanded rate per radian of attitude error.
    pub roll_rate_per_rad: f32,
    pub pitch_rate_per_rad: f32,
    /// Sensor-axis trims subtracted from the fused Euler angles, rad.
    pub imu_roll_err: f32,
    pub imu_pitch_err: f32,
    /// Below this pack voltage the safety supervisor raises a warning.
    pub low_battery_volts: f32,
}

impl FlightConfig {
    pub const DEFAULT: Self = Self {
        roll_rate_kp: 0.08,
        roll_rate_ki: 0.30,
        roll_rate_kd: 0.0035,
        pitch_rate_kp: 0.08,
        pitch_rate_ki: 0.30,
        pitch_rate_kd: 0.0035,
        yaw_kp: 0.25,
        yaw_ki: 0.05,
        yaw_kd: 0.01,
        idle_throttle: 0.12,
        max_roll_setpoint: 0.40,
        max_pitch_setpoint: 0.40,
        max_yaw_rate: 2.5,
        roll_rate_per_rad: 6.0,
        pitch_rate_per_rad: 6.0,
        imu_roll_err: 0.0,
        imu_pitch_err: 0.0,
        low_battery_volts: 10.5,
    };

    fn fields(&self) -> [f32; NUM_FIELDS] {
        [
            self.roll_rate_kp,
            self.roll_rate_ki,
            self.roll_rate_kd,
            self.pitch_rate_kp,
            self.pitch_rate_ki,
            self.pitch_rate_kd,
            self.yaw_kp,
            self.yaw_ki,
            self.yaw_kd,
            self.idle_throttle,
            self.max_roll_setpoint,
            self.max_pitch_setpoint,
            self.max_yaw_rate,
            self.roll_rate_per_rad,
            self.pitch_rate_per_rad,
            self.imu_roll_err,
            self.imu_pitch_err,
            self.low_battery_volts,
        ]
    }

    fn from_fields(f: &[f32; NUM_FIELDS]) -> Self {
        Self {
            roll_rate_kp: f[0],
            roll_rate_ki: f[1],
            roll_rate_kd: f[2],
            pitch_rate_kp: f[3],
            pitch_rate_ki: f[4],
            pitch_rate_kd: f[5],
            yaw_kp: f[6],
            yaw_ki: f[7],
            yaw_kd: f[8],
            idle_throttle: f[9],
            max_roll_setpoint: f[10],
            max_pitch_setpoint: f[11],
            max_yaw_rate: f[12],
            roll_rate_per_rad: f[13],
            pitch_rate_per_rad: f[14],
            imu_roll_err: f[15],
            imu_pitch_err: f[16],
            low_battery_volts: f[17],
        }
    }

    /// Serialize as [magic][version][fields...][checksum], all little endian.
    pub fn to_bytes(&self) -> [u8; CONFIG_BLOB_LEN] {
        let mut blob = [0u8; CONFIG_BLOB_LEN];
        blob[0..4].copy_from_slice(&CONFIG_MAGIC.to_le_bytes());
        blob[4..8].copy_from_slice(&CONFIG_VERSION.to_le_bytes());
        for (i, field) in self.fields().iter().enumerate() {
            let off = 8 + i * 4;
            blob[off..off + 4].copy_from_slice(&field.to_le_bytes());
        }
        let crc = checksum(&blob[..CONFIG_BLOB_LEN - 4]);
        blob[CONFIG_BLOB_LEN - 4..].copy_from_slice(&crc.to_le_bytes());
        blob
    }

    /// Parse a flash blob. `None` on bad magic, version or checksum.
    pub fn from_bytes(blob: &[u8]) -> Option<Self> {
        if blob.len() < CONFIG_BLOB_LEN {
            return None;
        }
        let word = |off: usize| u32::from_le_bytes([blob[off], blob[off + 1], blob[off + 2], blob[off + 3]]);
        if word(0) != CONFIG_MAGIC || word(4) != CONFIG_VERSION {
            return None;
        }
        if word(CONFIG_BLOB_LEN - 4) != checksum(&blob[..CONFIG_BLOB_LEN - 4]) {
            return None;
        }
        let mut fields = [0.0f32; NUM_FIELDS];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = f32::from_bits(word(8 + i * 4));
        }
        Some(Self::from_fields(&fields))
    }
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// XOR-fold over whole words. Cheap and catches erased-flash (all 0xFF) blobs.
fn checksum(data: &[u8]) -> u32 {
    let mut crc = 0xA5A5_A5A5u32;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        crc = crc.rotate_left(7) ^ u32::from_le_bytes(word);
    }
    crc
}

/// Load the stored config, materializing defaults when the block is absent
/// or corrupt. The recovered defaults are written back so the next boot
/// reads a valid block.
pub fn load_or_default<T: Instance>(flash: &mut W25qxx<'_, T>) -> FlightConfig {
    let mut blob = [0u8; CONFIG_BLOB_LEN];
    match flash.read(0, &mut blob) {
        Ok(()) => match FlightConfig::from_bytes(&blob) {
            Some(cfg) => cfg,
            None => {
                defmt::warn!("config block invalid, writing defaults");
                let cfg = FlightConfig::DEFAULT;
                if let Err(e) = store(flash, &cfg) {
                    defmt::warn!("config writeback failed: {}", e);
                }
                cfg
            }
        },
        Err(e) => {
            defmt::warn!("config read failed ({}), using defaults", e);
            FlightConfig::DEFAULT
        }
    }
}

pub fn store<T: Instance>(flash: &mut W25qxx<'_, T>, cfg: &FlightConfig) -> Result<(), FlashError> {
    flash.erase_sector(0)?;
    flash.program(0, &cfg.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let mut cfg = FlightConfig::DEFAULT;
        cfg.roll_rate_kp = 0.123;
        cfg.low_battery_volts = 9.9;
        let blob = cfg.to_bytes();
        let back = FlightConfig::from_bytes(&blob).expect("valid blob");
        assert_eq!(back.roll_rate_kp, 0.123);
        assert_eq!(back.low_battery_volts, 9.9);
        assert_eq!(back.yaw_kp, cfg.yaw_kp);
    }

    #[test]
    fn corrupt_blob_rejected() {
        let mut blob = FlightConfig::DEFAULT.to_bytes();
        blob[10] ^= 0x40;
        assert!(FlightConfig::from_bytes(&blob).is_none());
    }

    #[test]
    fn erased_flash_rejected() {
        let blob = [0xFFu8; CONFIG_BLOB_LEN];
        assert!(FlightConfig::from_bytes(&blob).is_none());
    }

    #[test]
    fn short_blob_rejected() {
        assert!(FlightConfig::from_bytes(&[0u8; 8]).is_none());
    }
}
