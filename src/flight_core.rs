/// The flight core: the fixed-rate cascade that turns one IMU sample and the
/// current setpoint into four normalized motor commands. `FlightCore` does no
/// I/O; the 200 Hz task in `tasks::core_loop` feeds it samples and writes its
/// outputs to the ESC driver.
use core::f32::consts::PI;

use micromath::F32Ext;

use crate::config::FlightConfig;
use crate::drivers::imu::{ImuSample, GYRO_FSR_DPS};
use crate::drivers::pid::PidFilter;
use crate::state::{CoreMode, CoreSetpoint, CoreTelem};

/// Control period. The PID coefficient synthesis depends on it; changing the
/// rate without retuning the gains invalidates stability.
pub const DT: f32 = 0.005;
pub const LOOP_HZ: u64 = 200;

/// Throttle below which the yaw target is frozen, so rudder input while
/// grounded does not wind the heading away.
const YAW_CUTOFF_TH: f32 = 0.10;
/// Throttle channel level above which the error integrators accumulate.
const INT_CUTOFF_TH: f32 = 0.30;
/// Setpoint throttle below which the craft is treated as landing.
const LAND_THROTTLE_TH: f32 = 0.10;
/// Tight output bound while landing: ground disturbances must not spin motors.
const LAND_SATURATION: f32 = 0.05;

/// Share of the thrust band the throttle stick commands above idle.
const MAX_THRUST_COMPONENT: f32 = 0.80;
const MAX_ROLL_COMPONENT: f32 = 0.20;
const MAX_PITCH_COMPONENT: f32 = 0.20;
const MAX_YAW_COMPONENT: f32 = 0.20;

/// Sample-to-sample yaw jump that flags a wrap across the +-pi boundary.
const YAW_JUMP_RAD: f32 = 6.0;
/// Derivative low-pass time constant for the axis controllers.
const D_FILTER_TAU: f32 = 0.02;
/// Floor for the tilt-compensation divisor; the tipover supervisor disarms
/// long before the attitude gets here.
const MIN_TILT_COS: f32 = 0.05;

// ── Attitude estimator ───────────────────────────────────────────────────────

/// Turns fused sensor-frame Euler angles and raw gyro words into continuous
/// body roll/pitch/yaw and rates. The sensor sits rotated on the board, so
/// roll comes from the sensor Y axis with inverted sign and pitch from X.
pub struct AttitudeEstimator {
    pub roll: f32,
    pub pitch: f32,
    /// Continuous heading: unwrapped across +-pi, zero where the craft armed.
    pub yaw: f32,
    pub droll: f32,
    pub dpitch: f32,
    pub dyaw: f32,
    last_yaw: f32,
    num_yaw_spins: i32,
    yaw_origin: f32,
}

impl AttitudeEstimator {
    pub fn new() -> Self {
        Self {
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            droll: 0.0,
            dpitch: 0.0,
            dyaw: 0.0,
            last_yaw: 0.0,
            num_yaw_spins: 0,
            yaw_origin: 0.0,
        }
    }

    pub fn update(&mut self, s: &ImuSample, cfg: &FlightConfig) {
        self.roll = -(s.euler[1] - cfg.imu_roll_err);
        self.pitch = s.euler[0] - cfg.imu_pitch_err;

        let to_rad_s = GYRO_FSR_DPS * (PI / 180.0) / 32767.0;
        self.droll = s.gyro_raw[1] as f32 * to_rad_s;
        self.dpitch = s.gyro_raw[0] as f32 * to_rad_s;
        self.dyaw = s.gyro_raw[2] as f32 * to_rad_s;

        let wrapped = |spins: i32| -(s.euler[2] - self.yaw_origin) + 2.0 * PI * spins as f32;
        let jump = wrapped(self.num_yaw_spins) - self.last_yaw;
        if jump > YAW_JUMP_RAD {
            self.num_yaw_spins -= 1;
        } else if jump < -YAW_JUMP_RAD {
            self.num_yaw_spins += 1;
        }
        self.yaw = wrapped(self.num_yaw_spins);
        self.last_yaw = self.yaw;
    }

    /// Take the current sensor heading as the zero reference and forget any
    /// accumulated spins. Called on the first tick after arming.
    pub fn reset_yaw(&mut self, euler_z: f32) {
        self.yaw_origin = euler_z;
        self.num_yaw_spins = 0;
        self.last_yaw = 0.0;
        self.yaw = 0.0;
    }
}

// ── Motor mixing ─────────────────────────────────────────────────────────────

/// X-quadrotor mixing, motors 1=FR 2=BL 3=FL 4=BR, spin CW/CCW/CCW/CW.
/// u = (thrust, roll, pitch, yaw) torques.
pub fn mix(u: &[f32; 4]) -> [f32; 4] {
    [
        u[0] - u[1] + u[2] - u[3],
        u[0] + u[1] - u[2] - u[3],
        u[0] + u[1] + u[2] + u[3],
        u[0] - u[1] - u[2] + u[3],
    ]
}

/// Uniform desaturation: when any motor would exceed full thrust, shift the
/// whole set down by the overflow. Torque differentials survive at the cost
/// of collective thrust. Low-side overflow is handled by the final clamp.
pub fn desaturate(m: &mut [f32; 4]) {
    let mut max = m[0];
    for &v in m.iter().skip(1) {
        if v > max {
            max = v;
        }
    }
    if max > 1.0 {
        let spill = max - 1.0;
        for v in m.iter_mut() {
            *v -= spill;
        }
    }
}

// ── Flight core ──────────────────────────────────────────────────────────────

pub struct FlightCore {
    pub est: AttitudeEstimator,
    roll_rate_pid: PidFilter,
    pitch_rate_pid: PidFilter,
    yaw_pid: PidFilter,
    /// Accumulated heading target; advanced from the commanded yaw rate.
    yaw_setpoint: f32,
    droll_err_integrator: f32,
    dpitch_err_integrator: f32,
    yaw_err_integrator: f32,
    u: [f32; 4],
    esc_out: [f32; 4],
    loops: u32,
    pub vbatt: f32,
    prev_mode: CoreMode,
}

impl FlightCore {
    pub fn new(cfg: &FlightConfig) -> Self {
        let (roll, pitch, yaw) = build_controllers(cfg);
        Self {
            est: AttitudeEstimator::new(),
            roll_rate_pid: roll,
            pitch_rate_pid: pitch,
            yaw_pid: yaw,
            yaw_setpoint: 0.0,
            droll_err_integrator: 0.0,
            dpitch_err_integrator: 0.0,
            yaw_err_integrator: 0.0,
            u: [0.0; 4],
            esc_out: [0.0; 4],
            loops: 0,
            vbatt: 0.0,
            prev_mode: CoreMode::Disarmed,
        }
    }

    /// One control tick. Returns the normalized motor commands to emit, or
    /// `None` while disarmed (no pulses leave the craft).
    pub fn tick(
        &mut self,
        sample: &ImuSample,
        sp: &CoreSetpoint,
        cfg: &FlightConfig,
        mode: CoreMode,
    ) -> Option<[f32; 4]> {
        self.est.update(sample, cfg);

        // First tick out of DISARMED: new heading origin, fresh controllers
        // from the config the arming supervisor just reloaded.
        let rearmed = self.prev_mode == CoreMode::Disarmed && mode != CoreMode::Disarmed;
        if rearmed {
            self.est.reset_yaw(sample.euler[2]);
            let (roll, pitch, yaw) = build_controllers(cfg);
            self.roll_rate_pid = roll;
            self.pitch_rate_pid = pitch;
            self.yaw_pid = yaw;
        }

        match mode {
            CoreMode::Disarmed => {
                self.disarm_reset();
                self.prev_mode = mode;
                return None;
            }
            // Outer position loop not implemented; the attitude targets pass
            // through as commanded.
            CoreMode::Position | CoreMode::Attitude => {}
        }

        if sp.throttle > YAW_CUTOFF_TH {
            self.yaw_setpoint += DT * sp.yaw_rate;
        }

        // Throttle channel with tilt compensation: keep the vertical thrust
        // component constant as the craft banks.
        let thr = sp.throttle * (MAX_THRUST_COMPONENT - cfg.idle_throttle) + cfg.idle_throttle;
        let tilt = (self.est.roll.cos() * self.est.pitch.cos()).max(MIN_TILT_COS);
        self.u[0] = thr / tilt;

        // Outer attitude -> rate conversion
        let droll_sp = (sp.roll - self.est.roll) * cfg.roll_rate_per_rad;
        let dpitch_sp = (sp.pitch - self.est.pitch) * cfg.pitch_rate_per_rad;

        let droll_err = droll_sp - self.est.droll;
        let dpitch_err = dpitch_sp - self.est.dpitch;
        let yaw_err = self.yaw_setpoint - self.est.yaw;

        if self.u[0] > INT_CUTOFF_TH {
            self.droll_err_integrator += droll_err * DT;
            self.dpitch_err_integrator += dpitch_err * DT;
            self.yaw_err_integrator += yaw_err * DT;
        }

        if rearmed {
            self.roll_rate_pid.preload(droll_err);
            self.pitch_rate_pid.preload(dpitch_err);
            self.yaw_pid.preload(yaw_err);
        }

        self.roll_rate_pid.march(droll_err);
        self.pitch_rate_pid.march(dpitch_err);
        self.yaw_pid.march(yaw_err);

        let landing = sp.throttle < LAND_THROTTLE_TH;
        let bound = |axis_max: f32| if landing { LAND_SATURATION } else { axis_max };
        self.roll_rate_pid
            .saturate(-bound(MAX_ROLL_COMPONENT), bound(MAX_ROLL_COMPONENT));
        self.pitch_rate_pid
            .saturate(-bound(MAX_PITCH_COMPONENT), bound(MAX_PITCH_COMPONENT));
        self.yaw_pid
            .saturate(-bound(MAX_YAW_COMPONENT), bound(MAX_YAW_COMPONENT));
        self.u[1] = self.roll_rate_pid.output();
        self.u[2] = self.pitch_rate_pid.output();
        self.u[3] = self.yaw_pid.output();

        let mut esc = mix(&self.u);
        desaturate(&mut esc);
        for m in esc.iter_mut() {
            *m = m.clamp(0.0, 1.0);
        }
        if rearmed {
            // ESCs have been idle: a bare minimum pulse wakes them out of
            // calibration mode before real commands follow.
            esc = [0.0; 4];
        }

        self.esc_out = esc;
        self.loops = self.loops.wrapping_add(1);
        self.prev_mode = mode;
        Some(esc)
    }

    fn disarm_reset(&mut self) {
        self.droll_err_integrator = 0.0;
        self.dpitch_err_integrator = 0.0;
        self.yaw_err_integrator = 0.0;
        self.roll_rate_pid.zero();
        self.pitch_rate_pid.zero();
        self.yaw_pid.zero();
        self.yaw_setpoint = 0.0;
        self.u = [0.0; 4];
        self.esc_out = [0.0; 4];
    }

    /// Snapshot for the telemetry readers and the flight log.
    pub fn telem(&self) -> CoreTelem {
        CoreTelem {
            loops: self.loops,
            roll: self.est.roll,
            pitch: self.est.pitch,
            yaw: self.est.yaw,
            droll: self.est.droll,
            dpitch: self.est.dpitch,
            dyaw: self.est.dyaw,
            u: self.u,
            esc: self.esc_out,
            vbatt: self.vbatt,
        }
    }
}

fn build_controllers(cfg: &FlightConfig) -> (PidFilter, PidFilter, PidFilter) {
    (
        PidFilter::new(
            cfg.roll_rate_kp,
            cfg.roll_rate_ki,
            cfg.roll_rate_kd,
            D_FILTER_TAU,
            DT,
        ),
        PidFilter::new(
            cfg.pitch_rate_kp,
            cfg.pitch_rate_ki,
            cfg.pitch_rate_kd,
            D_FILTER_TAU,
            DT,
        ),
        PidFilter::new(cfg.yaw_kp, cfg.yaw_ki, cfg.yaw_kd, D_FILTER_TAU, DT),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FlightConfig {
        FlightConfig::DEFAULT
    }

    fn level_sample() -> ImuSample {
        ImuSample {
            euler: [0.0; 3],
            gyro_raw: [0; 3],
        }
    }

    fn setpoint(throttle: f32) -> CoreSetpoint {
        CoreSetpoint {
            throttle,
            ..CoreSetpoint::ZERO
        }
    }

    /// Core armed and past the first (wake-pulse) tick.
    fn armed_core() -> FlightCore {
        let mut core = FlightCore::new(&cfg());
        core.tick(&level_sample(), &setpoint(0.0), &cfg(), CoreMode::Attitude);
        core
    }

    #[test]
    fn disarmed_tick_is_silent_and_zeroed() {
        let mut core = FlightCore::new(&cfg());
        let out = core.tick(&level_sample(), &setpoint(0.8), &cfg(), CoreMode::Disarmed);
        assert!(out.is_none());
        let t = core.telem();
        assert_eq!(t.esc, [0.0; 4]);
        assert_eq!(core.droll_err_integrator, 0.0);
        assert_eq!(core.yaw_setpoint, 0.0);
    }

    #[test]
    fn repeated_disarm_is_idempotent() {
        let mut core = armed_core();
        core.tick(&level_sample(), &setpoint(0.0), &cfg(), CoreMode::Disarmed);
        let first = core.telem();
        core.tick(&level_sample(), &setpoint(0.0), &cfg(), CoreMode::Disarmed);
        let second = core.telem();
        assert_eq!(first.esc, second.esc);
        assert_eq!(first.u, second.u);
        assert_eq!(first.yaw, second.yaw);
    }

    #[test]
    fn yaw_unwrap_counts_spins() {
        let mut est = AttitudeEstimator::new();
        est.reset_yaw(0.0);
        let c = cfg();
        let mut outputs = [0.0f32; 4];
        for (i, z) in [-3.0f32, -3.1, 3.1, 3.0].iter().enumerate() {
            let s = ImuSample {
                euler: [0.0, 0.0, *z],
                gyro_raw: [0; 3],
            };
            est.update(&s, &c);
            outputs[i] = est.yaw;
        }
        assert!((outputs[0] - 3.0).abs() < 1e-3);
        assert!((outputs[1] - 3.1).abs() < 1e-3);
        assert!((outputs[2] - 3.183).abs() < 1e-2);
        assert!((outputs[3] - 3.283).abs() < 1e-2);
        assert_eq!(est.num_yaw_spins, 1);
    }

    #[test]
    fn cold_arm_emits_minimum_pulses_then_thrust() {
        let mut core = FlightCore::new(&cfg());
        let first = core
            .tick(&level_sample(), &setpoint(0.2), &cfg(), CoreMode::Attitude)
            .expect("armed tick produces output");
        assert_eq!(first, [0.0; 4]);

        let second = core
            .tick(&level_sample(), &setpoint(0.2), &cfg(), CoreMode::Attitude)
            .expect("armed tick produces output");
        assert!(second.iter().all(|&m| m > 0.0));
    }

    #[test]
    fn yaw_target_frozen_while_grounded() {
        let mut core = armed_core();
        let sp = CoreSetpoint {
            throttle: 0.0,
            yaw_rate: 1.0,
            ..CoreSetpoint::ZERO
        };
        for _ in 0..200 {
            core.tick(&level_sample(), &sp, &cfg(), CoreMode::Attitude);
        }
        assert_eq!(core.yaw_setpoint, 0.0);
    }

    #[test]
    fn yaw_target_tracks_rate_in_flight() {
        let mut core = armed_core();
        let sp = CoreSetpoint {
            throttle: 0.5,
            yaw_rate: 1.0,
            ..CoreSetpoint::ZERO
        };
        for _ in 0..100 {
            core.tick(&level_sample(), &sp, &cfg(), CoreMode::Attitude);
        }
        assert!((core.yaw_setpoint - 0.5).abs() < 1e-4);
    }

    #[test]
    fn integrators_gated_on_thrust_channel() {
        let mut core = armed_core();
        // u[0] = 0.2 * 0.68 + 0.12 = 0.256, below the cutoff
        let sp = CoreSetpoint {
            throttle: 0.2,
            roll: 0.3,
            ..CoreSetpoint::ZERO
        };
        for _ in 0..50 {
            core.tick(&level_sample(), &sp, &cfg(), CoreMode::Attitude);
        }
        assert_eq!(core.droll_err_integrator, 0.0);

        // u[0] = 0.5 * 0.68 + 0.12 = 0.46, above the cutoff
        let sp = CoreSetpoint {
            throttle: 0.5,
            roll: 0.3,
            ..CoreSetpoint::ZERO
        };
        core.tick(&level_sample(), &sp, &cfg(), CoreMode::Attitude);
        assert!(core.droll_err_integrator > 0.0);
    }

    #[test]
    fn roll_error_drives_roll_torque_toward_setpoint() {
        let mut core = armed_core();
        let sp = CoreSetpoint {
            throttle: 0.6,
            roll: 0.2,
            ..CoreSetpoint::ZERO
        };
        core.tick(&level_sample(), &sp, &cfg(), CoreMode::Attitude);
        assert!(core.u[1] > 0.0);
        // Roll torque maps +m1/+m2, -m0/-m3 in the X layout
        assert!(core.esc_out[1] > core.esc_out[0]);
        assert!(core.esc_out[2] > core.esc_out[3]);
    }

    #[test]
    fn tilt_compensation_raises_thrust_when_banked() {
        let mut core = armed_core();
        let banked = ImuSample {
            euler: [0.0, -0.5, 0.0], // sensor Y maps to -roll
            gyro_raw: [0; 3],
        };
        core.tick(&banked, &setpoint(0.5), &cfg(), CoreMode::Attitude);
        let banked_u0 = core.u[0];

        let mut level = armed_core();
        level.tick(&level_sample(), &setpoint(0.5), &cfg(), CoreMode::Attitude);
        assert!(banked_u0 > level.u[0]);
    }

    #[test]
    fn mixer_preserves_torque_differentials_through_desaturation() {
        let u = [0.9, 0.2, 0.2, 0.2];
        let m = mix(&u);
        let mut d = m;
        desaturate(&mut d);

        let max = d.iter().cloned().fold(f32::MIN, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
        assert!((d[0] - d[1] - (m[0] - m[1])).abs() < 1e-6);
        assert!((d[2] - d[3] - (m[2] - m[3])).abs() < 1e-6);
        assert!((d[0] + d[2] - d[1] - d[3] - (m[0] + m[2] - m[1] - m[3])).abs() < 1e-6);
    }

    #[test]
    fn saturated_outputs_stay_in_unit_band() {
        let mut core = armed_core();
        let sp = CoreSetpoint {
            throttle: 0.9,
            roll: 0.4,
            pitch: 0.4,
            yaw_rate: 2.0,
            ..CoreSetpoint::ZERO
        };
        for _ in 0..20 {
            let esc = core
                .tick(&level_sample(), &sp, &cfg(), CoreMode::Attitude)
                .unwrap();
            for m in esc {
                assert!((0.0..=1.0).contains(&m));
            }
        }
    }

    #[test]
    fn land_saturation_pins_axis_outputs_near_zero() {
        let mut core = armed_core();
        // Large attitude error with landing throttle: outputs must stay
        // inside the tight landing band.
        let sp = CoreSetpoint {
            throttle: 0.05,
            roll: 0.4,
            pitch: -0.4,
            ..CoreSetpoint::ZERO
        };
        core.tick(&level_sample(), &sp, &cfg(), CoreMode::Attitude);
        assert!(core.u[1].abs() <= LAND_SATURATION + 1e-6);
        assert!(core.u[2].abs() <= LAND_SATURATION + 1e-6);
        assert!(core.u[3].abs() <= LAND_SATURATION + 1e-6);
    }

    #[test]
    fn loop_counter_increments_per_armed_tick() {
        let mut core = armed_core();
        let start = core.telem().loops;
        let mut prev = start;
        for _ in 0..1000 {
            core.tick(&level_sample(), &setpoint(0.4), &cfg(), CoreMode::Attitude);
            let now = core.telem().loops;
            assert_eq!(now, prev + 1);
            prev = now;
        }
        assert_eq!(prev, start + 1000);
    }
}
