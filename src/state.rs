/// Shared flight state. A handful of process-wide records connect the tasks;
/// each record has exactly one writer and any number of readers.
///
/// - `SETPOINT`     written by the flight stack, read by the core every tick
/// - `USER_INPUT`   written by the link watcher, read by the flight stack
/// - `CORE_TELEM`   written by the core, read by safety/telemetry/printer/arming
/// - `CONFIG`       written at boot and by the arming supervisor
///
/// Records are `Copy` and live behind `CriticalSectionRawMutex` cells, so a
/// reader always observes a whole snapshot and the 200 Hz core never blocks.
/// The mode words are plain atomics: disarming is a one-way latch that any
/// task may assert and only the arming supervisor clears.
use core::cell::Cell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::FlightConfig;

// ── Modes ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum CoreMode {
    Disarmed = 0,
    Attitude = 1,
    /// Reserved: attitude setpoint driven by an outer position loop.
    Position = 2,
}

impl CoreMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Attitude,
            2 => Self::Position,
            _ => Self::Disarmed,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum FlightMode {
    UserAttitude = 0,
    EmergencyLand = 1,
    EmergencyKill = 2,
    // Declared but not yet flown; kept so the surface doesn't reshape later.
    Loiter = 3,
    Cartesian = 4,
    Radial = 5,
    TargetHold = 6,
}

impl FlightMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::EmergencyLand,
            2 => Self::EmergencyKill,
            3 => Self::Loiter,
            4 => Self::Cartesian,
            5 => Self::Radial,
            6 => Self::TargetHold,
            _ => Self::UserAttitude,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum SystemState {
    Running = 0,
    Paused = 1,
    Exiting = 2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum DisarmReason {
    KillSwitch,
    Tipover,
    LinkLost,
    PauseButton,
    Shutdown,
}

// ── Records ───────────────────────────────────────────────────────────────────

/// Commanded targets for the flight core. Written only by the flight stack;
/// the accumulated yaw target lives inside the core so this record keeps a
/// single writer.
#[derive(Clone, Copy, Debug)]
pub struct CoreSetpoint {
    /// Normalized collective throttle in [0, 1].
    pub throttle: f32,
    /// Commanded roll/pitch angles, rad, bounded by config.
    pub roll: f32,
    pub pitch: f32,
    /// Commanded yaw rate, rad/s.
    pub yaw_rate: f32,
    // Reserved for the position outer loop.
    pub pos_north: f32,
    pub pos_east: f32,
    pub alt: f32,
}

impl CoreSetpoint {
    pub const ZERO: Self = Self {
        throttle: 0.0,
        roll: 0.0,
        pitch: 0.0,
        yaw_rate: 0.0,
        pos_north: 0.0,
        pos_east: 0.0,
        alt: 0.0,
    };
}

/// Decoded pilot intent. Written only by the link watcher.
#[derive(Clone, Copy, Debug)]
pub struct StickInput {
    /// Normalized stick deflections in [-1, 1]. Throttle rests at -1.
    pub throttle: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub kill_switch: bool,
    pub requested_mode: FlightMode,
}

impl StickInput {
    pub const NEUTRAL: Self = Self {
        throttle: -1.0,
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        kill_switch: false,
        requested_mode: FlightMode::UserAttitude,
    };
}

/// Per-tick snapshot of the core. Doubles as the flight-log record; the
/// blackbox CSV column order follows the field order here.
#[derive(Clone, Copy, Debug)]
pub struct CoreTelem {
    pub loops: u32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub droll: f32,
    pub dpitch: f32,
    pub dyaw: f32,
    pub u: [f32; 4],
    pub esc: [f32; 4],
    pub vbatt: f32,
}

impl CoreTelem {
    pub const ZERO: Self = Self {
        loops: 0,
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        droll: 0.0,
        dpitch: 0.0,
        dyaw: 0.0,
        u: [0.0; 4],
        esc: [0.0; 4],
        vbatt: 0.0,
    };
}

// ── Statics ───────────────────────────────────────────────────────────────────

static CORE_MODE: AtomicU8 = AtomicU8::new(CoreMode::Disarmed as u8);
static FLIGHT_MODE: AtomicU8 = AtomicU8::new(FlightMode::UserAttitude as u8);
static SYSTEM_STATE: AtomicU8 = AtomicU8::new(SystemState::Running as u8);
static VBATT_BITS: AtomicU32 = AtomicU32::new(0);

/// Minimum-width pulses the core still owes the ESCs while disarmed.
/// The arming supervisor loads this; the core drains one per tick.
pub static ESC_WAKE_PULSES: AtomicU8 = AtomicU8::new(0);

pub static SETPOINT: Mutex<CriticalSectionRawMutex, Cell<CoreSetpoint>> =
    Mutex::new(Cell::new(CoreSetpoint::ZERO));
pub static USER_INPUT: Mutex<CriticalSectionRawMutex, Cell<StickInput>> =
    Mutex::new(Cell::new(StickInput::NEUTRAL));
pub static CORE_TELEM: Mutex<CriticalSectionRawMutex, Cell<CoreTelem>> =
    Mutex::new(Cell::new(CoreTelem::ZERO));
pub static CONFIG: Mutex<CriticalSectionRawMutex, Cell<FlightConfig>> =
    Mutex::new(Cell::new(FlightConfig::DEFAULT));

// ── Accessors ─────────────────────────────────────────────────────────────────

pub fn core_mode() -> CoreMode {
    CoreMode::from_u8(CORE_MODE.load(Ordering::Acquire))
}

/// Sticky disarm. Safe to call from any task, any number of times; the
/// reason is only reported on the first armed→disarmed transition.
pub fn disarm(reason: DisarmReason) {
    let prev = CORE_MODE.swap(CoreMode::Disarmed as u8, Ordering::AcqRel);
    if prev != CoreMode::Disarmed as u8 {
        defmt::warn!("disarmed: {}", reason);
    }
}

/// Clears the disarm latch. Only the arming supervisor re-arms.
pub(crate) fn arm() {
    CORE_MODE.store(CoreMode::Attitude as u8, Ordering::Release);
    defmt::info!("core mode -> {}", CoreMode::Attitude);
}

pub fn flight_mode() -> FlightMode {
    FlightMode::from_u8(FLIGHT_MODE.load(Ordering::Acquire))
}

pub fn set_flight_mode(mode: FlightMode) {
    FLIGHT_MODE.store(mode as u8, Ordering::Release);
}

pub fn system_state() -> SystemState {
    match SYSTEM_STATE.load(Ordering::Acquire) {
        1 => SystemState::Paused,
        2 => SystemState::Exiting,
        _ => SystemState::Running,
    }
}

pub fn exiting() -> bool {
    system_state() == SystemState::Exiting
}

pub fn set_system_state(s: SystemState) {
    SYSTEM_STATE.store(s as u8, Ordering::Release);
}

pub fn battery_volts() -> f32 {
    f32::from_bits(VBATT_BITS.load(Ordering::Relaxed))
}

pub fn set_battery_volts(v: f32) {
    VBATT_BITS.store(v.to_bits(), Ordering::Relaxed);
}
