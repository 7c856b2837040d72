pub mod dsm;
pub mod esc;
pub mod flash;
pub mod imu;
pub mod leds;
pub mod mavlink;
pub mod pid;
