pub mod blackbox;
pub mod button;
pub mod core_loop;
pub mod flight_stack;
pub mod indicator;
pub mod link;
pub mod printer;
pub mod safety;
pub mod telemetry;
