/// Discrete PID controller with a first-order low-pass on the derivative
/// term. One instance per controlled axis, marched once per control tick.
///
/// The integrator and derivative coefficients are synthesized from the
/// sample period at construction; running an instance at a different rate
/// than it was built for invalidates the tuning.
pub struct PidFilter {
    kp: f32,
    ki: f32,
    kd: f32,
    /// Precomputed derivative smoothing factor dt / (tau_d + dt).
    d_alpha: f32,
    dt: f32,
    integral: f32,
    prev_err: f32,
    d_state: f32,
    out: f32,
}

impl PidFilter {
    /// - `tau_d` : derivative low-pass time constant, seconds
    /// - `dt`    : sample period, seconds
    pub fn new(kp: f32, ki: f32, kd: f32, tau_d: f32, dt: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            d_alpha: dt / (tau_d + dt),
            dt,
            integral: 0.0,
            prev_err: 0.0,
            d_state: 0.0,
            out: 0.0,
        }
    }

    /// Advance one tick with a new error sample; returns the new output.
    pub fn march(&mut self, err: f32) -> f32 {
        // Trapezoid integration
        self.integral += 0.5 * (err + self.prev_err) * self.dt;

        // Backward-difference derivative through the low-pass
        let raw_d = (err - self.prev_err) / self.dt;
        self.d_state += self.d_alpha * (raw_d - self.d_state);

        self.prev_err = err;
        self.out = self.kp * err + self.ki * self.integral + self.kd * self.d_state;
        self.out
    }

    /// Clear all internal state and the stored output.
    pub fn zero(&mut self) {
        self.integral = 0.0;
        self.prev_err = 0.0;
        self.d_state = 0.0;
        self.out = 0.0;
    }

    /// Initialize the history to a steady state consistent with `err`, so the
    /// first march after (re)arming is a smooth continuation instead of a
    /// derivative kick. The integral starts empty.
    pub fn preload(&mut self, err: f32) {
        self.prev_err = err;
        self.d_state = 0.0;
        self.integral = 0.0;
        self.out = self.kp * err;
    }

    /// Clamp the current output to `[lo, hi]` and hold the integral term
    /// inside the same band so it cannot wind up past the bound.
    pub fn saturate(&mut self, lo: f32, hi: f32) -> f32 {
        if self.out > hi {
            self.out = hi;
        } else if self.out < lo {
            self.out = lo;
        }
        if self.ki > 0.0 {
            let i_lo = lo / self.ki;
            let i_hi = hi / self.ki;
            if self.integral > i_hi {
                self.integral = i_hi;
            } else if self.integral < i_lo {
                self.integral = i_lo;
            }
        }
        self.out
    }

    pub fn output(&self) -> f32 {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.005;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn proportional_only_response() {
        let mut pid = PidFilter::new(2.0, 0.0, 0.0, 0.01, DT);
        assert!(close(pid.march(1.0), 2.0));
        assert!(close(pid.march(-0.5), -1.0));
    }

    #[test]
    fn integral_accumulates_trapezoid() {
        let mut pid = PidFilter::new(0.0, 1.0, 0.0, 0.01, 0.1);
        // First step sees the 0 -> 1 ramp, then a flat error of 1.
        assert!(close(pid.march(1.0), 0.05));
        assert!(close(pid.march(1.0), 0.15));
        assert!(close(pid.march(1.0), 0.25));
    }

    #[test]
    fn saturate_clamps_output_and_integral() {
        let mut pid = PidFilter::new(0.0, 1.0, 0.0, 0.01, 0.1);
        for _ in 0..100 {
            pid.march(1.0);
            pid.saturate(-0.2, 0.2);
        }
        assert!(close(pid.output(), 0.2));
        // Error flips sign: with the integral held at the bound, the output
        // leaves the rail within two ticks rather than bleeding off wind-up.
        pid.march(-1.0);
        let after = pid.march(-1.0);
        assert!(close(after, 0.1));
    }

    #[test]
    fn zero_clears_everything() {
        let mut pid = PidFilter::new(1.0, 1.0, 1.0, 0.01, DT);
        pid.march(3.0);
        pid.zero();
        assert!(close(pid.output(), 0.0));
        // A zero-error march after zeroing stays at rest.
        assert!(close(pid.march(0.0), 0.0));
    }

    #[test]
    fn preload_suppresses_derivative_kick() {
        let mut cold = PidFilter::new(1.0, 0.0, 0.05, 0.01, DT);
        let kicked = cold.march(0.5);
        assert!(kicked > 2.0, "unloaded history must produce a kick");

        let mut warm = PidFilter::new(1.0, 0.0, 0.05, 0.01, DT);
        warm.preload(0.5);
        let smooth = warm.march(0.5);
        assert!(close(smooth, 0.5));
    }
}
