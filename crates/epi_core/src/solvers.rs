use crate::traits::{constant, DynamicalSystem, Scalar, Steppable};

/// Explicit (forward) Euler Solver
pub struct Euler<T: Scalar> {
    k1: Vec<T>,
}

impl<T: Scalar> Euler<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Euler<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        system.apply(*t, state, &mut self.k1);
        for i in 0..state.len() {
            state[i] = state[i] + dt * self.k1[i];
        }
        *t = *t + dt;
    }
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half = constant::<T>(0.5);
        let sixth = constant::<T>(1.0 / 6.0);
        let two = constant::<T>(2.0);

        let t0 = *t;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1);

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

/// Dormand-Prince 5(4) Solver
///
/// Unlike the fixed-step solvers this one does not commit a step by itself:
/// [`DormandPrince::attempt`] computes the 5th order proposal together with an
/// embedded 4th order error estimate, and the caller decides whether to keep it.
pub struct DormandPrince<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>,
    tmp: Vec<T>,
    proposal: Vec<T>,
}

impl<T: Scalar> DormandPrince<T> {
    /// Order of the embedded error estimate, used by step-size controllers.
    pub const ERROR_ORDER: i32 = 4;

    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
            proposal: vec![z; dim],
        }
    }

    /// The 5th order state computed by the last [`attempt`](Self::attempt).
    pub fn proposal(&self) -> &[T] {
        &self.proposal
    }

    /// Tries a step of size `dt` from `(t, state)` and returns the RMS error norm,
    /// scaled so that values `<= 1` satisfy `atol + rtol * |y|` per component.
    pub fn attempt(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        rtol: T,
        atol: T,
    ) -> T {
        let c2 = constant::<T>(1.0 / 5.0);
        let c3 = constant::<T>(3.0 / 10.0);
        let c4 = constant::<T>(4.0 / 5.0);
        let c5 = constant::<T>(8.0 / 9.0);

        let a21 = constant::<T>(1.0 / 5.0);

        let a31 = constant::<T>(3.0 / 40.0);
        let a32 = constant::<T>(9.0 / 40.0);

        let a41 = constant::<T>(44.0 / 45.0);
        let a42 = constant::<T>(-56.0 / 15.0);
        let a43 = constant::<T>(32.0 / 9.0);

        let a51 = constant::<T>(19372.0 / 6561.0);
        let a52 = constant::<T>(-25360.0 / 2187.0);
        let a53 = constant::<T>(64448.0 / 6561.0);
        let a54 = constant::<T>(-212.0 / 729.0);

        let a61 = constant::<T>(9017.0 / 3168.0);
        let a62 = constant::<T>(-355.0 / 33.0);
        let a63 = constant::<T>(46732.0 / 5247.0);
        let a64 = constant::<T>(49.0 / 176.0);
        let a65 = constant::<T>(-5103.0 / 18656.0);

        // b coefficients (5th order)
        let b1 = constant::<T>(35.0 / 384.0);
        let b3 = constant::<T>(500.0 / 1113.0);
        let b4 = constant::<T>(125.0 / 192.0);
        let b5 = constant::<T>(-2187.0 / 6784.0);
        let b6 = constant::<T>(11.0 / 84.0);

        // e = b (5th order) - b* (4th order)
        let e1 = constant::<T>(71.0 / 57600.0);
        let e3 = constant::<T>(-71.0 / 16695.0);
        let e4 = constant::<T>(71.0 / 1920.0);
        let e5 = constant::<T>(-17253.0 / 339200.0);
        let e6 = constant::<T>(22.0 / 525.0);
        let e7 = constant::<T>(-1.0 / 40.0);

        let dim = state.len();

        // k1
        system.apply(t, state, &mut self.k1);

        // k2
        for i in 0..dim {
            self.tmp[i] = state[i] + dt * (a21 * self.k1[i]);
        }
        system.apply(t + c2 * dt, &self.tmp, &mut self.k2);

        // k3
        for i in 0..dim {
            self.tmp[i] = state[i] + dt * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t + c3 * dt, &self.tmp, &mut self.k3);

        // k4
        for i in 0..dim {
            self.tmp[i] = state[i] + dt * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t + c4 * dt, &self.tmp, &mut self.k4);

        // k5
        for i in 0..dim {
            self.tmp[i] = state[i]
                + dt * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t + c5 * dt, &self.tmp, &mut self.k5);

        // k6
        for i in 0..dim {
            self.tmp[i] = state[i]
                + dt * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t + dt, &self.tmp, &mut self.k6);

        // 5th order proposal, then k7 at its endpoint for the error estimate
        for i in 0..dim {
            self.proposal[i] = state[i]
                + dt * (b1 * self.k1[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }
        system.apply(t + dt, &self.proposal, &mut self.k7);

        if dim == 0 {
            return T::zero();
        }
        let mut sum = T::zero();
        for i in 0..dim {
            let err = dt
                * (e1 * self.k1[i]
                    + e3 * self.k3[i]
                    + e4 * self.k4[i]
                    + e5 * self.k5[i]
                    + e6 * self.k6[i]
                    + e7 * self.k7[i]);
            let scale = atol + rtol * state[i].abs().max(self.proposal[i].abs());
            let ratio = err / scale;
            sum = sum + ratio * ratio;
        }
        (sum / constant::<T>(dim as f64)).sqrt()
    }
}
