//! Fixed-point IIR filtering for the breath pressure signal.
//!
//! The filter is a direct-form I recursion over fixed-depth histories of
//! input and output samples. Division by the leading denominator coefficient
//! is implemented as an arithmetic right shift, so `a[0]` must be a power of
//! two for the result to be exact.

/// Low-pass breath filter denominator (10 Hz cutoff at 1000 Hz).
pub const BREATH_FILTER_A: [i32; BREATH_FILTER_LENGTH] = [8192, -23982, 23433, -7642];

/// Low-pass breath filter numerator.
pub const BREATH_FILTER_B: [i32; BREATH_FILTER_LENGTH] = [130, -112, -112, 130];

/// Number of taps in the breath filter.
pub const BREATH_FILTER_LENGTH: usize = 4;

/// log2 of `BREATH_FILTER_A[0]`.
pub const BREATH_FILTER_A0_SHIFT: u32 = 13;

/// Fractional bits carried in the breath filter's output history.
pub const BREATH_FILTER_STATE_BITS: u32 = 13;

/// The breath filter output is nominally 32x the input.
pub const FILTER_GAIN_SHIFT: u32 = 5;

/// Scale a calibration level (sensor counts) into filter output units.
#[inline]
pub const fn level_to_filter_output(level: i32) -> i32 {
    level.saturating_mul(1 << FILTER_GAIN_SHIFT)
}

/// Scale a filter output back into sensor counts.
#[inline]
pub const fn filter_output_to_level(output: i32) -> i32 {
    output >> FILTER_GAIN_SHIFT
}

/// Direct-form I IIR filter with integer coefficients.
///
/// `y[n] = (Σ b[k]·x[n-k] - Σ_{k≥1} a[k]·y[n-k]) >> a0_shift`
///
/// The output history keeps `state_bits` extra fractional bits so that
/// truncation in the feedback path does not settle into a limit cycle.
/// With `state_bits == 0` the recursion is purely integer.
#[derive(Debug, Clone)]
pub struct IirFilter<const N: usize> {
    b: [i32; N],
    a: [i32; N],
    a0_shift: u32,
    state_bits: u32,
    /// Input history, newest first
    x_history: [i64; N],
    /// Output history with `state_bits` fractional bits, newest first
    y_history: [i64; N],
}

impl<const N: usize> IirFilter<N> {
    /// Create a filter with zeroed history.
    pub fn new(b: [i32; N], a: [i32; N], a0_shift: u32, state_bits: u32) -> Self {
        debug_assert!(N > 0, "filter needs at least one tap");
        debug_assert_eq!(
            a[0],
            1 << a0_shift,
            "a[0] must equal 2^a0_shift for the shift to be exact"
        );

        Self {
            b,
            a,
            a0_shift,
            state_bits,
            x_history: [0; N],
            y_history: [0; N],
        }
    }

    /// Clear both histories.
    pub fn reset(&mut self) {
        self.x_history = [0; N];
        self.y_history = [0; N];
    }

    /// Filter one sample and return the filtered value.
    ///
    /// The output saturates at the `i32` range. The history keeps the
    /// unsaturated value so a settled filter stays linear.
    pub fn step(&mut self, x: i32) -> i32 {
        self.x_history.copy_within(0..N - 1, 1);
        self.x_history[0] = i64::from(x);

        let feedforward: i128 = self
            .b
            .iter()
            .zip(self.x_history.iter())
            .map(|(&b, &x)| i128::from(b) * i128::from(x))
            .sum();

        // y_history[0] still holds y[n-1] at this point
        let feedback: i128 = self.a[1..]
            .iter()
            .zip(self.y_history.iter())
            .map(|(&a, &y)| i128::from(a) * i128::from(y))
            .sum();

        let acc = (feedforward << self.state_bits) - feedback;
        let y = (acc >> self.a0_shift).clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;

        self.y_history.copy_within(0..N - 1, 1);
        self.y_history[0] = y;

        self.output(y)
    }

    /// Most recent filtered value.
    pub fn last_output(&self) -> i32 {
        self.output(self.y_history[0])
    }

    fn output(&self, y: i64) -> i32 {
        (y >> self.state_bits).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    /// Depth of the sample histories.
    pub fn history_len(&self) -> usize {
        N
    }

    /// Steady-state gain of the coefficient set, `Σb / Σa`.
    pub fn dc_gain(&self) -> f64 {
        let sum_b: i64 = self.b.iter().map(|&b| i64::from(b)).sum();
        let sum_a: i64 = self.a.iter().map(|&a| i64::from(a)).sum();
        if sum_a == 0 {
            return f64::INFINITY;
        }
        sum_b as f64 / sum_a as f64
    }
}

/// Alias for the breath pressure filter.
pub type BreathFilter = IirFilter<BREATH_FILTER_LENGTH>;

/// Build the breath pressure low-pass filter.
pub fn breath_filter() -> BreathFilter {
    IirFilter::new(
        BREATH_FILTER_B,
        BREATH_FILTER_A,
        BREATH_FILTER_A0_SHIFT,
        BREATH_FILTER_STATE_BITS,
    )
}
