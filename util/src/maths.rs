//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into `[min, max]`.
///
/// NaN values are mapped to `min`, so the output is always inside the range.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    if value.is_nan() {
        return min;
    }

    value.max(min).min(max)
}

/// Linear interpolation between `a` (at `t = 0`) and `b` (at `t = 1`).
pub fn lerp<T>(a: T, b: T, t: T) -> T
where
    T: Float,
{
    a + (b - a) * t
}

/// Move from `current` towards `target` by at most `max_step`.
///
/// The returned value always satisfies `(result - current).abs() <= max_step`, even where
/// `current + max_step` rounds away from `current`.
pub fn step_towards<T>(current: T, target: T, max_step: T) -> T
where
    T: Float,
{
    let delta = target - current;

    if delta.abs() <= max_step {
        return target;
    }

    let dir = delta.signum();
    let mut next = current + max_step * dir;

    // Pull back by an ulp at a time until the rounded step is within bounds
    while (next - current).abs() > max_step {
        if (next - current) * dir <= T::zero() {
            return current;
        }
        let ulp = next.abs().max(current.abs()).max(T::min_positive_value()) * T::epsilon();
        next = next - ulp * dir;
    }

    next
}
