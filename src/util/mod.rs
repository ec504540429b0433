pub mod angle;
pub mod logging;
pub mod shutdown;
pub mod time;

#[cfg(test)]
pub(crate) fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() <= eps
}
