/// Progress callback invoked by long operations as `(operation, done, total)`.
///
/// The host binds this to whatever surface it owns (terminal, GUI); the
/// core never formats progress itself.
pub type ProgressFn = dyn Fn(&str, usize, usize);

/// Invoke the callback when present.
pub fn report(progress: Option<&ProgressFn>, operation: &str, done: usize, total: usize) {
    if let Some(cb) = progress {
        cb(operation, done, total);
    }
}
