#[macro_export]
macro_rules! acquire_lock {
    ($mutex:expr, $lock:ident => $exec:block ) => {
        match $mutex.lock() {
            #[allow(unused_mut)]
            Ok(mut $lock) => $exec,
            _ => Default::default(),
        }
    };
}

/// Logs a message at most once per call site.
///
/// Renderer error handling (missing resources, degenerate inputs) must never
/// spam the log once per frame, so every call site gets its own `Once` guard
/// the first expansion installs. Forwards straight to `logger::log`, so the
/// caller crate must depend on `logger` the same way it would to call it
/// directly.
#[macro_export]
macro_rules! log_once {
    ($($arg:tt)*) => {{
        static LOGGED_ONCE: ::std::sync::Once = ::std::sync::Once::new();
        LOGGED_ONCE.call_once(|| {
            ::logger::log(format!($($arg)*));
        });
    }};
}
