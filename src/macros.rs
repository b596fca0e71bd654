
/// Logs a line tagged with a component, routed as target `alertyx::<component>`.
/// Usage:
/// ```ignore
/// use log::Level;
/// alertyx::alertyx_log!(Level::Info, "monitor", "Monitoring started");
/// alertyx::alertyx_log!(Level::Error, "config", "Config load failed: {}", "bad toml");
/// ```
/// With the binary's fern format this comes out as:
/// [2025-04-25T16:32:10+02:00][INFO ][alertyx::monitor][pid=4568][tid=ThreadId(1)] Monitoring started
#[macro_export]
macro_rules! alertyx_log {
    ($level:expr, $component:literal, $fmt:literal $(, $($arg:tt)+)?) => {
        log::log!(
            target: concat!("alertyx::", $component),
            $level,
            $fmt
            $(, $($arg)+)?
        )
    };
}
