use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

#[doc(hidden)]
pub fn __init_test(module_path: &'static str) {
    let crate_name = module_path.split("::").next().unwrap();

    let filter = format!("{crate_name}=trace")
        .parse::<tracing_subscriber::EnvFilter>()
        .unwrap()
        .add_directive(LevelFilter::WARN.into());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_filter(filter),
        )
        .try_init()
        .ok();
}

/// Initializes the logger for testing.
///
/// This logs to the writer registered by the Rust test runner, and only
/// captures logs from the calling crate.
///
/// # Example
///
/// ```ignore
/// wiretap_log::init_test!();
/// ```
#[macro_export]
macro_rules! init_test {
    () => {
        $crate::__init_test(::std::module_path!());
    };
}
