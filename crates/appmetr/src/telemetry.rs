use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// SDK records at info, everything else from the host application at warn.
pub const DEFAULT_DIRECTIVES: &str = "warn,appmetr=info,appmetr_http=info";

/// Install the SDK's subscriber with [`DEFAULT_DIRECTIVES`], overridable through `RUST_LOG`.
///
/// Storage, uploader and timer code log through the `log` facade; `LogTracer` routes those
/// records into tracing so they share one output with the `#[instrument]` spans.
/// Output goes to stderr, leaving stdout to command output.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    init_with_directives(DEFAULT_DIRECTIVES);
}

/// Same as [`init`] with a caller-chosen fallback when `RUST_LOG` is unset or invalid.
pub fn init_with_directives(fallback: &str) {
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Silence every record so storage benchmarks measure queue work only.
pub fn init_for_benchmarks() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("off"))
        .try_init();
}
