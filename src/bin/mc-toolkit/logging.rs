pub fn init_tracing() {
    // Off unless asked for; stdout belongs to --json output and the
    // subscriber writes to stderr.
    let filter = std::env::var("RUST_LOG").ok();
    let enable = filter.as_deref().is_some_and(|s| !s.trim().is_empty())
        || std::env::var_os("MC_TOOLKIT_LOG").is_some();

    if !enable {
        return;
    }

    let filter = filter
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "mc_toolkit=debug,info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
