use anyhow::Result;
use tracing_subscriber::fmt;

/// Install the stderr subscriber. Quiet unless `verbose`, so stdout stays
/// clean for exported rows.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let _ = fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
    Ok(())
}
