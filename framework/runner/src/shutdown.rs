use tokio::signal;
use fleet_tunnel_core::prelude::ShutdownHandle;

/// Trigger the returned handle on Ctrl-C.
///
/// Policies stop scheduling new executions once the handle fires, executions that are already
/// running are left to finish and the pool is torn down as normal.
pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime) -> ShutdownHandle {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C, the scenario can only end on its own: {e}");
            return;
        }
        listener_handle.shutdown();
        println!("Received shutdown signal, finishing running executions...");
    });

    handle
}
