/// Recommended error type for your scenario `main` function and any policy hooks that you write.
/// This type is compatible with the [crate::definition::PolicyHook] type so you can use `?` to
/// propagate errors.
pub type FleetTunnelResult<T> = anyhow::Result<T>;
