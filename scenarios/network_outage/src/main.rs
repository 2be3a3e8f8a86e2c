use fleet_tunnel_runner::prelude::*;

/// Runners work for a while, drop off the network together, then come back.
fn main() -> FleetTunnelResult<()> {
    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .with_default_duration_s(180)
        .use_policy(hooks::outage);

    run(builder)?;

    Ok(())
}
