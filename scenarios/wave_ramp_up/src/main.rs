use fleet_tunnel_runner::prelude::*;

fn main() -> FleetTunnelResult<()> {
    let builder =
        ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME")).use_policy(hooks::wave);

    run(builder)?;

    Ok(())
}
