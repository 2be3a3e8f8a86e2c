use fleet_tunnel_runner::prelude::*;

fn main() -> FleetTunnelResult<()> {
    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .with_default_duration_s(300)
        .use_policy(hooks::fixed_duration);

    run(builder)?;

    Ok(())
}
