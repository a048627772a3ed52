use service_broker::config::AppConfig;
use service_broker::logic::BrokerRegistry;
use service_broker::seed;

fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Service Broker: catalog");

    let config = AppConfig::load()?;
    let configs = config.service_configs()?;
    println!(
        "Configuration loaded: project={}, {} operator service config(s)",
        config.broker.project_id,
        configs.len()
    );

    let mut registry = BrokerRegistry::new(config.features.clone());
    seed::load_builtin_services(&mut registry, &configs)?;

    let catalog = registry.catalog();
    println!("{}", serde_json::to_string_pretty(&catalog)?);

    Ok(())
}
