use anyhow::Context;
use ai_gateway_core::config::GatewayConfig;
use ai_gateway_core::policy::Policy;
use ai_gateway_core::tenant::Tenant;

/// Loads and validates the config/policy/tenant documents without starting
/// a server, the way a cluster tool validates connectivity before its
/// watch/reconcile loop runs for real.
pub fn run(config: &str, policies: Option<&str>, tenants: Option<&str>) -> anyhow::Result<()> {
    println!("Validating gateway configuration...\n");

    print!("  Config file .................. ");
    let config_text = std::fs::read_to_string(config).with_context(|| format!("cannot read config file '{config}'"))?;
    let parsed = GatewayConfig::from_yaml_str(&config_text).context("config file is not valid YAML/JSON")?;
    println!("OK ({config})");
    println!(
        "    scanner.parallel={} queue.maxSize={} lb.algorithm={:?} cache.maxEntries={}",
        parsed.scanner.parallel, parsed.queue.max_size, parsed.lb.algorithm, parsed.cache.max_entries
    );

    if let Some(path) = policies {
        print!("  Policy document ............... ");
        let text = std::fs::read_to_string(path).with_context(|| format!("cannot read policy file '{path}'"))?;
        let raw: Vec<Policy> = serde_yaml::from_str(&text).context("policy document is not valid YAML")?;
        let count = raw.len();
        let engine = ai_gateway_core::policy::PolicyEngine::new(raw);
        let dropped = count - engine.policies().len();
        println!("OK ({} loaded, {} malformed skipped)", engine.policies().len(), dropped);
    }

    if let Some(path) = tenants {
        print!("  Tenant document ................ ");
        let text = std::fs::read_to_string(path).with_context(|| format!("cannot read tenant file '{path}'"))?;
        let raw: Vec<Tenant> = serde_yaml::from_str(&text).context("tenant document is not valid YAML")?;
        println!("OK ({} tenants)", raw.len());
    }

    println!("\nConfiguration is valid.");
    Ok(())
}
