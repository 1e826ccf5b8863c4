pub fn run() -> anyhow::Result<()> {
    println!("ai-gatewayd {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
