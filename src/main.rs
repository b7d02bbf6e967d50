use eyre::Result;

fn main() -> Result<()> {
    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    eivboot::start(settings_path)?;
    Ok(())
}
