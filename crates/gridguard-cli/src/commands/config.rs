use gridguard_core::GuardConfig;

pub fn show(config: &GuardConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
