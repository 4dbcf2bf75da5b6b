//! Show or create the configuration file.

use reelcut_core::ReelcutConfig;

pub fn run(init: bool, config: &ReelcutConfig) -> anyhow::Result<()> {
    let path = ReelcutConfig::default_path();
    if init {
        if path.exists() {
            println!("Config already exists: {}", path.display());
        } else {
            let written = ReelcutConfig::default().save()?;
            println!("Wrote default config: {}", written.display());
        }
        return Ok(());
    }

    let status = if path.exists() { "" } else { " (not present, defaults)" };
    println!("Config: {}{}", path.display(), status);
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
