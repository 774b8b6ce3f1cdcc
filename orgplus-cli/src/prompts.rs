use anyhow::Result;
use inquire::Confirm;

/// Asks before a destructive command; `skip` comes from `--yes`
pub fn confirm(message: &str, skip: bool) -> Result<bool> {
    if skip {
        return Ok(true);
    }
    let answer = Confirm::new(message).with_default(false).prompt()?;
    Ok(answer)
}
