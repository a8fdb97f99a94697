use super::{parse_value, Command, CommandEnv, CommandError};

/// Behavior of commands registered without a custom handler.
pub(crate) fn run(
    command: &Command,
    env: &CommandEnv,
    params: &[String],
) -> Result<Option<String>, CommandError> {
    if !params.is_empty() {
        if command.configurable {
            return configure(command, env, params).map(Some);
        }
        if command.is_group() {
            return Ok(Some(command.usage()));
        }
        return Ok(Some("this cheat doesn't accept values.".to_string()));
    }

    if command.is_group() {
        if !command.can_toggle_subcommands {
            return Ok(Some(command.usage()));
        }
        return Ok(Some(toggle_children(command, env)));
    }

    let mut state = env.state.borrow_mut();
    let enabled = !state.flag(&command.path);
    state.set_flag(&command.path, enabled);
    let verb = if enabled { "activated" } else { "deactivated" };
    Ok(Some(format!("{} {verb}.", command.help)))
}

fn configure(
    command: &Command,
    env: &CommandEnv,
    params: &[String],
) -> Result<String, CommandError> {
    let (key, value_params) = match params.split_first() {
        Some((key, rest)) if command.keyed => (Some(key), rest),
        _ => (None, params),
    };
    if key.is_some() && value_params.is_empty() {
        return Err(CommandError::Usage(format!(
            "Usage: {} <key> <value>",
            command.full_name
        )));
    }

    let text = value_params.join(" ");
    let parsed = parse_value(&env.transforms, &text).map_err(|source| {
        CommandError::InvalidParameterFormat {
            command: command.full_name.clone(),
            source,
        }
    })?;
    let shown = parsed.to_string();

    let mut config_path = command.path.clone();
    config_path.extend(key.cloned());
    env.config.borrow_mut().set(&config_path, parsed.into());
    env.state.borrow_mut().set_flag(&command.path, true);
    log::debug!("configured {} = {shown}", config_path.join(" "));

    Ok(match key {
        Some(key) => format!("{} [{key}] set to {shown}.", command.full_name),
        None => format!("{} set to {shown}.", command.full_name),
    })
}

fn toggle_children(command: &Command, env: &CommandEnv) -> String {
    let mut state = env.state.borrow_mut();
    let enabled = !state.all_flag(&command.path);
    for child in &command.children {
        let mut path = command.path.clone();
        path.push(child.clone());
        // nested groups keep their own flags
        if state.is_group(&path) {
            continue;
        }
        state.set_flag(&path, enabled);
    }
    state.set_all_flag(&command.path, enabled);
    let verb = if enabled { "activated" } else { "deactivated" };
    format!("All {} options {verb}.", command.full_name)
}
