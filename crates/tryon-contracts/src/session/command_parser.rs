use super::command_registry::{find_command, ArgShape};

/// One line of interactive studio input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Noop,
    SetPhoto(String),
    SetOutfitImage(String),
    Describe(String),
    SetMode(String),
    SetCreativity(i64),
    Generate,
    Continue,
    Save(String),
    Status,
    Help,
    /// Plain text: use it as the outfit description and generate right away.
    DescribeAndGenerate(String),
    Invalid { command: String, reason: String },
    Unknown { command: String, arg: String },
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn invalid(command: &str, reason: &str) -> SessionCommand {
    SessionCommand::Invalid {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

fn build_command(command: &str, shape: ArgShape, arg: &str) -> SessionCommand {
    match shape {
        ArgShape::None => match command {
            "generate" => SessionCommand::Generate,
            "continue" => SessionCommand::Continue,
            "status" => SessionCommand::Status,
            _ => SessionCommand::Help,
        },
        ArgShape::Path => {
            let path = parse_single_path_arg(arg);
            if path.is_empty() {
                return invalid(command, "requires a path");
            }
            match command {
                "photo" => SessionCommand::SetPhoto(path),
                "outfit" => SessionCommand::SetOutfitImage(path),
                _ => SessionCommand::Save(path),
            }
        }
        ArgShape::Raw => match command {
            "describe" => SessionCommand::Describe(arg.to_string()),
            "mode" => {
                if arg.is_empty() {
                    return invalid(command, "requires text or image");
                }
                SessionCommand::SetMode(arg.to_string())
            }
            _ => match arg.parse::<i64>() {
                Ok(value) => SessionCommand::SetCreativity(value),
                Err(_) => invalid(command, "requires a whole number between 0 and 100"),
            },
        },
    }
}

pub fn parse_command(text: &str) -> SessionCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return SessionCommand::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            return match find_command(&command) {
                Some(spec) => build_command(spec.command, spec.shape, arg),
                None => SessionCommand::Unknown {
                    command,
                    arg: arg.to_string(),
                },
            };
        }
    }

    SessionCommand::DescribeAndGenerate(raw_trimmed.to_string())
}
