#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArgShape {
    None,
    Path,
    Raw,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub shape: ArgShape,
}

pub(crate) const SESSION_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "photo",
        shape: ArgShape::Path,
    },
    CommandSpec {
        command: "outfit",
        shape: ArgShape::Path,
    },
    CommandSpec {
        command: "save",
        shape: ArgShape::Path,
    },
    CommandSpec {
        command: "describe",
        shape: ArgShape::Raw,
    },
    CommandSpec {
        command: "mode",
        shape: ArgShape::Raw,
    },
    CommandSpec {
        command: "creativity",
        shape: ArgShape::Raw,
    },
    CommandSpec {
        command: "generate",
        shape: ArgShape::None,
    },
    CommandSpec {
        command: "continue",
        shape: ArgShape::None,
    },
    CommandSpec {
        command: "status",
        shape: ArgShape::None,
    },
    CommandSpec {
        command: "help",
        shape: ArgShape::None,
    },
];

pub(crate) fn find_command(command: &str) -> Option<&'static CommandSpec> {
    SESSION_COMMANDS.iter().find(|spec| spec.command == command)
}

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/photo <path>",
    "/outfit <path>",
    "/describe <text>",
    "/mode text|image",
    "/creativity <0-100>",
    "/generate",
    "/continue",
    "/save <path>",
    "/status",
    "/help",
];
