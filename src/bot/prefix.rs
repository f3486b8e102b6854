use super::commands::MusicCommand;

/// Parses a text message such as `!p never gonna give you up`.
///
/// Returns `None` for messages without the prefix and for unknown commands.
pub fn parse_prefixed(content: &str, prefix: &str) -> Option<MusicCommand> {
    let body = content.trim_start().strip_prefix(prefix)?;
    let body = body.trim_start();

    let (name, arg) = match body.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg),
        None => (body, ""),
    };

    if name.is_empty() {
        return None;
    }

    MusicCommand::parse(name, arg)
}
