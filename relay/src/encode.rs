use crate::model::PendingCommand;
use chrono::SecondsFormat;

/// Body returned to a device that has nothing pending
pub const NO_MESSAGES: &str = "status=no_messages";

/// Encodes drained commands as the form pairs the device firmware parses:
/// `message1=..&timestamp1=..&message2=..`, in queue order.
pub fn encode_commands(commands: &[PendingCommand]) -> String {
    if commands.is_empty() {
        return NO_MESSAGES.to_string();
    }

    commands
        .iter()
        .enumerate()
        .map(|(i, command)| {
            let timestamp = command
                .enqueued_at
                .to_rfc3339_opts(SecondsFormat::Millis, true);
            format!(
                "message{n}={}&timestamp{n}={}",
                encode_component(&command.payload),
                encode_component(&timestamp),
                n = i + 1
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes like JavaScript's `encodeURIComponent`, which the device
/// decoder was written against: `!'()*` stay literal on top of the RFC 3986
/// unreserved set.
fn encode_component(text: &str) -> String {
    // '%' itself is emitted as %25, so these sequences can only come from the five marks
    urlencoding::encode(text)
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}
