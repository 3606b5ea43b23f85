//! ELM327 Wire Conventions
//!
//! Commands are plain text terminated by CR LF. Responses are terminated by
//! the `>` prompt; lines within a response are separated by CR (optionally
//! mixed with LF and spaces).

/// Appended to every outbound command
pub const COMMAND_TERMINATOR: &str = "\r\n";

/// Prompt character that ends a complete response
pub const RESPONSE_TERMINATOR: char = '>';

/// Single byte written to abort a response still in progress
pub const BREAK: u8 = 0x00;

/// Separator between startup commands in the `elm_commands` preference
pub const STARTUP_COMMAND_SEPARATOR: char = ';';

/// Encode a command for transmission
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + COMMAND_TERMINATOR.len());
    bytes.extend_from_slice(command.as_bytes());
    bytes.extend_from_slice(COMMAND_TERMINATOR.as_bytes());
    bytes
}

/// Split a `;`-separated startup command list into trimmed, non-empty commands
pub fn split_startup_commands(list: &str) -> Vec<String> {
    list.split(STARTUP_COMMAND_SEPARATOR)
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command("ATZ"), b"ATZ\r\n".to_vec());
        assert_eq!(encode_command(""), b"\r\n".to_vec());
    }

    #[test]
    fn test_split_startup_commands() {
        let commands = split_startup_commands("ATZ; ATE0;ATL0 ;  ATMA");
        assert_eq!(commands, vec!["ATZ", "ATE0", "ATL0", "ATMA"]);
    }

    #[test]
    fn test_split_startup_commands_skips_empty() {
        assert!(split_startup_commands(" ; ;").is_empty());
        assert!(split_startup_commands("").is_empty());
        assert_eq!(split_startup_commands("ATZ;;"), vec!["ATZ"]);
    }
}
