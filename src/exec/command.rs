//! Command-Line Templating & Output Encoding
//!
//! Turns one already-resolved command string plus the `Shell` it runs under
//! into the `(executable, argument-string)` pair `Spawner::run` takes, and
//! decodes a spawned process's captured bytes back into the `String` stored
//! on `Command.output`. See distilled spec §4.5.

use std::path::PathBuf;

use regex_lite::Regex;

use crate::script::{OutputEncoding, ReplaceRule, Shell};

/// A command line ready to hand to a [`crate::exec::spawner::Spawner`].
#[derive(Debug, Clone)]
pub struct BuiltCommand {
    pub exe: PathBuf,
    pub raw_cmdline: String,
}

/// Builds the final command line for one resolved command string: applies
/// the shell's replacement rules to it in declared order, quotes it unless
/// the shell declares `raw_cmdline` (its replacements are expected to already
/// escape whatever the target shell needs, matching the Windows default's
/// `\`/`"` rules), then splices the result into the `{?}` placeholder of the
/// shell's `cmdline` template.
pub fn build_command(shell: &Shell, command_text: &str) -> BuiltCommand {
    let mut text = command_text.to_string();
    for rule in &shell.replacements {
        text = apply_replacement(rule, &text);
    }

    let argument = if shell.raw_cmdline { text } else { quote(&text) };

    let template = shell.cmdline.get_string();
    let raw_cmdline = template.replace("{?}", &argument);

    BuiltCommand { exe: PathBuf::from(shell.path.get_string()), raw_cmdline }
}

fn apply_replacement(rule: &ReplaceRule, text: &str) -> String {
    match Regex::new(&rule.pattern) {
        Ok(re) => re.replace_all(text, rule.replacement.as_str()).into_owned(),
        Err(_) => text.to_string(),
    }
}

/// POSIX-shell double-quoting: wraps the value and backslash-escapes any
/// embedded `\` or `"`, the same rule `Func::Esc` applies to `{var\esc}`.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Decodes a spawned command's merged output bytes per the shell's declared
/// encoding. UTF-16 is only attempted when the byte count is even; any
/// conversion failure (odd length, or malformed UTF-16) falls back to a lossy
/// UTF-8 read of the raw bytes rather than failing the command.
pub fn decode_output(bytes: &[u8], encoding: OutputEncoding) -> String {
    match encoding {
        OutputEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        OutputEncoding::Utf16 => {
            if bytes.len() % 2 != 0 {
                return String::from_utf8_lossy(bytes).into_owned();
            }
            let (decoded, _, had_errors) = encoding_rs::UTF_16LE.decode(bytes);
            if had_errors {
                String::from_utf8_lossy(bytes).into_owned()
            } else {
                decoded.into_owned()
            }
        }
    }
}

/// Strips `\r` for the log block only; the bytes recorded on `Command.output`
/// keep them, matching the distilled spec's "never altered on the model"
/// rule for captured output.
pub fn strip_cr_for_log(text: &str) -> String {
    text.chars().filter(|&c| c != '\r').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineInfo;

    #[test]
    fn builds_default_unix_command_line() {
        let shell = Shell::default_unix(LineInfo::synthetic());
        let built = build_command(&shell, "echo hi");
        assert_eq!(built.exe, PathBuf::from("/bin/sh"));
        assert_eq!(built.raw_cmdline, "-c \"echo hi\"");
    }

    #[test]
    fn windows_replacements_escape_before_raw_splice() {
        let shell = Shell::default_windows(LineInfo::synthetic());
        let built = build_command(&shell, r#"echo "a\b""#);
        assert!(built.raw_cmdline.contains(r#"\"a\\b\""#));
        assert!(built.raw_cmdline.starts_with("/C "));
    }

    #[test]
    fn decode_output_falls_back_on_odd_length_utf16() {
        let decoded = decode_output(b"abc", OutputEncoding::Utf16);
        assert_eq!(decoded, "abc");
    }

    #[test]
    fn decode_output_converts_valid_utf16le() {
        let bytes: Vec<u8> = "hi".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_output(&bytes, OutputEncoding::Utf16), "hi");
    }

    #[test]
    fn strip_cr_removes_carriage_returns_only() {
        assert_eq!(strip_cr_for_log("a\r\nb\r\n"), "a\nb\n");
    }
}
