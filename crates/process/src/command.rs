//! Shell-tokenized command templates.
//!
//! Flow configurations describe the source and sink processes as single
//! command lines. They are tokenized once at load time; starting a flow
//! substitutes the stream name into the argument list.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProcessError, Result};
use crate::managed::ManagedProcess;

/// A parsed command line: a program plus its argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdTemplate {
    line: String,
    program: String,
    args: Vec<String>,
}

impl CmdTemplate {
    /// Tokenize a command line.
    pub fn parse(line: &str) -> Result<Self> {
        let words = shell_words::split(line)?;
        let (program, args) = match words.split_first() {
            Some((program, args)) if !program.is_empty() => (program.clone(), args.to_vec()),
            _ => return Err(ProcessError::EmptyCommand),
        };

        Ok(Self {
            line: line.to_string(),
            program,
            args,
        })
    }

    /// The program to execute.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The program's arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The command line this template was parsed from.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Replace arguments that exactly match a variable name.
    ///
    /// Only whole arguments are substituted, never substrings, and the
    /// program itself is left untouched.
    pub fn substitute(&self, vars: &HashMap<&str, &str>) -> CmdTemplate {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| match vars.get(arg.as_str()) {
                Some(value) => (*value).to_string(),
                None => arg.clone(),
            })
            .collect();

        let line = shell_words::join(
            std::iter::once(self.program.as_str()).chain(args.iter().map(String::as_str)),
        );

        Self {
            line,
            program: self.program.clone(),
            args,
        }
    }

    /// Build a (not yet started) process for this command.
    pub fn to_process(&self) -> ManagedProcess {
        ManagedProcess::new(&self.program, self.args.iter().cloned())
    }
}

impl fmt::Display for CmdTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = shell_words::join(
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)),
        );
        f.write_str(&joined)
    }
}

impl Serialize for CmdTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.line)
    }
}

impl<'de> Deserialize<'de> for CmdTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let line = String::deserialize(deserializer)?;
        CmdTemplate::parse(&line).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(stream: &'a str) -> HashMap<&'a str, &'a str> {
        let mut map = HashMap::new();
        map.insert("{stream}", stream);
        map
    }

    #[test]
    fn test_parse_simple() {
        let cmd = CmdTemplate::parse("ffmpeg -i - -f flv out").unwrap();
        assert_eq!(cmd.program(), "ffmpeg");
        assert_eq!(cmd.args(), &["-i", "-", "-f", "flv", "out"]);
    }

    #[test]
    fn test_parse_quoted() {
        let cmd = CmdTemplate::parse(r#"sh -c "cat > /dev/null""#).unwrap();
        assert_eq!(cmd.args(), &["-c", "cat > /dev/null"]);
    }

    #[test]
    fn test_parse_empty_is_an_error() {
        assert!(CmdTemplate::parse("").is_err());
        assert!(CmdTemplate::parse("   ").is_err());
    }

    #[test]
    fn test_parse_unbalanced_quote_is_an_error() {
        assert!(CmdTemplate::parse("echo \"oops").is_err());
    }

    #[test]
    fn test_substitute_whole_argument() {
        let cmd = CmdTemplate::parse("ffmpeg -i rtmp://host/app/{stream} {stream}").unwrap();
        let cmd = cmd.substitute(&vars("cam1"));
        // Only exact-match arguments are replaced.
        assert_eq!(
            cmd.args(),
            &["-i", "rtmp://host/app/{stream}", "cam1"]
        );
    }

    #[test]
    fn test_substitute_does_not_touch_program() {
        let cmd = CmdTemplate::parse("{stream} --verbose").unwrap();
        let cmd = cmd.substitute(&vars("cam1"));
        assert_eq!(cmd.program(), "{stream}");
        assert_eq!(cmd.args(), &["--verbose"]);
    }

    #[test]
    fn test_display_quotes_arguments() {
        let cmd = CmdTemplate::parse(r#"sh -c "sleep 1""#).unwrap();
        assert_eq!(cmd.to_string(), "sh -c 'sleep 1'");
    }

    #[test]
    fn test_serde_round_trip() {
        let cmd = CmdTemplate::parse("cat -").unwrap();
        let yaml = serde_yaml::to_string(&cmd).unwrap();
        let back: CmdTemplate = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cmd, back);
    }
}
