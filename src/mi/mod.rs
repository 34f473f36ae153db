//! GDB/MI wire codec: classifies backend output lines into records.
pub mod types;
pub mod value;

use crate::mi::value::{parse_c_string, parse_results, Tuple};
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use strum_macros::{Display, EnumString, IntoStaticStr};

static DISASSEMBLY_DATA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^~"(?:=>)?\s*0x[0-9a-fA-F]+\s*<[^>]*\+\d+>:.*"\s*$"#).expect("must compile")
});
static DISASSEMBLY_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^~"End of assembler dump\."#).expect("must compile"));
static ASYNC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\d*)([*=+])([^,\s]+)(?:,(.*))?$"#).expect("must compile")
});
static RESULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\d*)\^([^,\s]+)(?:,(.*))?$"#).expect("must compile")
});
static STREAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^([~@&])(".*")\s*$"#).expect("must compile"));
static PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\(gdb\)\s*$"#).expect("must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*` records, execution state changes.
    Exec,
    /// `+` records, progress of slow operations.
    Status,
    /// `=` records, supplementary information.
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Console,
    Target,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Result,
    AsyncNotify,
    ConsoleStream,
    TargetStream,
    LogStream,
    DisassemblyData,
    DisassemblyEnd,
    PromptMarker,
    RawProgramOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub token: Option<u32>,
    pub class: ResultClass,
    pub payload: Tuple,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsyncRecord {
    pub token: Option<u32>,
    pub kind: AsyncKind,
    pub class: String,
    pub payload: Tuple,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Result(ResultRecord),
    Async(AsyncRecord),
    Stream(StreamKind, String),
    DisassemblyData(String),
    DisassemblyEnd,
    Prompt,
    RawProgramOutput(String),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Result(_) => RecordKind::Result,
            Record::Async(_) => RecordKind::AsyncNotify,
            Record::Stream(StreamKind::Console, _) => RecordKind::ConsoleStream,
            Record::Stream(StreamKind::Target, _) => RecordKind::TargetStream,
            Record::Stream(StreamKind::Log, _) => RecordKind::LogStream,
            Record::DisassemblyData(_) => RecordKind::DisassemblyData,
            Record::DisassemblyEnd => RecordKind::DisassemblyEnd,
            Record::Prompt => RecordKind::PromptMarker,
            Record::RawProgramOutput(_) => RecordKind::RawProgramOutput,
        }
    }

    pub fn token(&self) -> Option<u32> {
        match self {
            Record::Result(r) => r.token,
            Record::Async(r) => r.token,
            _ => None,
        }
    }
}

fn token(digits: &str) -> Option<u32> {
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn payload(raw: Option<regex::Match>) -> Option<Tuple> {
    match raw {
        Some(m) => parse_results(m.as_str()),
        None => Some(Tuple::new()),
    }
}

fn stream_text(quoted: &str) -> String {
    parse_c_string(quoted).unwrap_or_else(|| quoted.trim_matches('"').to_string())
}

/// Classify a single backend output line. Never fails, anything unrecognized is
/// treated as output of the debuggee.
pub fn parse(raw_line: &str) -> Record {
    let line = raw_line.trim_end_matches(['\r', '\n']);
    let raw = || Record::RawProgramOutput(line.to_string());

    if DISASSEMBLY_DATA_RE.is_match(line) {
        return Record::DisassemblyData(stream_text(&line[1..]));
    }
    if DISASSEMBLY_END_RE.is_match(line) {
        return Record::DisassemblyEnd;
    }

    if let Some(caps) = ASYNC_RE.captures(line) {
        let kind = match &caps[2] {
            "*" => AsyncKind::Exec,
            "+" => AsyncKind::Status,
            _ => AsyncKind::Notify,
        };
        let Some(payload) = payload(caps.get(4)) else {
            return raw();
        };
        return Record::Async(AsyncRecord {
            token: token(&caps[1]),
            kind,
            class: caps[3].to_string(),
            payload,
        });
    }

    if let Some(caps) = RESULT_RE.captures(line) {
        let Ok(class) = ResultClass::from_str(&caps[2]) else {
            return raw();
        };
        let Some(payload) = payload(caps.get(3)) else {
            return raw();
        };
        return Record::Result(ResultRecord {
            token: token(&caps[1]),
            class,
            payload,
        });
    }

    if let Some(caps) = STREAM_RE.captures(line) {
        let kind = match &caps[1] {
            "~" => StreamKind::Console,
            "@" => StreamKind::Target,
            _ => StreamKind::Log,
        };
        return Record::Stream(kind, stream_text(&caps[2]));
    }

    if PROMPT_RE.is_match(line) {
        return Record::Prompt;
    }

    raw()
}

/// Quote a string argument for an MI command.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_kinds() {
        struct TestCase {
            line: &'static str,
            kind: RecordKind,
        }
        let cases = vec![
            TestCase {
                line: "^done",
                kind: RecordKind::Result,
            },
            TestCase {
                line: "000012^error,msg=\"No symbol table is loaded.\"",
                kind: RecordKind::Result,
            },
            TestCase {
                line: "*stopped,reason=\"end-stepping-range\",thread-id=\"1\"",
                kind: RecordKind::AsyncNotify,
            },
            TestCase {
                line: "=thread-group-added,id=\"i1\"",
                kind: RecordKind::AsyncNotify,
            },
            TestCase {
                line: "*running,thread-id=\"all\"\r\n",
                kind: RecordKind::AsyncNotify,
            },
            TestCase {
                line: "~\"GNU gdb (GDB) 13.2\\n\"",
                kind: RecordKind::ConsoleStream,
            },
            TestCase {
                line: "@\"program output\\n\"",
                kind: RecordKind::TargetStream,
            },
            TestCase {
                line: "&\"warning: something\\n\"",
                kind: RecordKind::LogStream,
            },
            TestCase {
                line: "~\"   0x0000000000401136 <+0>:\\tpush   %rbp\\n\"",
                kind: RecordKind::DisassemblyData,
            },
            TestCase {
                line: "~\"=> 0x000055555555513d <main+8>:\\tmov    $0x0,%eax\\n\"",
                kind: RecordKind::DisassemblyData,
            },
            TestCase {
                line: "~\"End of assembler dump.\\n\"",
                kind: RecordKind::DisassemblyEnd,
            },
            TestCase {
                line: "(gdb) ",
                kind: RecordKind::PromptMarker,
            },
            TestCase {
                line: "Hello, world!",
                kind: RecordKind::RawProgramOutput,
            },
            TestCase {
                line: "^done,value={",
                kind: RecordKind::RawProgramOutput,
            },
            TestCase {
                line: "^bogus",
                kind: RecordKind::RawProgramOutput,
            },
        ];

        for tc in cases {
            assert_eq!(parse(tc.line).kind(), tc.kind, "{}", tc.line);
        }
    }

    #[test]
    fn test_result_token() {
        let record = parse("000001^done,bkpt={number=\"1\",line=\"10\"}");
        assert_eq!(record.token(), Some(1));
        let Record::Result(result) = record else {
            panic!("result record expected");
        };
        assert_eq!(result.class, ResultClass::Done);
        assert_eq!(
            result.payload.get_tuple("bkpt").unwrap().get_i64("line"),
            Some(10)
        );

        assert_eq!(parse("^running").token(), None);
        assert_eq!(parse("42^done").token(), Some(42));
    }

    #[test]
    fn test_notify_has_no_token() {
        let record = parse("=library-loaded,id=\"/lib/libc.so.6\",symbols-loaded=\"0\"");
        assert_eq!(record.token(), None);
        let Record::Async(notify) = record else {
            panic!("async record expected");
        };
        assert_eq!(notify.kind, AsyncKind::Notify);
        assert_eq!(notify.class, "library-loaded");
        assert_eq!(notify.payload.get_str("id"), Some("/lib/libc.so.6"));
    }

    #[test]
    fn test_stream_unescape() {
        assert_eq!(
            parse("~\"Breakpoint 1, main () at a.c:3\\n\""),
            Record::Stream(
                StreamKind::Console,
                "Breakpoint 1, main () at a.c:3\n".to_string()
            )
        );
        assert_eq!(
            parse("~\"   0x01 <+0>:\\tnop\\n\""),
            Record::DisassemblyData("   0x01 <+0>:\tnop\n".to_string())
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("a.c:10"), "\"a.c:10\"");
        assert_eq!(quote(r#"x == "y""#), r#""x == \"y\"""#);
        assert_eq!(quote(r"C:\src\a.c"), r#""C:\\src\\a.c""#);
    }
}
