//! GDB/MI value grammar.
//!
//! ```text
//! results := result ( "," result )* ","?
//! result  := key "=" value | value
//! value   := c-string | "{" results? "}" | "[" results? "]" | const
//! ```
//!
//! A keyless result inherits the key of its predecessor, old gdb versions emit
//! multi-location breakpoints as `bkpt={..},{..}`.
use chumsky::prelude::*;
use chumsky::Parser;

type Err<'a> = extra::Err<Rich<'a, char>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Const(String),
    List(Vec<Value>),
    Tuple(Tuple),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Value::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

/// Ordered key-value collection, keys may repeat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple(Vec<(String, Value)>);

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: Value) {
        self.0.push((key.into(), value));
    }

    fn from_items(items: Vec<(Option<&str>, Value)>) -> Self {
        let mut tuple = Tuple::new();
        let mut last_key = String::new();
        for (key, value) in items {
            if let Some(key) = key {
                last_key = key.to_string();
            }
            tuple.push(last_key.clone(), value);
        }
        tuple
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.0.iter().filter(move |(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_str(key).map(ToString::to_string)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    /// Parse hex (`0x` prefixed) or decimal number.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_str(key).and_then(parse_u64)
    }

    pub fn get_tuple(&self, key: &str) -> Option<&Tuple> {
        self.get(key).and_then(Value::as_tuple)
    }

    pub fn get_list(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_list)
    }
}

pub fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[derive(Clone)]
enum Piece {
    Char(char),
    Byte(u8),
}

fn decode(pieces: Vec<Piece>) -> String {
    let mut bytes = Vec::with_capacity(pieces.len());
    let mut buf = [0u8; 4];
    for piece in pieces {
        match piece {
            Piece::Char(c) => bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
            Piece::Byte(b) => bytes.push(b),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// C-style quoted string, octal escapes are collected as raw bytes.
pub fn c_string<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    let octal = one_of("01234567")
        .repeated()
        .at_least(1)
        .at_most(3)
        .to_slice()
        .map(|digits: &str| Piece::Byte(u8::from_str_radix(digits, 8).unwrap_or(b'?')));

    let escape = just('\\').ignore_then(choice((
        just('n').to(Piece::Char('\n')),
        just('t').to(Piece::Char('\t')),
        just('r').to(Piece::Char('\r')),
        just('e').to(Piece::Char('\x1b')),
        octal,
        any::<_, Err>().map(Piece::Char),
    )));

    none_of("\\\"")
        .map(Piece::Char)
        .or(escape)
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just('"'), just('"'))
        .map(decode)
        .labelled("c-string")
}

fn key<'a>() -> impl Parser<'a, &'a str, &'a str, Err<'a>> + Clone {
    any::<_, Err>()
        .filter(|c: &char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .repeated()
        .at_least(1)
        .to_slice()
        .labelled("key")
}

fn constant<'a>() -> impl Parser<'a, &'a str, Value, Err<'a>> + Clone {
    none_of(",{}[]\"=")
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|s: &str| Value::Const(s.to_string()))
        .labelled("constant")
}

pub fn value<'a>() -> impl Parser<'a, &'a str, Value, Err<'a>> + Clone {
    recursive(|value| {
        let item = key().then_ignore(just('=')).or_not().then(value);
        let items = item
            .separated_by(just(','))
            .allow_trailing()
            .collect::<Vec<_>>();

        let tuple = items
            .clone()
            .delimited_by(just('{'), just('}'))
            .map(|items| Value::Tuple(Tuple::from_items(items)));
        let list = items
            .delimited_by(just('['), just(']'))
            .map(|items: Vec<(Option<&str>, Value)>| {
                Value::List(items.into_iter().map(|(_, v)| v).collect())
            });

        choice((c_string().map(Value::Const), tuple, list, constant()))
    })
}

fn results<'a>() -> impl Parser<'a, &'a str, Tuple, Err<'a>> {
    key()
        .then_ignore(just('='))
        .or_not()
        .then(value())
        .separated_by(just(','))
        .allow_trailing()
        .collect::<Vec<_>>()
        .then_ignore(end())
        .map(Tuple::from_items)
}

/// Parse record payload (the part after `class,`).
pub fn parse_results(payload: &str) -> Option<Tuple> {
    results().parse(payload).into_result().ok()
}

/// Parse stream record body (a single c-string).
pub fn parse_c_string(s: &str) -> Option<String> {
    c_string().then_ignore(end()).parse(s).into_result().ok()
}

#[cfg(test)]
mod test {
    use super::*;

    fn c(s: &str) -> Value {
        Value::Const(s.to_string())
    }

    #[test]
    fn test_c_string() {
        struct TestCase {
            string: &'static str,
            result: Option<&'static str>,
        }
        let cases = vec![
            TestCase {
                string: r#""hello""#,
                result: Some("hello"),
            },
            TestCase {
                string: r#""a\tb\n""#,
                result: Some("a\tb\n"),
            },
            TestCase {
                string: r#""say \"hi\"""#,
                result: Some("say \"hi\""),
            },
            TestCase {
                string: r#""\303\251t\303\251""#,
                result: Some("été"),
            },
            TestCase {
                string: r#""back\\slash""#,
                result: Some("back\\slash"),
            },
            TestCase {
                string: r#""unterminated"#,
                result: None,
            },
        ];

        for tc in cases {
            assert_eq!(
                parse_c_string(tc.string).as_deref(),
                tc.result,
                "{}",
                tc.string
            );
        }
    }

    #[test]
    fn test_results_nested() {
        let t = parse_results(
            r#"bkpt={number="1",type="breakpoint",enabled="y",line="10",thread-groups=["i1"]}"#,
        )
        .unwrap();
        let bkpt = t.get_tuple("bkpt").unwrap();
        assert_eq!(bkpt.get_str("number"), Some("1"));
        assert_eq!(bkpt.get_i64("line"), Some(10));
        assert_eq!(bkpt.get_list("thread-groups"), Some(&[c("i1")][..]));
    }

    #[test]
    fn test_results_list_of_results_drops_keys() {
        let t = parse_results(r#"stack=[frame={level="0"},frame={level="1"}]"#).unwrap();
        let stack = t.get_list("stack").unwrap();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[1].as_tuple().unwrap().get_i64("level"), Some(1));
    }

    #[test]
    fn test_results_tolerance() {
        assert!(parse_results("").unwrap().is_empty());
        assert!(parse_results("{}").is_some());

        let t = parse_results(r#"a="1",b=[],c={},"#).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.get_list("b"), Some(&[][..]));
        assert!(t.get_tuple("c").unwrap().is_empty());

        let t = parse_results(r#"register-values=[{number="0",value="0x1c"},]"#).unwrap();
        assert_eq!(t.get_list("register-values").unwrap().len(), 1);
    }

    #[test]
    fn test_results_keyless_inherits_key() {
        let t = parse_results(
            r#"bkpt={number="1",addr="<MULTIPLE>"},{number="1.1",line="7"},{number="1.2",line="9"}"#,
        )
        .unwrap();
        let all: Vec<_> = t.get_all("bkpt").collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].as_tuple().unwrap().get_i64("line"), Some(9));
    }

    #[test]
    fn test_results_bare_constant() {
        let t = parse_results("thread-id=all,value=42").unwrap();
        assert_eq!(t.get_str("thread-id"), Some("all"));
        assert_eq!(t.get_i64("value"), Some(42));
    }

    #[test]
    fn test_results_malformed() {
        assert!(parse_results(r#"a={"#).is_none());
        assert!(parse_results(r#"a="x"}"#).is_none());
        assert!(parse_results(r#"a=[1,"#).is_none());
    }

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("0x401136"), Some(0x401136));
        assert_eq!(parse_u64("17"), Some(17));
        assert_eq!(parse_u64("<MULTIPLE>"), None);
    }
}
